mod support;

use std::sync::Arc;
use std::time::Duration;

use kiln::store::RequestStore;
use kiln::{BuildId, BuildStatus, BuildUpdate, RunOutcome};
use support::{
    ScriptedSupervisor, fixed_request, flex_request, orchestrator, submission, templates_in,
};
use tempfile::TempDir;

// ── Normal runs ──

#[tokio::test]
async fn successful_build_completes_with_output() {
    let tmp = TempDir::new().unwrap();
    let supervisor = Arc::new(ScriptedSupervisor::exit(
        0,
        &["==> oracle-oci: Creating instance...", "Build finished."],
    ));
    let (orchestrator, store) = orchestrator(Arc::clone(&supervisor), tmp.path());
    let request = store.create(&submission(fixed_request("DEFAULT"))).await.unwrap();

    let outcome = orchestrator.run(request.id).await;

    assert_eq!(outcome, RunOutcome::Finished(BuildStatus::Completed));
    let stored = store.get(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BuildStatus::Completed);
    assert_eq!(
        stored.packer_output,
        "==> oracle-oci: Creating instance...\nBuild finished.\n"
    );
    assert_eq!(
        supervisor.streamed(),
        vec!["==> oracle-oci: Creating instance...", "Build finished."]
    );
}

#[tokio::test]
async fn packer_is_invoked_with_the_generated_template() {
    let tmp = TempDir::new().unwrap();
    let supervisor = Arc::new(ScriptedSupervisor::exit(0, &[]));
    let (orchestrator, store) = orchestrator(Arc::clone(&supervisor), tmp.path());
    let request = store.create(&submission(flex_request("BUILDER"))).await.unwrap();

    orchestrator.run(request.id).await;

    let invocations = supervisor.invocations();
    assert_eq!(invocations.len(), 1);
    let call = &invocations[0];
    let expected_path = tmp.path().join(format!("build-{}.pkr.json", request.id));
    assert_eq!(call.program, "packer");
    assert_eq!(
        call.args,
        vec![
            "build".to_owned(),
            "-force".to_owned(),
            expected_path.display().to_string(),
        ]
    );

    let template: serde_json::Value =
        serde_json::from_str(call.template.as_deref().unwrap()).unwrap();
    let source = &template["source"]["oracle-oci"]["oci-base-image"];
    assert_eq!(source["shape"], "VM.Standard.E4.Flex");
    assert_eq!(source["shape_config"]["ocpus"], 2);
    assert_eq!(source["shape_config"]["memory_in_gbs"], 32);
    assert_eq!(source["user_ocid"], "ocid1.user.oc1..builder");
    assert_eq!(source["compartment_ocid"], "ocid1.compartment.oc1..test");
    assert_eq!(
        template["build"]["provisioner"][0]["shell"]["inline"][1],
        "sudo yum install -y nginx git"
    );
}

#[tokio::test]
async fn spawned_build_reports_through_handle() {
    let tmp = TempDir::new().unwrap();
    let supervisor = Arc::new(ScriptedSupervisor::exit(0, &["done"]));
    let (orchestrator, store) = orchestrator(supervisor, tmp.path());
    let request = store.create(&submission(fixed_request("DEFAULT"))).await.unwrap();

    let handle = orchestrator.spawn(request.id);
    assert_eq!(handle.id(), request.id);

    assert_eq!(
        handle.wait().await,
        RunOutcome::Finished(BuildStatus::Completed)
    );
    assert_eq!(
        store.get(request.id).await.unwrap().unwrap().status,
        BuildStatus::Completed
    );
}

#[tokio::test]
async fn dropped_handle_does_not_stop_the_build() {
    let tmp = TempDir::new().unwrap();
    let supervisor = Arc::new(ScriptedSupervisor::exit(0, &[]));
    let (orchestrator, store) = orchestrator(supervisor, tmp.path());
    let request = store.create(&submission(fixed_request("DEFAULT"))).await.unwrap();

    drop(orchestrator.spawn(request.id));

    let mut status = BuildStatus::Queued;
    for _ in 0..100 {
        status = store.get(request.id).await.unwrap().unwrap().status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, BuildStatus::Completed);
}

// ── Failed builds ──

#[tokio::test]
async fn shutdown_waits_for_spawned_builds() {
    let tmp = TempDir::new().unwrap();
    let supervisor =
        Arc::new(ScriptedSupervisor::exit(0, &["ok"]).with_delay(Duration::from_millis(100)));
    let (orchestrator, store) = orchestrator(supervisor, tmp.path());
    let first = store.create(&submission(fixed_request("DEFAULT"))).await.unwrap();
    let second = store.create(&submission(flex_request("BUILDER"))).await.unwrap();
    drop(orchestrator.spawn(first.id));
    drop(orchestrator.spawn(second.id));

    orchestrator.shutdown().await;

    for id in [first.id, second.id] {
        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, BuildStatus::Completed, "build {id}");
    }
    assert!(templates_in(tmp.path()).is_empty());
}

#[tokio::test]
async fn nonzero_exit_fails_and_keeps_output() {
    let tmp = TempDir::new().unwrap();
    let supervisor = Arc::new(ScriptedSupervisor::exit(
        1,
        &[
            "==> oracle-oci: Creating instance...",
            "Build 'oracle-oci.oci-base-image' errored: 401 NotAuthenticated",
        ],
    ));
    let (orchestrator, store) = orchestrator(Arc::clone(&supervisor), tmp.path());
    let request = store.create(&submission(fixed_request("DEFAULT"))).await.unwrap();

    let outcome = orchestrator.run(request.id).await;

    assert_eq!(outcome, RunOutcome::Finished(BuildStatus::Failed));
    let stored = store.get(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BuildStatus::Failed);
    assert_eq!(
        stored.packer_output,
        "==> oracle-oci: Creating instance...\n\
         Build 'oracle-oci.oci-base-image' errored: 401 NotAuthenticated\n"
    );
    assert!(supervisor.invocations()[0].template.is_some());
    assert!(templates_in(tmp.path()).is_empty());
}

#[tokio::test]
async fn killed_process_fails() {
    let tmp = TempDir::new().unwrap();
    let supervisor = Arc::new(ScriptedSupervisor::killed());
    let (orchestrator, store) = orchestrator(supervisor, tmp.path());
    let request = store.create(&submission(fixed_request("DEFAULT"))).await.unwrap();

    assert_eq!(
        orchestrator.run(request.id).await,
        RunOutcome::Finished(BuildStatus::Failed)
    );
    assert!(templates_in(tmp.path()).is_empty());
}

#[tokio::test]
async fn launch_failure_fails_with_error_text() {
    let tmp = TempDir::new().unwrap();
    let supervisor = Arc::new(ScriptedSupervisor::launch_failure());
    let (orchestrator, store) = orchestrator(supervisor, tmp.path());
    let request = store.create(&submission(fixed_request("DEFAULT"))).await.unwrap();

    let outcome = orchestrator.run(request.id).await;

    assert_eq!(outcome, RunOutcome::Finished(BuildStatus::Failed));
    let stored = store.get(request.id).await.unwrap().unwrap();
    assert_eq!(
        stored.packer_output,
        "\nERROR: failed to start packer: No such file or directory"
    );
    assert!(templates_in(tmp.path()).is_empty());
}

#[tokio::test]
async fn wait_failure_keeps_output_before_error() {
    let tmp = TempDir::new().unwrap();
    let supervisor = Arc::new(ScriptedSupervisor::wait_failure(&[
        "==> oracle-oci: Creating instance...",
    ]));
    let (orchestrator, store) = orchestrator(supervisor, tmp.path());
    let request = store.create(&submission(fixed_request("DEFAULT"))).await.unwrap();

    let outcome = orchestrator.run(request.id).await;

    assert_eq!(outcome, RunOutcome::Finished(BuildStatus::Failed));
    let stored = store.get(request.id).await.unwrap().unwrap();
    assert_eq!(
        stored.packer_output,
        "==> oracle-oci: Creating instance...\n\
         \nERROR: failed waiting for packer to exit: wait interrupted"
    );
    assert!(templates_in(tmp.path()).is_empty());
}

#[tokio::test]
async fn unknown_profile_fails_without_running_packer() {
    let tmp = TempDir::new().unwrap();
    let supervisor = Arc::new(ScriptedSupervisor::exit(0, &[]));
    let (orchestrator, store) = orchestrator(Arc::clone(&supervisor), tmp.path());
    let request = store.create(&submission(fixed_request("GHOST"))).await.unwrap();

    let outcome = orchestrator.run(request.id).await;

    assert_eq!(outcome, RunOutcome::Finished(BuildStatus::Failed));
    let stored = store.get(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BuildStatus::Failed);
    assert_eq!(
        stored.packer_output,
        "ERROR: failed to resolve credentials for profile 'GHOST': \
         profile 'GHOST' not found in OCI config"
    );
    assert!(supervisor.invocations().is_empty());
    assert!(templates_in(tmp.path()).is_empty());
}

#[tokio::test]
async fn unwritable_work_dir_fails_without_running_packer() {
    let tmp = TempDir::new().unwrap();
    let blocker = tmp.path().join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();
    let supervisor = Arc::new(ScriptedSupervisor::exit(0, &[]));
    let (orchestrator, store) = orchestrator(Arc::clone(&supervisor), &blocker);
    let request = store.create(&submission(fixed_request("DEFAULT"))).await.unwrap();

    let outcome = orchestrator.run(request.id).await;

    assert_eq!(outcome, RunOutcome::Finished(BuildStatus::Failed));
    let stored = store.get(request.id).await.unwrap().unwrap();
    assert!(
        stored.packer_output.starts_with("ERROR: failed to create template directory"),
        "{}",
        stored.packer_output
    );
    assert!(supervisor.invocations().is_empty());
}

// ── Claiming ──

#[tokio::test]
async fn missing_request_touches_nothing() {
    let tmp = TempDir::new().unwrap();
    let supervisor = Arc::new(ScriptedSupervisor::exit(0, &[]));
    let (orchestrator, store) = orchestrator(Arc::clone(&supervisor), tmp.path());

    let outcome = orchestrator.run(BuildId::new(404)).await;

    assert_eq!(outcome, RunOutcome::NotFound);
    assert!(store.list_all().await.unwrap().is_empty());
    assert!(supervisor.invocations().is_empty());
    assert!(templates_in(tmp.path()).is_empty());
}

#[tokio::test]
async fn finished_request_is_not_rebuilt() {
    let tmp = TempDir::new().unwrap();
    let supervisor = Arc::new(ScriptedSupervisor::exit(1, &["first run"]));
    let (orchestrator, store) = orchestrator(Arc::clone(&supervisor), tmp.path());
    let request = store.create(&submission(fixed_request("DEFAULT"))).await.unwrap();
    orchestrator.run(request.id).await;

    let second = orchestrator.run(request.id).await;

    assert_eq!(second, RunOutcome::Skipped(BuildStatus::Failed));
    assert_eq!(supervisor.invocations().len(), 1);
    assert_eq!(
        store.get(request.id).await.unwrap().unwrap().packer_output,
        "first run\n"
    );
}

#[tokio::test]
async fn building_request_is_skipped() {
    let tmp = TempDir::new().unwrap();
    let supervisor = Arc::new(ScriptedSupervisor::exit(0, &[]));
    let (orchestrator, store) = orchestrator(Arc::clone(&supervisor), tmp.path());
    let request = store.create(&submission(fixed_request("DEFAULT"))).await.unwrap();
    store
        .update(request.id, BuildUpdate::status(BuildStatus::Building))
        .await
        .unwrap();

    let outcome = orchestrator.run(request.id).await;

    assert_eq!(outcome, RunOutcome::Skipped(BuildStatus::Building));
    assert!(supervisor.invocations().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_build_once() {
    let tmp = TempDir::new().unwrap();
    let supervisor =
        Arc::new(ScriptedSupervisor::exit(0, &["ok"]).with_delay(Duration::from_millis(50)));
    let (orchestrator, store) = orchestrator(Arc::clone(&supervisor), tmp.path());
    let request = store.create(&submission(fixed_request("DEFAULT"))).await.unwrap();

    let handles: Vec<_> = (0..6).map(|_| orchestrator.spawn(request.id)).collect();
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.wait().await);
    }

    let finished = outcomes
        .iter()
        .filter(|o| **o == RunOutcome::Finished(BuildStatus::Completed))
        .count();
    assert_eq!(finished, 1, "{outcomes:?}");
    assert!(
        outcomes
            .iter()
            .all(|o| matches!(o, RunOutcome::Finished(_) | RunOutcome::Skipped(_)))
    );
    assert_eq!(supervisor.invocations().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_builds_use_separate_templates() {
    let tmp = TempDir::new().unwrap();
    let supervisor =
        Arc::new(ScriptedSupervisor::exit(0, &[]).with_delay(Duration::from_millis(20)));
    let (orchestrator, store) = orchestrator(Arc::clone(&supervisor), tmp.path());

    let mut handles = Vec::new();
    for _ in 0..4 {
        let request = store.create(&submission(fixed_request("DEFAULT"))).await.unwrap();
        handles.push(orchestrator.spawn(request.id));
    }
    for handle in handles {
        assert_eq!(
            handle.wait().await,
            RunOutcome::Finished(BuildStatus::Completed)
        );
    }

    let mut paths: Vec<String> = supervisor
        .invocations()
        .into_iter()
        .map(|call| call.args[2].clone())
        .collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 4);
    assert!(templates_in(tmp.path()).is_empty());
}

// ── Render ──

#[tokio::test]
async fn render_leaves_state_untouched() {
    let tmp = TempDir::new().unwrap();
    let supervisor = Arc::new(ScriptedSupervisor::exit(0, &[]));
    let (orchestrator, store) = orchestrator(Arc::clone(&supervisor), tmp.path());
    let request = store.create(&submission(fixed_request("DEFAULT"))).await.unwrap();

    let json = orchestrator.render(&request).unwrap();

    let expected_name = format!(
        "custom-image-build-{}-{}",
        request.id,
        request.created_at.format("%Y%m%d%H%M%S")
    );
    assert!(json.contains(&expected_name));
    assert!(!json.contains("shape_config"));
    assert_eq!(
        store.get(request.id).await.unwrap().unwrap().status,
        BuildStatus::Queued
    );
    assert!(templates_in(tmp.path()).is_empty());
    assert!(supervisor.invocations().is_empty());
}
