use kiln::{BuildStatus, NewBuildRequest, RunOutcome};

/// Submit `request` and wait for its build to finish.
pub async fn submit(request: NewBuildRequest) -> anyhow::Result<()> {
    let config = super::load_config()?;
    let service = super::build_service(&config).await?;

    let handle = service.submit(request).await?;
    let id = handle.id();
    println!("Submitted build {id}");

    match handle.wait().await {
        RunOutcome::Finished(BuildStatus::Completed) => {
            println!("Build {id} completed");
            Ok(())
        }
        RunOutcome::Finished(status) => {
            if let Some(build) = service.get_build(id).await? {
                if !build.packer_output.is_empty() {
                    eprintln!("{}", build.packer_output.trim_end());
                }
            }
            anyhow::bail!("build {id} {}", status.as_str().to_lowercase())
        }
        RunOutcome::Skipped(status) => anyhow::bail!("build {id} was skipped (status {status})"),
        RunOutcome::NotFound => anyhow::bail!("build {id} disappeared before it started"),
        RunOutcome::Aborted(reason) => anyhow::bail!("build {id} aborted: {reason}"),
    }
}
