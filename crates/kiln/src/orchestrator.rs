//! Drives one build request from `Queued` to a terminal status.

use std::path::PathBuf;
use std::sync::Arc;

use kiln_build::{TemplateError, TemplateGenerator, TemplateSettings, TransientConfig};
use kiln_cloud::ProcessSupervisor;
use kiln_core::{
    BuildId, BuildRequest, BuildStatus, BuildUpdate, CredentialSource, NetworkContext,
    PackerConfig,
};
use kiln_store::{RequestStore, StoreError};
use tokio::sync::oneshot;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

/// Where and how packer is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackerSettings {
    pub binary: String,
    /// Directory receiving `build-<id>.pkr.json` while a build runs
    pub work_dir: PathBuf,
}

impl From<&PackerConfig> for PackerSettings {
    fn from(config: &PackerConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            work_dir: config.work_dir.clone(),
        }
    }
}

impl Default for PackerSettings {
    fn default() -> Self {
        Self::from(&PackerConfig::default())
    }
}

/// How a single orchestrator run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No request with that id exists; nothing was touched.
    NotFound,
    /// The request was not `Queued`, or another run claimed it first.
    Skipped(BuildStatus),
    /// The run finished and the terminal status was persisted.
    Finished(BuildStatus),
    /// The store failed mid-run; the message says where.
    Aborted(String),
}

/// Completion handle for a spawned build.
///
/// Dropping it does not affect the build.
#[derive(Debug)]
pub struct BuildHandle {
    id: BuildId,
    completion: oneshot::Receiver<RunOutcome>,
}

impl BuildHandle {
    pub fn id(&self) -> BuildId {
        self.id
    }

    /// Wait for the build to reach a terminal state (or be skipped).
    pub async fn wait(self) -> RunOutcome {
        let id = self.id;
        self.completion.await.unwrap_or_else(|e| {
            RunOutcome::Aborted(format!("build {id} task ended without reporting: {e}"))
        })
    }
}

pub struct Orchestrator {
    store: Arc<dyn RequestStore>,
    credentials: Arc<dyn CredentialSource>,
    supervisor: Arc<dyn ProcessSupervisor>,
    network: NetworkContext,
    template: TemplateSettings,
    packer: PackerSettings,
    tasks: TaskTracker,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RequestStore>,
        credentials: Arc<dyn CredentialSource>,
        supervisor: Arc<dyn ProcessSupervisor>,
        network: NetworkContext,
    ) -> Self {
        Self {
            store,
            credentials,
            supervisor,
            network,
            template: TemplateSettings::default(),
            packer: PackerSettings::default(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn template_settings(mut self, template: TemplateSettings) -> Self {
        self.template = template;
        self
    }

    pub fn packer_settings(mut self, packer: PackerSettings) -> Self {
        self.packer = packer;
        self
    }

    pub fn store(&self) -> &Arc<dyn RequestStore> {
        &self.store
    }

    pub fn network(&self) -> &NetworkContext {
        &self.network
    }

    /// Run the build for `id` on its own task.
    ///
    /// The task is tracked until it finishes; see [`shutdown`](Self::shutdown).
    pub fn spawn(self: &Arc<Self>, id: BuildId) -> BuildHandle {
        let (tx, rx) = oneshot::channel();
        let orchestrator = Arc::clone(self);
        self.tasks.spawn(async move {
            let outcome = orchestrator.run(id).await;
            if tx.send(outcome).is_err() {
                tracing::trace!(build_id = %id, "build handle dropped before completion");
            }
        });
        BuildHandle {
            id,
            completion: rx,
        }
    }

    /// Wait for every spawned build to reach its outcome.
    pub async fn shutdown(&self) {
        self.tasks.close();
        if !self.tasks.is_empty() {
            tracing::info!(running = self.tasks.len(), "waiting for running builds");
        }
        self.tasks.wait().await;
    }

    /// Run the build for `id` to completion on the current task.
    pub async fn run(&self, id: BuildId) -> RunOutcome {
        self.drive(id)
            .instrument(tracing::info_span!("build", build_id = %id))
            .await
    }

    /// Render the template `request` would build with, without running anything.
    pub fn render(&self, request: &BuildRequest) -> Result<String, TemplateError> {
        TemplateGenerator::new(&self.template, &self.network)
            .resolve_and_generate(request, self.credentials.as_ref())?
            .to_json()
    }

    async fn drive(&self, id: BuildId) -> RunOutcome {
        let request = match self.store.get(id).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                tracing::warn!("build request not found");
                return RunOutcome::NotFound;
            }
            Err(e) => return aborted("failed to load build request", &e),
        };

        if request.status != BuildStatus::Queued {
            tracing::info!(status = %request.status, "build request is not queued; skipping");
            return RunOutcome::Skipped(request.status);
        }

        let request = match self
            .store
            .update(id, BuildUpdate::status(BuildStatus::Building))
            .await
        {
            Ok(request) => request,
            Err(StoreError::InvalidTransition { from, .. }) => {
                tracing::info!(status = %from, "build request claimed by another run; skipping");
                return RunOutcome::Skipped(from);
            }
            Err(e) => return aborted("failed to mark build as building", &e),
        };
        tracing::info!(profile = %request.profile, shape = %request.shape, "build started");

        let (status, output) = self.execute(&request).await;
        self.reconcile(id, status, output).await
    }

    /// Generate, write, and run. Never fails: every error becomes a `Failed`
    /// status with the error text as output.
    async fn execute(&self, request: &BuildRequest) -> (BuildStatus, String) {
        let template = match TemplateGenerator::new(&self.template, &self.network)
            .resolve_and_generate(request, self.credentials.as_ref())
        {
            Ok(template) => template,
            Err(e) => {
                let message = error_chain(&e);
                tracing::warn!(error = %message, "template generation failed");
                return (BuildStatus::Failed, format!("ERROR: {message}"));
            }
        };

        let artifact = match TransientConfig::write(&self.packer.work_dir, request.id, &template) {
            Ok(artifact) => artifact,
            Err(e) => {
                let message = error_chain(&e);
                tracing::warn!(error = %message, "failed to write packer template");
                return (BuildStatus::Failed, format!("ERROR: {message}"));
            }
        };

        let args = vec![
            "build".to_owned(),
            "-force".to_owned(),
            artifact.path().display().to_string(),
        ];
        let sink = |line: &str| tracing::info!(target: "kiln::packer", "{line}");
        let result = self.supervisor.run(&self.packer.binary, &args, &sink).await;

        if let Err(e) = artifact.remove() {
            tracing::warn!(error = %error_chain(&e), "failed to remove packer template");
        }

        match result {
            Ok(outcome) => {
                tracing::info!(exit_code = ?outcome.exit_code, "packer exited");
                let status = if outcome.success() {
                    BuildStatus::Completed
                } else {
                    BuildStatus::Failed
                };
                (status, outcome.output)
            }
            Err(e) => {
                let message = error_chain(&e);
                tracing::error!(error = %message, "failed to run packer");
                (BuildStatus::Failed, format!("{}\nERROR: {message}", e.output()))
            }
        }
    }

    async fn reconcile(&self, id: BuildId, status: BuildStatus, output: String) -> RunOutcome {
        match self.store.get(id).await {
            Ok(Some(current)) if current.status == BuildStatus::Building => {}
            Ok(Some(current)) => {
                let message = format!("build {id} left Building during the run ({})", current.status);
                tracing::error!("{message}");
                return RunOutcome::Aborted(message);
            }
            Ok(None) => {
                let message = format!("build {id} disappeared during the run");
                tracing::error!("{message}");
                return RunOutcome::Aborted(message);
            }
            Err(e) => return aborted("failed to reload build request", &e),
        }

        match self
            .store
            .update(id, BuildUpdate::finished(status, output))
            .await
        {
            Ok(_) => {
                tracing::info!(%status, "build finished");
                RunOutcome::Finished(status)
            }
            Err(e) => aborted("failed to record build result", &e),
        }
    }
}

fn aborted(context: &str, error: &StoreError) -> RunOutcome {
    let message = format!("{context}: {}", error_chain(error));
    tracing::error!(error = %message, "build aborted");
    RunOutcome::Aborted(message)
}

/// `error` followed by each of its sources, separated by `: `.
pub(crate) fn error_chain(error: &dyn std::error::Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
