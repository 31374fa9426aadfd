use std::sync::Arc;

use kiln_build::TemplateError;
use kiln_cloud::{DirectoryService, ImageSummary};
use kiln_core::{BuildId, BuildRequest, NewBuildRequest, ValidationError};
use kiln_store::StoreError;

use crate::orchestrator::{BuildHandle, Orchestrator, error_chain};

/// Caller-facing operations shared by the HTTP API and the CLI.
pub struct BuildService {
    orchestrator: Arc<Orchestrator>,
    directory: Arc<dyn DirectoryService>,
}

impl BuildService {
    pub fn new(orchestrator: Arc<Orchestrator>, directory: Arc<dyn DirectoryService>) -> Self {
        Self {
            orchestrator,
            directory,
        }
    }

    /// Validate and persist `request`, then start building it in the background.
    ///
    /// Validation failures are returned before anything is stored.
    pub async fn submit(&self, request: NewBuildRequest) -> Result<BuildHandle, ServiceError> {
        let submission = request.validate()?;
        let created = self
            .orchestrator
            .store()
            .create(&submission)
            .await
            .map_err(|e| ServiceError::Store { source: e })?;
        tracing::info!(build_id = %created.id, shape = %created.shape, "build submitted");
        Ok(self.orchestrator.spawn(created.id))
    }

    /// Wait for submitted builds to finish. Call before the runtime stops so
    /// no packer process is killed mid-build.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
    }

    /// Every build, newest first.
    pub async fn list_builds(&self) -> Result<Vec<BuildRequest>, ServiceError> {
        self.orchestrator
            .store()
            .list_all()
            .await
            .map_err(|e| ServiceError::Store { source: e })
    }

    pub async fn get_build(&self, id: BuildId) -> Result<Option<BuildRequest>, ServiceError> {
        self.orchestrator
            .store()
            .get(id)
            .await
            .map_err(|e| ServiceError::Store { source: e })
    }

    /// The packer template build `id` would run with, as JSON.
    pub async fn render(&self, id: BuildId) -> Result<String, ServiceError> {
        let request = self
            .get_build(id)
            .await?
            .ok_or(ServiceError::NotFound(id))?;
        self.orchestrator
            .render(&request)
            .map_err(|e| ServiceError::Render { source: e })
    }

    pub async fn profiles(&self) -> Vec<String> {
        self.directory.list_profiles().await.unwrap_or_else(|e| {
            tracing::warn!(error = %error_chain(&e), "failed to list OCI profiles");
            Vec::new()
        })
    }

    pub async fn images(&self, profile: &str) -> Vec<ImageSummary> {
        let compartment = &self.orchestrator.network().compartment_ocid;
        self.directory
            .list_images(compartment, profile)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(profile, error = %error_chain(&e), "failed to list images");
                Vec::new()
            })
    }

    pub async fn shapes(&self, profile: &str) -> Vec<String> {
        let compartment = &self.orchestrator.network().compartment_ocid;
        self.directory
            .list_shapes(compartment, profile)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(profile, error = %error_chain(&e), "failed to list shapes");
                Vec::new()
            })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("build request {0} not found")]
    NotFound(BuildId),

    #[error("request store failed")]
    Store { source: StoreError },

    #[error("failed to render packer template")]
    Render { source: TemplateError },
}
