use std::path::PathBuf;

use async_trait::async_trait;
use kiln_core::CredentialError;
use serde::{Deserialize, Serialize};

use crate::credentials::OciConfigFile;
use crate::executor::{OciExecutor, RealExecutor};
use crate::oci::OciError;

/// A bootable image offered for a compartment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub id: String,
    pub display_name: String,
}

/// Read-only provider lookups used to populate submission choices.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Profiles available in the OCI config file.
    async fn list_profiles(&self) -> Result<Vec<String>, DirectoryError>;

    /// Available images, sorted by display name.
    async fn list_images(
        &self,
        compartment_id: &str,
        profile: &str,
    ) -> Result<Vec<ImageSummary>, DirectoryError>;

    /// Shape names, sorted and deduplicated.
    async fn list_shapes(
        &self,
        compartment_id: &str,
        profile: &str,
    ) -> Result<Vec<String>, DirectoryError>;
}

/// Directory backed by the oci CLI, parameterized over the executor for testability.
pub struct OciDirectory<E: OciExecutor = RealExecutor> {
    executor: E,
    config_file: PathBuf,
    operating_system: String,
}

impl OciDirectory<RealExecutor> {
    pub fn new(cli_binary: &str, config_file: impl Into<PathBuf>) -> Self {
        Self::with_executor(RealExecutor::new(cli_binary), config_file)
    }
}

impl<E: OciExecutor> OciDirectory<E> {
    pub fn with_executor(executor: E, config_file: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            config_file: config_file.into(),
            operating_system: "Oracle Linux".to_owned(),
        }
    }

    /// Restrict image listings to another operating system.
    pub fn operating_system(mut self, operating_system: impl Into<String>) -> Self {
        self.operating_system = operating_system.into();
        self
    }

    fn common_args(&self, compartment_id: &str, profile: &str) -> Vec<String> {
        args([
            "--compartment-id",
            compartment_id,
            "--config-file",
            &self.config_file.display().to_string(),
            "--profile",
            profile,
            "--all",
            "--output",
            "json",
        ])
    }
}

#[async_trait]
impl<E: OciExecutor> DirectoryService for OciDirectory<E> {
    async fn list_profiles(&self) -> Result<Vec<String>, DirectoryError> {
        let config = OciConfigFile::load(&self.config_file)
            .map_err(|e| DirectoryError::Profiles { source: e })?;
        Ok(config.profiles())
    }

    async fn list_images(
        &self,
        compartment_id: &str,
        profile: &str,
    ) -> Result<Vec<ImageSummary>, DirectoryError> {
        let mut cmd = args(["compute", "image", "list"]);
        cmd.extend(self.common_args(compartment_id, profile));
        cmd.extend(args([
            "--operating-system",
            &self.operating_system,
            "--lifecycle-state",
            "AVAILABLE",
            "--sort-by",
            "DISPLAYNAME",
        ]));

        let output = self
            .executor
            .exec(&cmd)
            .await
            .map_err(|e| DirectoryError::Images { source: e })?;

        let mut images: Vec<ImageSummary> = parse_data::<ImageRow>(&output)?
            .into_iter()
            .map(|row| ImageSummary {
                id: row.id,
                display_name: row.display_name,
            })
            .collect();
        images.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(images)
    }

    async fn list_shapes(
        &self,
        compartment_id: &str,
        profile: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        let mut cmd = args(["compute", "shape", "list"]);
        cmd.extend(self.common_args(compartment_id, profile));

        let output = self
            .executor
            .exec(&cmd)
            .await
            .map_err(|e| DirectoryError::Shapes { source: e })?;

        let mut shapes: Vec<String> = parse_data::<ShapeRow>(&output)?
            .into_iter()
            .map(|row| row.shape)
            .collect();
        shapes.sort();
        shapes.dedup();
        Ok(shapes)
    }
}

// ── oci CLI JSON ──

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ImageRow {
    id: String,
    display_name: String,
}

#[derive(Deserialize)]
struct ShapeRow {
    shape: String,
}

/// The oci CLI prints nothing at all when a list is empty.
fn parse_data<T: serde::de::DeserializeOwned>(output: &str) -> Result<Vec<T>, DirectoryError> {
    if output.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str::<Envelope<T>>(output)
        .map(|envelope| envelope.data)
        .map_err(|e| DirectoryError::Decode { source: e })
}

fn args<const N: usize>(a: [&str; N]) -> Vec<String> {
    a.iter().map(|s| (*s).to_owned()).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("failed to list profiles")]
    Profiles { source: CredentialError },

    #[error("failed to list images")]
    Images { source: OciError },

    #[error("failed to list shapes")]
    Shapes { source: OciError },

    #[error("failed to decode oci CLI output")]
    Decode { source: serde_json::Error },
}
