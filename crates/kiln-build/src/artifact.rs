use std::path::{Path, PathBuf};

use kiln_core::BuildId;

use crate::template::{PackerTemplate, TemplateError};

/// A rendered template on disk for the duration of one packer run.
///
/// The file is named after the build id so concurrent builds never share a
/// path. Call [`remove`](Self::remove) when packer exits; if the guard is
/// dropped first (early return, panic) the file is removed on drop.
#[derive(Debug)]
pub struct TransientConfig {
    path: PathBuf,
    removed: bool,
}

impl TransientConfig {
    /// Where the template for `id` lives inside `dir`.
    pub fn path_for(dir: &Path, id: BuildId) -> PathBuf {
        dir.join(format!("build-{id}.pkr.json"))
    }

    /// Render `template` and write it to [`path_for`](Self::path_for).
    ///
    /// A leftover file from an interrupted run with the same id is overwritten.
    pub fn write(
        dir: &Path,
        id: BuildId,
        template: &PackerTemplate,
    ) -> Result<Self, ArtifactError> {
        let json = template
            .to_json()
            .map_err(|e| ArtifactError::Render { source: e })?;

        std::fs::create_dir_all(dir).map_err(|e| ArtifactError::CreateDir {
            path: dir.to_path_buf(),
            source: e,
        })?;

        // Guard first, so a partially written file is removed on failure.
        let artifact = Self {
            path: Self::path_for(dir, id),
            removed: false,
        };
        std::fs::write(&artifact.path, json).map_err(|e| ArtifactError::Write {
            path: artifact.path.clone(),
            source: e,
        })?;
        tracing::debug!(path = %artifact.path.display(), "wrote packer template");

        Ok(artifact)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file. A file that is already gone counts as removed.
    pub fn remove(mut self) -> Result<(), ArtifactError> {
        self.removed = true;
        remove_if_present(&self.path)
    }
}

impl Drop for TransientConfig {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = remove_if_present(&self.path) {
            tracing::warn!(error = %e, "failed to remove packer template on drop");
        }
    }
}

fn remove_if_present(path: &Path) -> Result<(), ArtifactError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed packer template");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ArtifactError::Remove {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("failed to render packer template")]
    Render { source: TemplateError },

    #[error("failed to create template directory {path}")]
    CreateDir { path: PathBuf, source: std::io::Error },

    #[error("failed to write packer template {path}")]
    Write { path: PathBuf, source: std::io::Error },

    #[error("failed to remove packer template {path}")]
    Remove { path: PathBuf, source: std::io::Error },
}
