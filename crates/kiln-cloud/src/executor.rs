use async_trait::async_trait;

use crate::oci::OciError;

/// Abstraction over oci CLI execution for testability.
///
/// Production code uses [`RealExecutor`], tests use mockall-generated mocks.
#[async_trait]
pub trait OciExecutor: Send + Sync {
    /// Execute an oci command and capture stdout.
    async fn exec(&self, args: &[String]) -> Result<String, OciError>;
}

/// Real oci CLI executor.
pub struct RealExecutor {
    binary: String,
}

impl RealExecutor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for RealExecutor {
    fn default() -> Self {
        Self::new("oci")
    }
}

#[async_trait]
impl OciExecutor for RealExecutor {
    async fn exec(&self, args: &[String]) -> Result<String, OciError> {
        use std::process::Stdio;

        let output = tokio::process::Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| OciError::NotFound { source: e })?;

        if output.status.success() {
            String::from_utf8(output.stdout).map_err(|e| OciError::InvalidUtf8 { source: e })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Err(OciError::CommandFailed {
                args: args.to_vec(),
                stderr,
            })
        }
    }
}
