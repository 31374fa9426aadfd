//! Provider context passed explicitly into template generation.

use std::path::PathBuf;

/// Where the build instance is placed inside the tenancy.
///
/// Built once from [`KilnConfig::network_context`](crate::KilnConfig::network_context)
/// and shared read-only by every build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkContext {
    pub availability_domain: String,
    pub compartment_ocid: String,
    pub subnet_ocid: String,
}

/// API-key credentials for one OCI config profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciCredentials {
    pub tenancy: String,
    pub user: String,
    pub key_file: PathBuf,
    pub fingerprint: String,
    pub region: Option<String>,
}

/// Resolves a profile name into credentials.
///
/// Production code reads the OCI config file (see `kiln-cloud`); tests
/// substitute fixed maps.
pub trait CredentialSource: Send + Sync {
    fn resolve(&self, profile: &str) -> Result<OciCredentials, CredentialError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("failed to read OCI config file {path}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed OCI config at line {line}: {reason}")]
    Malformed { line: usize, reason: &'static str },

    #[error("profile '{0}' not found in OCI config")]
    UnknownProfile(String),

    #[error("profile '{profile}' is missing required key '{key}'")]
    MissingKey { profile: String, key: &'static str },
}
