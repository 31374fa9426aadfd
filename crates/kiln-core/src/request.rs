//! Build request model and submission validation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The only provider kiln builds for.
pub const CLOUD_PROVIDER: &str = "OCI";

/// Substring that marks a shape as flexible (custom OCPU/memory sizing).
pub const FLEX_SHAPE_MARKER: &str = "Flex";

/// Whether `shape` belongs to the flexible shape family.
///
/// ```
/// use kiln_core::is_flex_shape;
///
/// assert!(is_flex_shape("VM.Standard.E4.Flex"));
/// assert!(!is_flex_shape("VM.Standard2.1"));
/// ```
pub fn is_flex_shape(shape: &str) -> bool {
    shape.contains(FLEX_SHAPE_MARKER)
}

/// Store-assigned identifier of a build request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(i64);

impl BuildId {
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for BuildId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Lifecycle of a build request.
///
/// Valid transitions are `Queued → Building → {Completed, Failed}`; the
/// terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildStatus {
    Queued,
    Building,
    Completed,
    Failed,
}

impl BuildStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Building => "Building",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Building)
                | (Self::Building, Self::Completed)
                | (Self::Building, Self::Failed)
        )
    }

    /// States from which `self` may be entered.
    pub fn predecessors(self) -> &'static [BuildStatus] {
        match self {
            Self::Queued => &[],
            Self::Building => &[Self::Queued],
            Self::Completed | Self::Failed => &[Self::Building],
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown build status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for BuildStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Queued" => Ok(Self::Queued),
            "Building" => Ok(Self::Building),
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_owned())),
        }
    }
}

/// Custom sizing for a flexible shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeSizing {
    pub ocpus: u32,
    pub memory_in_gbs: u32,
}

/// A persisted build request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub id: BuildId,
    pub created_at: DateTime<Utc>,
    pub cloud_provider: String,
    pub profile: String,
    pub base_image: String,
    /// One package per line
    pub packages: String,
    pub shape: String,
    pub ocpus: Option<u32>,
    pub memory_in_gbs: Option<u32>,
    pub status: BuildStatus,
    pub packer_output: String,
}

impl BuildRequest {
    /// A freshly created record for a validated submission.
    pub fn queued(id: BuildId, created_at: DateTime<Utc>, submission: &BuildSubmission) -> Self {
        Self {
            id,
            created_at,
            cloud_provider: submission.cloud_provider.clone(),
            profile: submission.profile.clone(),
            base_image: submission.base_image.clone(),
            packages: submission.packages.clone(),
            shape: submission.shape.clone(),
            ocpus: submission.sizing.map(|s| s.ocpus),
            memory_in_gbs: submission.sizing.map(|s| s.memory_in_gbs),
            status: BuildStatus::Queued,
            packer_output: String::new(),
        }
    }

    /// Package names in submission order, blank lines skipped.
    pub fn package_list(&self) -> Vec<&str> {
        package_lines(&self.packages).collect()
    }

    /// Sizing block for flexible shapes; `None` for fixed shapes.
    pub fn shape_sizing(&self) -> Option<ShapeSizing> {
        if !is_flex_shape(&self.shape) {
            return None;
        }
        match (self.ocpus, self.memory_in_gbs) {
            (Some(ocpus), Some(memory_in_gbs)) => Some(ShapeSizing {
                ocpus,
                memory_in_gbs,
            }),
            _ => None,
        }
    }
}

/// Status change applied through the request store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildUpdate {
    pub status: BuildStatus,
    /// Replaces the stored log when set
    pub packer_output: Option<String>,
}

impl BuildUpdate {
    pub fn status(status: BuildStatus) -> Self {
        Self {
            status,
            packer_output: None,
        }
    }

    pub fn finished(status: BuildStatus, packer_output: String) -> Self {
        Self {
            status,
            packer_output: Some(packer_output),
        }
    }
}

/// An unvalidated submission, as received from a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBuildRequest {
    #[serde(default = "default_cloud_provider")]
    pub cloud_provider: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub base_image: String,
    /// Free text, one package per line
    #[serde(default)]
    pub packages: String,
    #[serde(default)]
    pub shape: String,
    #[serde(default)]
    pub ocpus: Option<u32>,
    #[serde(default)]
    pub memory_in_gbs: Option<u32>,
}

impl Default for NewBuildRequest {
    fn default() -> Self {
        Self {
            cloud_provider: default_cloud_provider(),
            profile: String::new(),
            base_image: String::new(),
            packages: String::new(),
            shape: String::new(),
            ocpus: None,
            memory_in_gbs: None,
        }
    }
}

/// A submission that passed [`NewBuildRequest::validate`].
///
/// Cannot be built by hand outside this crate, so every stored request has
/// gone through validation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct BuildSubmission {
    pub cloud_provider: String,
    pub profile: String,
    pub base_image: String,
    pub packages: String,
    pub shape: String,
    pub sizing: Option<ShapeSizing>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("unsupported cloud provider '{0}' (only OCI is supported)")]
    UnsupportedProvider(String),

    #[error("shape '{shape}' is flexible and requires ocpus and memory_in_gbs")]
    SizingRequired { shape: String },

    #[error("shape '{shape}' is not flexible; ocpus and memory_in_gbs must be omitted")]
    SizingNotAllowed { shape: String },

    #[error("{0} must be greater than zero")]
    ZeroSizing(&'static str),
}

impl NewBuildRequest {
    pub fn validate(self) -> Result<BuildSubmission, ValidationError> {
        let cloud_provider = self.cloud_provider.trim();
        if cloud_provider.is_empty() {
            return Err(ValidationError::MissingField("cloud_provider"));
        }
        if !cloud_provider.eq_ignore_ascii_case(CLOUD_PROVIDER) {
            return Err(ValidationError::UnsupportedProvider(cloud_provider.to_owned()));
        }

        let profile = non_blank(&self.profile, "profile")?;
        let base_image = non_blank(&self.base_image, "base_image")?;
        let shape = non_blank(&self.shape, "shape")?;

        let packages = package_lines(&self.packages).collect::<Vec<_>>().join("\n");
        if packages.is_empty() {
            return Err(ValidationError::MissingField("packages"));
        }

        let sizing = match (is_flex_shape(&shape), self.ocpus, self.memory_in_gbs) {
            (true, Some(ocpus), Some(memory_in_gbs)) => {
                if ocpus == 0 {
                    return Err(ValidationError::ZeroSizing("ocpus"));
                }
                if memory_in_gbs == 0 {
                    return Err(ValidationError::ZeroSizing("memory_in_gbs"));
                }
                Some(ShapeSizing {
                    ocpus,
                    memory_in_gbs,
                })
            }
            (true, _, _) => return Err(ValidationError::SizingRequired { shape }),
            (false, None, None) => None,
            (false, _, _) => return Err(ValidationError::SizingNotAllowed { shape }),
        };

        Ok(BuildSubmission {
            cloud_provider: CLOUD_PROVIDER.to_owned(),
            profile,
            base_image,
            packages,
            shape,
            sizing,
        })
    }
}

fn non_blank(value: &str, field: &'static str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ValidationError::MissingField(field))
    } else {
        Ok(trimmed.to_owned())
    }
}

fn package_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|line| !line.is_empty())
}

fn default_cloud_provider() -> String {
    CLOUD_PROVIDER.to_owned()
}
