//! OCI config file parsing.
//!
//! The file is INI-style. Every `[PROFILE]` section inherits keys from the
//! `[DEFAULT]` section and overrides them key by key. Keys are
//! case-insensitive. Lines starting with `#` or `;` are comments.
//!
//! ```text
//! [DEFAULT]
//! tenancy=ocid1.tenancy.oc1..aaaa
//! region=us-phoenix-1
//!
//! [BUILDER]
//! user=ocid1.user.oc1..bbbb
//! fingerprint=12:34:...
//! key_file=~/.oci/builder.pem
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kiln_core::{CredentialError, CredentialSource, OciCredentials, expand_home};

pub const DEFAULT_PROFILE: &str = "DEFAULT";

type Section = BTreeMap<String, String>;

/// A parsed OCI config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OciConfigFile {
    defaults: Option<Section>,
    profiles: Vec<(String, Section)>,
}

impl OciConfigFile {
    pub fn load(path: &Path) -> Result<Self, CredentialError> {
        let text = std::fs::read_to_string(path).map_err(|e| CredentialError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, CredentialError> {
        let mut config = Self::default();
        let mut current: Option<Section> = None;
        let mut current_name: Option<String> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(header) = line.strip_prefix('[') {
                let name = header
                    .strip_suffix(']')
                    .ok_or(CredentialError::Malformed {
                        line: line_no,
                        reason: "unterminated section header",
                    })?
                    .trim();
                if name.is_empty() {
                    return Err(CredentialError::Malformed {
                        line: line_no,
                        reason: "empty section name",
                    });
                }
                if let (Some(prev), Some(section)) = (current_name.take(), current.take()) {
                    config.insert(prev, section);
                }
                if config.contains(name) {
                    return Err(CredentialError::Malformed {
                        line: line_no,
                        reason: "duplicate section",
                    });
                }
                current_name = Some(name.to_owned());
                current = Some(Section::new());
                continue;
            }

            let Some(section) = current.as_mut() else {
                return Err(CredentialError::Malformed {
                    line: line_no,
                    reason: "key outside of a section",
                });
            };
            let (key, value) = line.split_once('=').ok_or(CredentialError::Malformed {
                line: line_no,
                reason: "expected key=value",
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(CredentialError::Malformed {
                    line: line_no,
                    reason: "empty key",
                });
            }
            section.insert(key.to_ascii_lowercase(), value.trim().to_owned());
        }

        if let (Some(name), Some(section)) = (current_name, current) {
            config.insert(name, section);
        }
        Ok(config)
    }

    fn insert(&mut self, name: String, section: Section) {
        if name == DEFAULT_PROFILE {
            self.defaults = Some(section);
        } else {
            self.profiles.push((name, section));
        }
    }

    fn contains(&self, name: &str) -> bool {
        if name == DEFAULT_PROFILE {
            self.defaults.is_some()
        } else {
            self.profiles.iter().any(|(n, _)| n == name)
        }
    }

    /// Named profiles in file order. `DEFAULT` is listed only when it is the
    /// sole section.
    pub fn profiles(&self) -> Vec<String> {
        if self.profiles.is_empty() {
            return self
                .defaults
                .as_ref()
                .map(|_| vec![DEFAULT_PROFILE.to_owned()])
                .unwrap_or_default();
        }
        self.profiles.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Credentials for `profile`, with `DEFAULT` keys filled in.
    pub fn credentials(&self, profile: &str) -> Result<OciCredentials, CredentialError> {
        let mut merged = self.defaults.clone().unwrap_or_default();
        if profile == DEFAULT_PROFILE {
            if self.defaults.is_none() {
                return Err(CredentialError::UnknownProfile(profile.to_owned()));
            }
        } else {
            let (_, section) = self
                .profiles
                .iter()
                .find(|(name, _)| name == profile)
                .ok_or_else(|| CredentialError::UnknownProfile(profile.to_owned()))?;
            merged.extend(section.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let require = |key: &'static str| {
            merged
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| CredentialError::MissingKey {
                    profile: profile.to_owned(),
                    key,
                })
        };

        Ok(OciCredentials {
            tenancy: require("tenancy")?,
            user: require("user")?,
            key_file: expand_home(Path::new(&require("key_file")?)),
            fingerprint: require("fingerprint")?,
            region: merged.get("region").filter(|v| !v.is_empty()).cloned(),
        })
    }
}

/// [`CredentialSource`] that re-reads the OCI config file on every lookup,
/// so edits take effect without a restart.
#[derive(Debug, Clone)]
pub struct OciConfigSource {
    path: PathBuf,
}

impl OciConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn profiles(&self) -> Result<Vec<String>, CredentialError> {
        Ok(OciConfigFile::load(&self.path)?.profiles())
    }
}

impl CredentialSource for OciConfigSource {
    fn resolve(&self, profile: &str) -> Result<OciCredentials, CredentialError> {
        OciConfigFile::load(&self.path)?.credentials(profile)
    }
}
