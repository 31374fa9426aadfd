use kiln_core::{
    BuildRequest, CredentialError, CredentialSource, NetworkContext, OciCredentials, PackerConfig,
    ShapeSizing,
};
use serde::{Deserialize, Serialize};

/// Name of the single source block every template declares.
pub const SOURCE_NAME: &str = "oci-base-image";

/// Fully-qualified reference to [`SOURCE_NAME`] used by the build block.
pub const SOURCE_REF: &str = "source.oracle-oci.oci-base-image";

/// Packer-side knobs that do not vary per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSettings {
    pub ssh_username: String,
    pub image_name_prefix: String,
    pub update_command: String,
    pub install_command: String,
    pub plugin_version: String,
    pub plugin_source: String,
}

impl From<&PackerConfig> for TemplateSettings {
    fn from(config: &PackerConfig) -> Self {
        Self {
            ssh_username: config.ssh_username.clone(),
            image_name_prefix: config.image_name_prefix.clone(),
            update_command: config.update_command.clone(),
            install_command: config.install_command.clone(),
            plugin_version: config.plugin_version.clone(),
            plugin_source: config.plugin_source.clone(),
        }
    }
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self::from(&PackerConfig::default())
    }
}

// ── Document ──
//
// Field order below is the key order of the rendered JSON.

/// A Packer JSON template (`.pkr.json`) for the oracle-oci builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackerTemplate {
    pub packer: PackerBlock,
    pub source: SourceBlock,
    pub build: BuildBlock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackerBlock {
    pub required_plugins: RequiredPlugins,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredPlugins {
    pub oracle: PluginRequirement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRequirement {
    pub version: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBlock {
    #[serde(rename = "oracle-oci")]
    pub oracle_oci: OracleOciSources,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleOciSources {
    #[serde(rename = "oci-base-image")]
    pub base_image: OracleOciSource,
}

/// The `oracle-oci` source: auth, placement, image and shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleOciSource {
    pub tenancy_ocid: String,
    pub user_ocid: String,
    pub key_file: String,
    pub fingerprint: String,
    pub availability_domain: String,
    pub compartment_ocid: String,
    pub subnet_ocid: String,
    pub base_image_ocid: String,
    pub image_name: String,
    pub shape: String,
    pub ssh_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape_config: Option<ShapeConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeConfig {
    pub ocpus: u32,
    pub memory_in_gbs: u32,
}

impl From<ShapeSizing> for ShapeConfig {
    fn from(sizing: ShapeSizing) -> Self {
        Self {
            ocpus: sizing.ocpus,
            memory_in_gbs: sizing.memory_in_gbs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildBlock {
    pub sources: Vec<String>,
    pub provisioner: Vec<Provisioner>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provisioner {
    pub shell: ShellProvisioner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellProvisioner {
    pub inline: Vec<String>,
}

impl PackerTemplate {
    pub fn source(&self) -> &OracleOciSource {
        &self.source.oracle_oci.base_image
    }

    /// Inline shell commands of the first provisioner.
    pub fn provisioning_commands(&self) -> &[String] {
        self.build
            .provisioner
            .first()
            .map(|p| p.shell.inline.as_slice())
            .unwrap_or_default()
    }

    /// Render as indented JSON with stable key order.
    pub fn to_json(&self) -> Result<String, TemplateError> {
        use serde_json::ser::{PrettyFormatter, Serializer};

        let mut buf = Vec::new();
        let mut serializer =
            Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
        self.serialize(&mut serializer)
            .map_err(|e| TemplateError::Serialize { source: e })?;
        buf.push(b'\n');
        String::from_utf8(buf).map_err(|e| TemplateError::Encoding { source: e })
    }
}

// ── Generator ──

/// Turns a build request into a [`PackerTemplate`].
pub struct TemplateGenerator<'a> {
    settings: &'a TemplateSettings,
    network: &'a NetworkContext,
}

impl<'a> TemplateGenerator<'a> {
    pub fn new(settings: &'a TemplateSettings, network: &'a NetworkContext) -> Self {
        Self { settings, network }
    }

    /// Resolve credentials for `request.profile`, then [`generate`](Self::generate).
    pub fn resolve_and_generate(
        &self,
        request: &BuildRequest,
        credentials: &dyn CredentialSource,
    ) -> Result<PackerTemplate, TemplateError> {
        let creds = credentials
            .resolve(&request.profile)
            .map_err(|e| TemplateError::Credentials {
                profile: request.profile.clone(),
                source: e,
            })?;
        Ok(self.generate(request, &creds))
    }

    pub fn generate(&self, request: &BuildRequest, creds: &OciCredentials) -> PackerTemplate {
        let source = OracleOciSource {
            tenancy_ocid: creds.tenancy.clone(),
            user_ocid: creds.user.clone(),
            key_file: creds.key_file.display().to_string(),
            fingerprint: creds.fingerprint.clone(),
            availability_domain: self.network.availability_domain.clone(),
            compartment_ocid: self.network.compartment_ocid.clone(),
            subnet_ocid: self.network.subnet_ocid.clone(),
            base_image_ocid: request.base_image.clone(),
            image_name: self.image_name(request),
            shape: request.shape.clone(),
            ssh_username: self.settings.ssh_username.clone(),
            shape_config: request.shape_sizing().map(ShapeConfig::from),
        };

        PackerTemplate {
            packer: PackerBlock {
                required_plugins: RequiredPlugins {
                    oracle: PluginRequirement {
                        version: self.settings.plugin_version.clone(),
                        source: self.settings.plugin_source.clone(),
                    },
                },
            },
            source: SourceBlock {
                oracle_oci: OracleOciSources { base_image: source },
            },
            build: BuildBlock {
                sources: vec![SOURCE_REF.to_owned()],
                provisioner: vec![Provisioner {
                    shell: ShellProvisioner {
                        inline: self.provisioning_commands(request),
                    },
                }],
            },
        }
    }

    /// `<prefix>-<id>-<created_at as %Y%m%d%H%M%S>`
    pub fn image_name(&self, request: &BuildRequest) -> String {
        format!(
            "{prefix}-{id}-{stamp}",
            prefix = self.settings.image_name_prefix,
            id = request.id,
            stamp = request.created_at.format("%Y%m%d%H%M%S"),
        )
    }

    /// The install command for the request's packages, or `None` when the list is empty.
    pub fn install_command(&self, request: &BuildRequest) -> Option<String> {
        let packages = request.package_list();
        if packages.is_empty() {
            None
        } else {
            Some(format!(
                "{} {}",
                self.settings.install_command,
                packages.join(" ")
            ))
        }
    }

    fn provisioning_commands(&self, request: &BuildRequest) -> Vec<String> {
        let mut commands = vec![self.settings.update_command.clone()];
        commands.extend(self.install_command(request));
        commands
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to resolve credentials for profile '{profile}'")]
    Credentials {
        profile: String,
        source: CredentialError,
    },

    #[error("failed to serialize packer template")]
    Serialize { source: serde_json::Error },

    #[error("packer template is not valid UTF-8")]
    Encoding { source: std::string::FromUtf8Error },
}
