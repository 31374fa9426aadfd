use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::context::NetworkContext;

/// kiln.toml configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KilnConfig {
    #[serde(default)]
    pub oci: OciConfig,
    #[serde(default)]
    pub packer: PackerConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OciConfig {
    /// OCI CLI/SDK config file holding the API-key profiles
    #[serde(default = "default_oci_config_file")]
    pub config_file: PathBuf,
    /// Compartment the build instance and resulting image live in
    pub compartment_ocid: Option<String>,
    /// Subnet the build instance attaches to
    pub subnet_ocid: Option<String>,
    /// Availability domain the build instance launches in
    pub availability_domain: Option<String>,
    /// OCI CLI executable used for directory lookups
    #[serde(default = "default_oci_cli")]
    pub cli_binary: String,
    /// Operating system filter for base image lookups
    #[serde(default = "default_image_operating_system")]
    pub image_operating_system: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackerConfig {
    /// Packer executable
    #[serde(default = "default_packer_binary")]
    pub binary: String,
    /// Directory where per-build templates are written while packer runs
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Login account on the base image
    #[serde(default = "default_ssh_username")]
    pub ssh_username: String,
    /// Prefix of the generated image name
    #[serde(default = "default_image_name_prefix")]
    pub image_name_prefix: String,
    /// Provisioner command run before package installation
    #[serde(default = "default_update_command")]
    pub update_command: String,
    /// Provisioner command the package list is appended to
    #[serde(default = "default_install_command")]
    pub install_command: String,
    /// Version constraint of the oracle packer plugin
    #[serde(default = "default_plugin_version")]
    pub plugin_version: String,
    /// Source address of the oracle packer plugin
    #[serde(default = "default_plugin_source")]
    pub plugin_source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP API listens on
    #[serde(default = "default_bind")]
    pub bind: String,
    /// sqlx connection string for the request store
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

impl Default for OciConfig {
    fn default() -> Self {
        Self {
            config_file: default_oci_config_file(),
            compartment_ocid: None,
            subnet_ocid: None,
            availability_domain: None,
            cli_binary: default_oci_cli(),
            image_operating_system: default_image_operating_system(),
        }
    }
}

impl Default for PackerConfig {
    fn default() -> Self {
        Self {
            binary: default_packer_binary(),
            work_dir: default_work_dir(),
            ssh_username: default_ssh_username(),
            image_name_prefix: default_image_name_prefix(),
            update_command: default_update_command(),
            install_command: default_install_command(),
            plugin_version: default_plugin_version(),
            plugin_source: default_plugin_source(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            database_url: default_database_url(),
        }
    }
}

impl KilnConfig {
    /// Load from kiln.toml at the given path, or return defaults if not found,
    /// then apply environment overrides.
    pub fn load(project_dir: &Path) -> crate::Result<Self> {
        // arch-lint: allow(no-silent-result-drop) reason="an unset or non-unicode variable means no override"
        Self::load_with_env(project_dir, |key| std::env::var(key).ok())
    }

    /// Same as [`load`](Self::load) with an explicit environment lookup.
    pub fn load_with_env(
        project_dir: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> crate::Result<Self> {
        let config_path = project_dir.join("kiln.toml");
        let mut config: Self = if config_path.exists() {
            let content =
                std::fs::read_to_string(&config_path).map_err(|e| crate::Error::ConfigLoad {
                    path: config_path.clone(),
                    source: e,
                })?;
            let config = toml::from_str(&content).map_err(|e| crate::Error::ConfigParse {
                path: config_path.clone(),
                source: e,
            })?;
            tracing::debug!(path = %config_path.display(), "loaded kiln.toml");
            config
        } else {
            tracing::debug!("no kiln.toml found; using defaults");
            Self::default()
        };

        config.apply_env(env);
        config.oci.config_file = expand_home(&config.oci.config_file);
        Ok(config)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = env("OCI_CONFIG_FILE") {
            self.oci.config_file = PathBuf::from(v);
        }
        if let Some(v) = env("OCI_COMPARTMENT_OCID") {
            self.oci.compartment_ocid = Some(v);
        }
        if let Some(v) = env("OCI_SUBNET_OCID") {
            self.oci.subnet_ocid = Some(v);
        }
        if let Some(v) = env("OCI_AVAILABILITY_DOMAIN") {
            self.oci.availability_domain = Some(v);
        }
        if let Some(v) = env("PACKER_BINARY") {
            self.packer.binary = v;
        }
        if let Some(v) = env("KILN_DATABASE_URL") {
            self.server.database_url = v;
        }
    }

    /// Network placement for builds. Fails if any of the three settings is unset.
    pub fn network_context(&self) -> crate::Result<NetworkContext> {
        Ok(NetworkContext {
            availability_domain: required(
                &self.oci.availability_domain,
                "oci.availability_domain",
                "OCI_AVAILABILITY_DOMAIN",
            )?,
            compartment_ocid: required(
                &self.oci.compartment_ocid,
                "oci.compartment_ocid",
                "OCI_COMPARTMENT_OCID",
            )?,
            subnet_ocid: required(&self.oci.subnet_ocid, "oci.subnet_ocid", "OCI_SUBNET_OCID")?,
        })
    }
}

fn required(
    value: &Option<String>,
    setting: &'static str,
    env_var: &'static str,
) -> crate::Result<String> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .map(str::to_owned)
        .ok_or(crate::Error::MissingSetting { setting, env_var })
}

/// Expands a leading `~` to the current user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        // arch-lint: allow(no-error-swallowing) reason="a path without a leading `~` is used as given"
        Err(_) => path.to_path_buf(),
    }
}

fn default_oci_config_file() -> PathBuf {
    PathBuf::from("~/.oci/config")
}

fn default_oci_cli() -> String {
    "oci".to_owned()
}

fn default_image_operating_system() -> String {
    "Oracle Linux".to_owned()
}

fn default_packer_binary() -> String {
    "packer".to_owned()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_ssh_username() -> String {
    "opc".to_owned()
}

fn default_image_name_prefix() -> String {
    "custom-image-build".to_owned()
}

fn default_update_command() -> String {
    "sudo yum update -y".to_owned()
}

fn default_install_command() -> String {
    "sudo yum install -y".to_owned()
}

fn default_plugin_version() -> String {
    "~> 1".to_owned()
}

fn default_plugin_source() -> String {
    "github.com/hashicorp/oracle".to_owned()
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_owned()
}

fn default_database_url() -> String {
    "sqlite://kiln.db".to_owned()
}
