mod builds;
mod lookup;
mod serve;
mod submit;

use std::path::Path;
use std::sync::Arc;

use kiln::build::TemplateSettings;
use kiln::cloud::{CommandSupervisor, OciConfigSource, OciDirectory};
use kiln::store::SqliteStore;
use kiln::{BuildService, KilnConfig, Orchestrator, PackerSettings};

pub use builds::{list, render, show};
pub use lookup::{images, profiles, shapes};
pub use serve::serve;
pub use submit::submit;

fn load_config() -> anyhow::Result<KilnConfig> {
    Ok(KilnConfig::load(Path::new("."))?)
}

async fn open_store(config: &KilnConfig) -> anyhow::Result<Arc<SqliteStore>> {
    let store = SqliteStore::connect(&config.server.database_url).await?;
    Ok(Arc::new(store))
}

fn directory(config: &KilnConfig) -> OciDirectory {
    OciDirectory::new(&config.oci.cli_binary, &config.oci.config_file)
        .operating_system(&config.oci.image_operating_system)
}

/// Wire the production collaborators behind a [`BuildService`].
async fn build_service(config: &KilnConfig) -> anyhow::Result<BuildService> {
    let network = config.network_context()?;
    let store = open_store(config).await?;
    let orchestrator = Orchestrator::new(
        store,
        Arc::new(OciConfigSource::new(&config.oci.config_file)),
        Arc::new(CommandSupervisor),
        network,
    )
    .template_settings(TemplateSettings::from(&config.packer))
    .packer_settings(PackerSettings::from(&config.packer));

    Ok(BuildService::new(
        Arc::new(orchestrator),
        Arc::new(directory(config)),
    ))
}
