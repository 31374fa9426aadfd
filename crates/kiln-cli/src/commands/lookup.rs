use kiln::cloud::DirectoryService;

pub async fn profiles() -> anyhow::Result<()> {
    let config = super::load_config()?;
    let profiles = super::directory(&config).list_profiles().await?;

    if profiles.is_empty() {
        println!("No profiles found in {}", config.oci.config_file.display());
    } else {
        for name in &profiles {
            println!("{name}");
        }
    }
    Ok(())
}

pub async fn images(profile: &str) -> anyhow::Result<()> {
    let config = super::load_config()?;
    let compartment = compartment(&config)?;
    let images = super::directory(&config)
        .list_images(&compartment, profile)
        .await?;

    if images.is_empty() {
        println!("No images found");
    } else {
        for image in &images {
            println!("{}  {}", image.id, image.display_name);
        }
    }
    Ok(())
}

pub async fn shapes(profile: &str) -> anyhow::Result<()> {
    let config = super::load_config()?;
    let compartment = compartment(&config)?;
    let shapes = super::directory(&config)
        .list_shapes(&compartment, profile)
        .await?;

    if shapes.is_empty() {
        println!("No shapes found");
    } else {
        for shape in &shapes {
            println!("{shape}");
        }
    }
    Ok(())
}

fn compartment(config: &kiln::KilnConfig) -> anyhow::Result<String> {
    config
        .oci
        .compartment_ocid
        .clone()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "oci.compartment_ocid is not set; add it to kiln.toml or export OCI_COMPARTMENT_OCID"
            )
        })
}
