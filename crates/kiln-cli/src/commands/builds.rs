use kiln::BuildId;
use kiln::store::RequestStore;

pub async fn list() -> anyhow::Result<()> {
    let config = super::load_config()?;
    let store = super::open_store(&config).await?;
    let builds = store.list_all().await?;

    if builds.is_empty() {
        println!("No builds found");
        return Ok(());
    }

    println!(
        "{:>5}  {:<9}  {:<20}  {:<12}  SHAPE",
        "ID", "STATUS", "CREATED", "PROFILE"
    );
    for build in &builds {
        println!(
            "{:>5}  {:<9}  {:<20}  {:<12}  {}",
            build.id,
            build.status.as_str(),
            build.created_at.format("%Y-%m-%d %H:%M:%S"),
            build.profile,
            build.shape,
        );
    }
    Ok(())
}

pub async fn show(id: BuildId) -> anyhow::Result<()> {
    let config = super::load_config()?;
    let store = super::open_store(&config).await?;
    let build = store
        .get(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("build {id} not found"))?;

    println!("Build {}", build.id);
    println!("  Status:     {}", build.status);
    println!("  Created:    {}", build.created_at.to_rfc3339());
    println!("  Provider:   {}", build.cloud_provider);
    println!("  Profile:    {}", build.profile);
    println!("  Base image: {}", build.base_image);
    match build.shape_sizing() {
        Some(sizing) => println!(
            "  Shape:      {} ({} OCPUs, {} GB)",
            build.shape, sizing.ocpus, sizing.memory_in_gbs
        ),
        None => println!("  Shape:      {}", build.shape),
    }
    println!("  Packages:   {}", build.package_list().join(" "));

    if !build.packer_output.is_empty() {
        println!();
        println!("{}", build.packer_output.trim_end());
    }
    Ok(())
}

pub async fn render(id: BuildId) -> anyhow::Result<()> {
    let config = super::load_config()?;
    let service = super::build_service(&config).await?;
    let template = service.render(id).await?;

    println!("{template}");
    Ok(())
}
