mod commands;

use clap::{Parser, Subcommand};
use kiln::BuildId;

#[derive(Parser)]
#[command(name = "kiln", about = "Build custom Oracle Cloud images with Packer")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Listen address (default: server.bind from kiln.toml)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Submit a build and run it in the foreground
    Submit {
        /// OCI config profile to build with
        #[arg(long)]
        profile: String,
        /// Base image OCID
        #[arg(long)]
        image: String,
        /// Instance shape used for the build
        #[arg(long)]
        shape: String,
        /// Package to install (repeatable)
        #[arg(long = "package", short = 'p', required = true)]
        packages: Vec<String>,
        /// OCPUs for a flexible shape
        #[arg(long)]
        ocpus: Option<u32>,
        /// Memory in GB for a flexible shape
        #[arg(long = "memory-gbs")]
        memory_gbs: Option<u32>,
    },
    /// List builds, newest first
    List,
    /// Show one build, including its packer output
    Show {
        /// Build id
        id: BuildId,
    },
    /// Print the packer template a build runs with
    Render {
        /// Build id
        id: BuildId,
    },
    /// List profiles in the OCI config file
    Profiles,
    /// List available base images
    Images {
        /// OCI config profile
        profile: String,
    },
    /// List instance shapes
    Shapes {
        /// OCI config profile
        profile: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv_loaded = dotenvy::dotenv().is_ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    tracing::debug!(dotenv_loaded, "environment loaded");

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind } => commands::serve(bind).await?,
        Commands::Submit {
            profile,
            image,
            shape,
            packages,
            ocpus,
            memory_gbs,
        } => {
            let request = kiln::NewBuildRequest {
                profile,
                base_image: image,
                packages: packages.join("\n"),
                shape,
                ocpus,
                memory_in_gbs: memory_gbs,
                ..Default::default()
            };
            commands::submit(request).await?
        }
        Commands::List => commands::list().await?,
        Commands::Show { id } => commands::show(id).await?,
        Commands::Render { id } => commands::render(id).await?,
        Commands::Profiles => commands::profiles().await?,
        Commands::Images { profile } => commands::images(&profile).await?,
        Commands::Shapes { profile } => commands::shapes(&profile).await?,
    }

    Ok(())
}
