//! Build custom Oracle Cloud images with Packer.
//!
//! A build request is validated, stored as `Queued`, and handed to the
//! [`Orchestrator`], which claims it, renders a Packer template, runs
//! `packer build`, and records the result. [`BuildService`] exposes the
//! caller-facing operations and [`api::router`] serves them over HTTP.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kiln::{BuildService, KilnConfig, NewBuildRequest, Orchestrator};
//! use kiln::cloud::{CommandSupervisor, OciConfigSource, OciDirectory};
//! use kiln::store::MemoryStore;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = KilnConfig::load(std::path::Path::new("."))?;
//! let orchestrator = Orchestrator::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(OciConfigSource::new(&config.oci.config_file)),
//!     Arc::new(CommandSupervisor),
//!     config.network_context()?,
//! );
//! let directory = OciDirectory::new(&config.oci.cli_binary, &config.oci.config_file);
//! let service = BuildService::new(Arc::new(orchestrator), Arc::new(directory));
//!
//! let handle = service
//!     .submit(NewBuildRequest {
//!         profile: "DEFAULT".into(),
//!         base_image: "ocid1.image.oc1..example".into(),
//!         packages: "nginx\ngit".into(),
//!         shape: "VM.Standard2.1".into(),
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("{:?}", handle.wait().await);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod orchestrator;
pub mod service;

// Core types flattened into the root namespace.
pub use kiln_core::*;

pub use orchestrator::{BuildHandle, Orchestrator, PackerSettings, RunOutcome};
pub use service::{BuildService, ServiceError};

/// Template generation and transient build artifacts.
pub mod build {
    pub use kiln_build::*;
}

/// OCI directory lookups, credentials, and process supervision.
pub mod cloud {
    pub use kiln_cloud::*;
}

/// Build request persistence.
pub mod store {
    pub use kiln_store::*;
}
