//! Packer template generation and transient build artifacts for kiln.
//!
//! # Build pipeline
//!
//! ```text
//! orchestrator run (one build id)
//!   1. Claim       ── status Queued → Building
//!   2. Credentials ── CredentialSource::resolve(profile)
//!   3. Template    ── TemplateGenerator::generate()
//!   4. Artifact    ── TransientConfig::write() → build-<id>.pkr.json
//!   5. Packer      ── packer build -force build-<id>.pkr.json
//!   6. Cleanup     ── TransientConfig::remove()
//!   7. Reconcile   ── status Completed / Failed, packer_output stored
//! ```
//!
//! This crate owns steps 2–4 and 6. The generator is pure: identical inputs
//! always render byte-identical JSON.

pub mod artifact;
pub mod template;

pub use artifact::{ArtifactError, TransientConfig};
pub use template::{PackerTemplate, TemplateError, TemplateGenerator, TemplateSettings};
