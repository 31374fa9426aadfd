//! Core types and configuration for kiln.
//!
//! This crate defines the `kiln.toml` schema ([`KilnConfig`]), the build
//! request model ([`BuildRequest`], [`BuildStatus`]), the provider context
//! handed to template generation ([`NetworkContext`], [`OciCredentials`]),
//! and shared error types.

pub mod config;
pub mod context;
pub mod error;
pub mod request;

pub use config::{KilnConfig, OciConfig, PackerConfig, ServerConfig, expand_home};
pub use context::{CredentialError, CredentialSource, NetworkContext, OciCredentials};
pub use error::{Error, Result};
pub use request::{
    BuildId, BuildRequest, BuildStatus, BuildSubmission, BuildUpdate, NewBuildRequest,
    ShapeSizing, UnknownStatus, ValidationError, is_flex_shape,
};
