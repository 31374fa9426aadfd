//! Persistence for build requests.
//!
//! Every implementation enforces the status state machine: an update is
//! applied only if the stored status may move to the requested one, and the
//! check and write happen atomically. The `Queued -> Building` update is
//! therefore a claim that exactly one caller can win.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use kiln_core::{BuildId, BuildRequest, BuildStatus, BuildSubmission, BuildUpdate};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Persist a new request as `Queued` and return it with its assigned id.
    async fn create(&self, submission: &BuildSubmission) -> Result<BuildRequest, StoreError>;

    async fn get(&self, id: BuildId) -> Result<Option<BuildRequest>, StoreError>;

    /// Apply a status change, returning the updated record.
    ///
    /// Fails with [`StoreError::InvalidTransition`] when the stored status
    /// cannot move to `update.status`, including when another caller got
    /// there first.
    async fn update(&self, id: BuildId, update: BuildUpdate) -> Result<BuildRequest, StoreError>;

    /// All requests, newest first.
    async fn list_all(&self) -> Result<Vec<BuildRequest>, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("build request {0} not found")]
    NotFound(BuildId),

    #[error("build request {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: BuildId,
        from: BuildStatus,
        to: BuildStatus,
    },

    #[error("database error")]
    Database {
        #[from]
        source: sqlx::Error,
    },

    #[error("database migration failed")]
    Migration {
        #[from]
        source: sqlx::migrate::MigrateError,
    },

    #[error("stored build request is corrupt: {0}")]
    Corrupt(String),
}
