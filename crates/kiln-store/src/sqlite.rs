//! SQLite store with split reader/writer pools in WAL mode.
//!
//! SQLite allows one writer at a time, so writes go through a single-connection
//! pool while reads share a small read-only pool. Migrations are embedded and
//! run on the writer before the reader pool opens.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use kiln_core::{BuildId, BuildRequest, BuildStatus, BuildSubmission, BuildUpdate};
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};

use crate::{RequestStore, StoreError};

const READ_CONNECTIONS: u32 = 4;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    reader: SqlitePool,
    writer: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `database_url` and migrate it.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let base = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(base.clone())
            .await?;

        sqlx::migrate!("./migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READ_CONNECTIONS)
            .connect_with(base.read_only(true))
            .await?;

        tracing::debug!(database_url, "request store opened");
        Ok(Self { reader, writer })
    }

    /// Close both pools, waiting for in-flight queries.
    pub async fn close(&self) {
        self.reader.close().await;
        self.writer.close().await;
    }
}

#[async_trait]
impl RequestStore for SqliteStore {
    async fn create(&self, submission: &BuildSubmission) -> Result<BuildRequest, StoreError> {
        let created_at = Utc::now();
        let sizing = submission.sizing;

        let row = sqlx::query(
            "INSERT INTO image_builds
                 (created_at, cloud_provider, profile, base_image, packages, shape,
                  ocpus, memory_in_gbs, status, packer_output)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, '')
             RETURNING *",
        )
        .bind(format_datetime(&created_at))
        .bind(&submission.cloud_provider)
        .bind(&submission.profile)
        .bind(&submission.base_image)
        .bind(&submission.packages)
        .bind(&submission.shape)
        .bind(sizing.map(|s| i64::from(s.ocpus)))
        .bind(sizing.map(|s| i64::from(s.memory_in_gbs)))
        .bind(BuildStatus::Queued.as_str())
        .fetch_one(&self.writer)
        .await?;

        let request = BuildRow::from_row(&row)?.into_request()?;
        tracing::debug!(build_id = %request.id, "build request created");
        Ok(request)
    }

    async fn get(&self, id: BuildId) -> Result<Option<BuildRequest>, StoreError> {
        let row = sqlx::query("SELECT * FROM image_builds WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.reader)
            .await?;

        row.map(|row| -> Result<BuildRequest, StoreError> {
            BuildRow::from_row(&row)?.into_request()
        })
        .transpose()
    }

    async fn update(&self, id: BuildId, update: BuildUpdate) -> Result<BuildRequest, StoreError> {
        let predecessors = update.status.predecessors();

        if !predecessors.is_empty() {
            let placeholders = vec!["?"; predecessors.len()].join(", ");
            let sql = format!(
                "UPDATE image_builds
                 SET status = ?, packer_output = COALESCE(?, packer_output)
                 WHERE id = ? AND status IN ({placeholders})
                 RETURNING *"
            );
            let mut query = sqlx::query(&sql)
                .bind(update.status.as_str())
                .bind(update.packer_output.as_deref())
                .bind(id.get());
            for status in predecessors {
                query = query.bind(status.as_str());
            }

            if let Some(row) = query.fetch_optional(&self.writer).await? {
                return BuildRow::from_row(&row)?.into_request();
            }
        }

        // Nothing matched: tell a missing row apart from a refused transition.
        let current = sqlx::query("SELECT status FROM image_builds WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.writer)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        let status: String = current.try_get("status")?;

        Err(StoreError::InvalidTransition {
            id,
            from: parse_status(&status)?,
            to: update.status,
        })
    }

    async fn list_all(&self) -> Result<Vec<BuildRequest>, StoreError> {
        let rows = sqlx::query("SELECT * FROM image_builds ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.reader)
            .await?;

        rows.iter()
            .map(|row| -> Result<BuildRequest, StoreError> {
                BuildRow::from_row(row)?.into_request()
            })
            .collect()
    }
}

/// Raw column values of one `image_builds` row.
struct BuildRow {
    id: i64,
    created_at: String,
    cloud_provider: String,
    profile: String,
    base_image: String,
    packages: String,
    shape: String,
    ocpus: Option<i64>,
    memory_in_gbs: Option<i64>,
    status: String,
    packer_output: String,
}

impl BuildRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            created_at: row.try_get("created_at")?,
            cloud_provider: row.try_get("cloud_provider")?,
            profile: row.try_get("profile")?,
            base_image: row.try_get("base_image")?,
            packages: row.try_get("packages")?,
            shape: row.try_get("shape")?,
            ocpus: row.try_get("ocpus")?,
            memory_in_gbs: row.try_get("memory_in_gbs")?,
            status: row.try_get("status")?,
            packer_output: row.try_get("packer_output")?,
        })
    }

    fn into_request(self) -> Result<BuildRequest, StoreError> {
        Ok(BuildRequest {
            id: BuildId::new(self.id),
            created_at: parse_datetime(&self.created_at)?,
            cloud_provider: self.cloud_provider,
            profile: self.profile,
            base_image: self.base_image,
            packages: self.packages,
            shape: self.shape,
            ocpus: self.ocpus.map(|v| to_u32(v, "ocpus")).transpose()?,
            memory_in_gbs: self
                .memory_in_gbs
                .map(|v| to_u32(v, "memory_in_gbs"))
                .transpose()?,
            status: parse_status(&self.status)?,
            packer_output: self.packer_output,
        })
    }
}

fn parse_status(s: &str) -> Result<BuildStatus, StoreError> {
    s.parse()
        .map_err(|e: kiln_core::UnknownStatus| StoreError::Corrupt(e.to_string()))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid created_at '{s}': {e}")))
}

/// Fixed-width UTC timestamps so that text order equals time order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_u32(value: i64, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|e| StoreError::Corrupt(format!("{column} out of range ({value}): {e}")))
}
