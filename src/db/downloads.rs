//! Tracked download records
//!
//! One row per user-submitted download, keyed by the derived content
//! identifier. Rows are created on submission and deleted as soon as a
//! completion action is accepted; the file move itself runs on after the row
//! is gone.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

/// A tracked download record
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DownloadRecord {
    /// SHA-256 hex of the normalized magnet link; unique key and the sole
    /// join key to the remote task list
    pub identifier: String,
    /// "series" or "movie"; decides the library root on completion
    pub media_type: String,
    /// The magnet link as submitted
    pub source_url: String,
    /// Relative path under the category root where finished content lands
    pub target_location: String,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a new record
#[derive(Debug)]
pub struct NewDownload {
    pub identifier: String,
    pub media_type: String,
    pub source_url: String,
    pub target_location: String,
}

/// Download repository for database operations
pub struct DownloadRepository {
    pool: SqlitePool,
}

impl DownloadRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new record. Fails if the identifier is already tracked.
    pub async fn insert(&self, input: NewDownload) -> Result<DownloadRecord> {
        let record = sqlx::query_as::<_, DownloadRecord>(
            r#"
            INSERT INTO downloads (identifier, media_type, source_url, target_location, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING *
            "#,
        )
        .bind(&input.identifier)
        .bind(&input.media_type)
        .bind(&input.source_url)
        .bind(&input.target_location)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Look up a record by its identifier
    pub async fn get_by_identifier(&self, identifier: &str) -> Result<Option<DownloadRecord>> {
        let record = sqlx::query_as::<_, DownloadRecord>(
            "SELECT * FROM downloads WHERE identifier = ?1",
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Delete a record by its identifier; returns whether a row was removed
    pub async fn delete_by_identifier(&self, identifier: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM downloads WHERE identifier = ?1")
            .bind(identifier)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All tracked downloads, newest first
    pub async fn list_all(&self) -> Result<Vec<DownloadRecord>> {
        let records = sqlx::query_as::<_, DownloadRecord>(
            "SELECT * FROM downloads ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
