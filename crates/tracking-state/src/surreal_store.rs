//! SurrealDB-backed TrackingStore and IssueLog implementation
//!
//! Uses `schema::TrackingRow` and `schema::IssueRow` for persistence,
//! converting to/from `storage_traits` types at the boundary.

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::migrations;
use crate::schema::{IssueRow, TrackingRow};
use crate::storage_traits::{
    IssueLog, IssueRecord, StorageResult, TrackingConfig, TrackingKey, TrackingStore,
};

const NAMESPACE: &str = "patch_tracker";
const DATABASE: &str = "main";

/// SurrealDB-backed implementation of [`TrackingStore`] and [`IssueLog`].
#[derive(Clone)]
pub struct SurrealTrackingStore {
    db: Surreal<Any>,
}

impl SurrealTrackingStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect("mem://").await
    }

    /// Connect to `url` (`mem://`, `surrealkv://<path>`, `ws://...`),
    /// select the patch-tracker namespace and run `init_schema`.
    ///
    /// For `surrealkv://` URLs the directory is created first.
    pub async fn connect(url: &str) -> StorageResult<Self> {
        if let Some(path) = url.strip_prefix("surrealkv://") {
            std::fs::create_dir_all(path).map_err(|e| {
                StorageError::Connection(format!(
                    "Failed to create database directory {}: {}",
                    path, e
                ))
            })?;
        }

        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;

        info!("SurrealTrackingStore connected ({})", url);
        Ok(Self { db })
    }

    // -- private helpers -----------------------------------------------------

    async fn fetch_row(&self, key: &TrackingKey) -> StorageResult<Option<TrackingRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM trackings WHERE repo = $repo AND branch = $branch")
            .bind(("repo", key.repo.clone()))
            .bind(("branch", key.branch.clone()))
            .await?;

        let rows: Vec<TrackingRow> = res.take(0)?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl TrackingStore for SurrealTrackingStore {
    async fn list_enabled(&self) -> StorageResult<Vec<TrackingConfig>> {
        let mut res = self
            .db
            .query("SELECT * FROM trackings WHERE enabled = true ORDER BY repo ASC, branch ASC")
            .await?;

        let rows: Vec<TrackingRow> = res.take(0)?;
        rows.into_iter().map(TrackingRow::into_config).collect()
    }

    async fn get(&self, key: &TrackingKey) -> StorageResult<Option<TrackingConfig>> {
        self.fetch_row(key)
            .await?
            .map(TrackingRow::into_config)
            .transpose()
    }

    async fn upsert(&self, config: TrackingConfig) -> StorageResult<()> {
        let key = config.key();
        let mut row = TrackingRow::from_config(&config);

        if let Some(existing) = self.fetch_row(&key).await? {
            debug!(tracking = %key, "updating tracking");
            if row.watermark.is_none() {
                row.watermark = existing.watermark;
            }
            self.db
                .query("UPDATE trackings MERGE $row WHERE repo = $repo AND branch = $branch")
                .bind(("row", row))
                .bind(("repo", key.repo))
                .bind(("branch", key.branch))
                .await?
                .check()?;
        } else {
            debug!(tracking = %key, "creating tracking");
            let _created: Option<TrackingRow> = self.db.create("trackings").content(row).await?;
        }
        Ok(())
    }

    async fn update_watermark(&self, key: &TrackingKey, commit: &str) -> StorageResult<()> {
        let mut res = self
            .db
            .query(
                "UPDATE trackings SET watermark = $commit, updated_at = time::now() \
                 WHERE repo = $repo AND branch = $branch RETURN AFTER",
            )
            .bind(("commit", commit.to_string()))
            .bind(("repo", key.repo.clone()))
            .bind(("branch", key.branch.clone()))
            .await?;

        let updated: Vec<TrackingRow> = res.take(0)?;
        if updated.is_empty() {
            return Err(StorageError::TrackingNotFound {
                repo: key.repo.clone(),
                branch: key.branch.clone(),
            });
        }
        debug!(tracking = %key, commit = %commit, "watermark updated");
        Ok(())
    }
}

#[async_trait]
impl IssueLog for SurrealTrackingStore {
    async fn record_issue(&self, record: IssueRecord) -> StorageResult<()> {
        let _created: Option<IssueRow> = self
            .db
            .create("issues")
            .content(IssueRow::from(record))
            .await?;
        Ok(())
    }

    async fn issues_for(&self, key: &TrackingKey) -> StorageResult<Vec<IssueRecord>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM issues WHERE repo = $repo AND branch = $branch \
                 ORDER BY created_at ASC",
            )
            .bind(("repo", key.repo.clone()))
            .bind(("branch", key.branch.clone()))
            .await?;

        let rows: Vec<IssueRow> = res.take(0)?;
        Ok(rows.into_iter().map(IssueRecord::from).collect())
    }
}
