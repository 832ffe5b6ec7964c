//! Schema definitions for patch-tracker SurrealDB tables
//!
//! Tables:
//! - trackings: one row per downstream repo/branch sync relationship
//! - issues: issues opened by successful publish runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage_traits::{IssueRecord, TrackingConfig};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Row in the `trackings` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub repo: String,
    pub branch: String,
    /// "local-git" | "remote-api"
    pub backend: String,
    pub scm_repo: String,
    pub scm_branch: String,
    #[serde(default)]
    pub watermark: Option<String>,
    pub enabled: bool,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl TrackingRow {
    pub fn from_config(config: &TrackingConfig) -> Self {
        TrackingRow {
            id: None,
            repo: config.repo.clone(),
            branch: config.branch.clone(),
            backend: config.backend.as_str().to_string(),
            scm_repo: config.scm_repo.clone(),
            scm_branch: config.scm_branch.clone(),
            watermark: config.watermark.clone(),
            enabled: config.enabled,
            updated_at: Utc::now(),
        }
    }

    pub fn into_config(self) -> Result<TrackingConfig, StorageError> {
        Ok(TrackingConfig {
            backend: self.backend.parse()?,
            repo: self.repo,
            branch: self.branch,
            scm_repo: self.scm_repo,
            scm_branch: self.scm_branch,
            watermark: self.watermark,
            enabled: self.enabled,
        })
    }
}

/// Row in the `issues` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub repo: String,
    pub branch: String,
    pub issue: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

impl From<IssueRecord> for IssueRow {
    fn from(record: IssueRecord) -> Self {
        IssueRow {
            id: None,
            repo: record.repo,
            branch: record.branch,
            issue: record.issue,
            created_at: record.created_at,
        }
    }
}

impl From<IssueRow> for IssueRecord {
    fn from(row: IssueRow) -> Self {
        IssueRecord {
            repo: row.repo,
            branch: row.branch,
            issue: row.issue,
            created_at: row.created_at,
        }
    }
}
