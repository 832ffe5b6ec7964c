//! Storage trait definitions for patch-tracker
//!
//! These traits define the persistence seams the sync pipeline depends on:
//! - `TrackingStore`: tracking configurations and their watermarks
//! - `IssueLog`: issues opened downstream by successful publish runs
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// TrackingConfig
// ---------------------------------------------------------------------------

/// Downstream identity of a tracking: repository plus branch.
///
/// Unique across the store; doubles as the scheduler's job identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackingKey {
    pub repo: String,
    pub branch: String,
}

impl TrackingKey {
    pub fn new(repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            branch: branch.into(),
        }
    }

    /// Job identity used for scheduler deduplication: `<repo>:<branch>`.
    pub fn job_id(&self) -> String {
        format!("{}:{}", self.repo, self.branch)
    }
}

impl fmt::Display for TrackingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repo, self.branch)
    }
}

/// Which upstream backend a tracking reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// A locally mirrored git repository, reached through the git CLI.
    #[serde(rename = "local-git", alias = "git")]
    LocalGit,
    /// A hosted repository queried through its REST API.
    #[serde(rename = "remote-api", alias = "github")]
    RemoteApi,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::LocalGit => "local-git",
            BackendKind::RemoteApi => "remote-api",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local-git" | "git" => Ok(BackendKind::LocalGit),
            "remote-api" | "github" => Ok(BackendKind::RemoteApi),
            other => Err(StorageError::InvalidValue {
                field: "backend".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// One sync relationship between an upstream branch and a downstream branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Downstream repository id (e.g. `src-openeuler/curl`)
    pub repo: String,
    /// Downstream base branch
    pub branch: String,
    /// Upstream backend
    pub backend: BackendKind,
    /// Upstream repository locator (clone URL or `owner/name`)
    pub scm_repo: String,
    /// Upstream branch
    pub scm_branch: String,
    /// Last upstream commit fully published downstream
    pub watermark: Option<String>,
    /// Disabled trackings are never scheduled
    pub enabled: bool,
}

impl TrackingConfig {
    pub fn key(&self) -> TrackingKey {
        TrackingKey::new(self.repo.clone(), self.branch.clone())
    }

    /// The watermark, treating an empty string the same as unset.
    pub fn watermark(&self) -> Option<&str> {
        self.watermark.as_deref().filter(|w| !w.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// IssueRecord
// ---------------------------------------------------------------------------

/// An issue opened downstream for one published patch batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub repo: String,
    pub branch: String,
    /// Issue number/identifier as returned by the downstream API
    pub issue: String,
    pub created_at: DateTime<Utc>,
}

impl IssueRecord {
    pub fn new(key: &TrackingKey, issue: impl Into<String>) -> Self {
        Self {
            repo: key.repo.clone(),
            branch: key.branch.clone(),
            issue: issue.into(),
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Tracking configuration store.
///
/// Guarantees:
/// - At most one tracking per `(repo, branch)`.
/// - `update_watermark` only touches the watermark field of an existing row.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// All trackings with `enabled = true`.
    async fn list_enabled(&self) -> StorageResult<Vec<TrackingConfig>>;

    /// Fetch one tracking by downstream identity.
    async fn get(&self, key: &TrackingKey) -> StorageResult<Option<TrackingConfig>>;

    /// Insert or replace the tracking identified by `config.key()`.
    ///
    /// A `None` watermark keeps the stored one; `Some("")` clears it.
    async fn upsert(&self, config: TrackingConfig) -> StorageResult<()>;

    /// Set the watermark. Returns `TrackingNotFound` if the key is unknown.
    async fn update_watermark(&self, key: &TrackingKey, commit: &str) -> StorageResult<()>;
}

/// Append-only log of issues created by publish runs.
#[async_trait]
pub trait IssueLog: Send + Sync {
    async fn record_issue(&self, record: IssueRecord) -> StorageResult<()>;

    /// Issues for one tracking, oldest first.
    async fn issues_for(&self, key: &TrackingKey) -> StorageResult<Vec<IssueRecord>>;
}
