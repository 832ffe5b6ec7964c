//! Upstream sources: compute the commits published upstream since a
//! tracking's watermark.
//!
//! Two backends implement [`UpstreamSource`]:
//! - [`LocalGitSource`]: a local mirror kept current with `git fetch`
//! - [`RemoteApiSource`]: a hosted repository queried over its REST API
//!
//! [`SourceFactory`] picks one from the tracking's [`BackendKind`].

pub mod git;
pub mod github;
pub mod local;
pub mod mirror;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracking_state::{BackendKind, TrackingConfig};

use crate::http::ApiError;
pub use git::{GitError, MirrorRepo};
pub use github::{GitHubClient, UpstreamApi, UpstreamCommit};
pub use local::LocalGitSource;
pub use mirror::{mirror_dir_name, MirrorLocks};
pub use remote::RemoteApiSource;

/// One upstream commit turned into a single-commit patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub parent: Option<String>,
    /// Unified diff against the previous commit of the batch (or the
    /// watermark for the first one). Raw bytes: upstream files need not be
    /// UTF-8.
    pub diff: Vec<u8>,
    /// Web URL of the commit, when the upstream host is known.
    pub url: Option<String>,
}

impl CommitRecord {
    /// Name of the patch file uploaded for this commit.
    pub fn patch_file_name(&self) -> String {
        format!("{}.patch", self.id)
    }

    /// Seven-character abbreviation used in issue tables.
    pub fn short_id(&self) -> &str {
        self.id.get(..7).unwrap_or(&self.id)
    }
}

/// Commits in `(watermark, tip]`, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchBatch {
    commits: Vec<CommitRecord>,
}

impl PatchBatch {
    /// Build a batch from commits already ordered oldest first.
    pub fn new(commits: Vec<CommitRecord>) -> Self {
        Self { commits }
    }

    pub fn commits(&self) -> &[CommitRecord] {
        &self.commits
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    pub fn oldest(&self) -> Option<&CommitRecord> {
        self.commits.first()
    }

    /// The commit the watermark advances to once the batch is published.
    pub fn newest(&self) -> Option<&CommitRecord> {
        self.commits.last()
    }

    pub fn patch_file_names(&self) -> Vec<String> {
        self.commits.iter().map(CommitRecord::patch_file_name).collect()
    }
}

/// Result of a successful sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// New commits to publish.
    Batch(PatchBatch),
    /// The branch tip equals the watermark.
    Empty,
    /// The tracking has no watermark yet; it should be set to `tip`
    /// without publishing anything.
    Bootstrap { tip: String },
}

/// Why a sync did not produce an outcome.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Connection-level failure that outlived its retry budget. The next
    /// cycle tries again.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// The watermark is no longer reachable from the branch tip, or lies
    /// beyond the lookback bound. Needs an operator re-baseline.
    #[error("upstream history diverged: {reason}")]
    Diverged { reason: String },

    #[error("branch {branch} not found in {locator}")]
    BranchNotFound { locator: String, branch: String },

    #[error("git error: {0}")]
    Git(#[from] GitError),

    #[error("upstream api error: {0}")]
    Api(ApiError),
}

impl SourceError {
    pub fn diverged(reason: impl Into<String>) -> Self {
        SourceError::Diverged {
            reason: reason.into(),
        }
    }

    /// Only transient failures are worth retrying on a later cycle without
    /// operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }

    pub fn is_diverged(&self) -> bool {
        matches!(self, SourceError::Diverged { .. })
    }
}

impl From<ApiError> for SourceError {
    fn from(err: ApiError) -> Self {
        if err.is_transient() {
            SourceError::Transient(err.to_string())
        } else {
            SourceError::Api(err)
        }
    }
}

/// Computes the delta between a tracking's watermark and its upstream tip.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn sync(&self, config: &TrackingConfig) -> Result<SyncOutcome, SourceError>;
}

/// Selects the [`UpstreamSource`] for a tracking from its backend kind.
#[derive(Clone)]
pub struct SourceFactory {
    local: Arc<dyn UpstreamSource>,
    remote: Arc<dyn UpstreamSource>,
}

impl SourceFactory {
    pub fn new(local: Arc<dyn UpstreamSource>, remote: Arc<dyn UpstreamSource>) -> Self {
        Self { local, remote }
    }

    pub fn for_config(&self, config: &TrackingConfig) -> Arc<dyn UpstreamSource> {
        match config.backend {
            BackendKind::LocalGit => Arc::clone(&self.local),
            BackendKind::RemoteApi => Arc::clone(&self.remote),
        }
    }
}

/// Web URL of `commit` for locators hosted on github.com.
///
/// Accepts `owner/repo` as well as full https/ssh locators.
pub fn github_commit_url(locator: &str, commit: &str) -> Option<String> {
    let trimmed = locator.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let path = if let Some(rest) = trimmed.split_once("github.com").map(|(_, r)| r) {
        rest.trim_start_matches([':', '/'])
    } else if trimmed.contains("://") || trimmed.contains('@') {
        return None;
    } else {
        trimmed
    };

    let mut parts = path.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty() => Some(format!(
            "https://github.com/{owner}/{repo}/commit/{commit}"
        )),
        _ => None,
    }
}
