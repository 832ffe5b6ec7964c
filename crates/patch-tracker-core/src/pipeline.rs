//! Publish pipeline: turn one patch batch into a downstream branch, patch
//! files, an updated descriptor, an issue and a pull request, then advance
//! the watermark.
//!
//! Steps run strictly in order and the first failure abandons the run. Work
//! already done (branch, uploaded files, issue) is left in place; the next
//! cycle recomputes the same batch and publishes it under a fresh branch
//! name. The watermark only moves after the pull request exists.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{info, warn};
use tracking_state::{IssueLog, IssueRecord, StorageError, TrackingConfig, TrackingStore};

use crate::downstream::{spec_file_path, DownstreamApi, PullRequest};
use crate::http::ApiError;
use crate::obs;
use crate::retry::{RetryError, RetryPolicy};
use crate::spec_file::SpecFile;
use crate::upstream::PatchBatch;

/// Prefix of every branch the pipeline creates downstream.
pub const WORK_BRANCH_PREFIX: &str = "patch-tracking/";

const ISSUE_TABLE_HEADER: &str = "| Commit | Datetime | Message |\n| ------ | ------ | ------ |\n";

/// Ordered publish steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishStep {
    CreateBranch,
    UploadPatches,
    UpdateSpec,
    CreateIssue,
    CreatePullRequest,
    AdvanceWatermark,
}

impl PublishStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStep::CreateBranch => "create-branch",
            PublishStep::UploadPatches => "upload-patches",
            PublishStep::UpdateSpec => "update-spec",
            PublishStep::CreateIssue => "create-issue",
            PublishStep::CreatePullRequest => "create-pull-request",
            PublishStep::AdvanceWatermark => "advance-watermark",
        }
    }
}

impl fmt::Display for PublishStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("nothing to publish")]
    EmptyBatch,

    #[error("{step} failed: {source}")]
    Step { step: PublishStep, source: ApiError },

    #[error("{step} failed after {attempts} attempts: {source}")]
    Exhausted {
        step: PublishStep,
        attempts: u32,
        source: ApiError,
    },

    #[error("failed to advance watermark: {0}")]
    Watermark(#[from] StorageError),
}

impl PublishError {
    /// The step that failed; `None` for an empty batch.
    pub fn step(&self) -> Option<PublishStep> {
        match self {
            PublishError::EmptyBatch => None,
            PublishError::Step { step, .. } | PublishError::Exhausted { step, .. } => Some(*step),
            PublishError::Watermark(_) => Some(PublishStep::AdvanceWatermark),
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PublishError::Exhausted { attempts, .. } => *attempts,
            PublishError::EmptyBatch => 0,
            _ => 1,
        }
    }
}

/// Outcome of a fully published batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResult {
    pub repo: String,
    pub branch: String,
    pub work_branch: String,
    pub issue: String,
    /// Newest commit of the batch; the watermark now points at it.
    pub watermark: String,
    pub patches: Vec<String>,
}

/// Name of the downstream branch for a run started at `started_at`.
pub fn work_branch_name(started_at: DateTime<Local>) -> String {
    format!("{WORK_BRANCH_PREFIX}{}", run_stamp(started_at))
}

fn run_stamp(started_at: DateTime<Local>) -> String {
    started_at.format("%Y%m%d%H%M%S%6f").to_string()
}

/// Markdown table summarising a batch, one row per commit.
pub fn render_issue_table(batch: &PatchBatch) -> String {
    let mut table = String::from(ISSUE_TABLE_HEADER);
    for commit in batch.commits() {
        let id = match &commit.url {
            Some(url) => format!("[{}]({url})", commit.short_id()),
            None => commit.short_id().to_string(),
        };
        let message = commit
            .message
            .replace('\r', "")
            .replace('\n', "<br>")
            .replace('|', "\\|");
        table.push_str(&format!(
            "| {id} | {} | {message} |\n",
            commit.timestamp.format("%Y-%m-%dT%H:%M:%SZ")
        ));
    }
    table
}

/// Runs the publish steps against one downstream repository API.
#[derive(Clone)]
pub struct PublishPipeline {
    downstream: Arc<dyn DownstreamApi>,
    store: Arc<dyn TrackingStore>,
    issues: Arc<dyn IssueLog>,
    pr_retry: RetryPolicy,
}

impl PublishPipeline {
    pub fn new(
        downstream: Arc<dyn DownstreamApi>,
        store: Arc<dyn TrackingStore>,
        issues: Arc<dyn IssueLog>,
    ) -> Self {
        Self {
            downstream,
            store,
            issues,
            pr_retry: RetryPolicy::PULL_REQUEST,
        }
    }

    pub fn with_pr_retry(mut self, policy: RetryPolicy) -> Self {
        self.pr_retry = policy;
        self
    }

    /// Publish `batch` for `config`. `started_at` names the work branch and
    /// dates the changelog entry.
    pub async fn publish(
        &self,
        config: &TrackingConfig,
        batch: &PatchBatch,
        started_at: DateTime<Local>,
    ) -> Result<PublishResult, PublishError> {
        let (Some(oldest), Some(newest)) = (batch.oldest(), batch.newest()) else {
            return Err(PublishError::EmptyBatch);
        };
        let key = config.key();
        let repo = config.repo.as_str();
        let base = config.branch.as_str();
        let stamp = run_stamp(started_at);
        let work_branch = work_branch_name(started_at);
        let failed = |step: PublishStep| move |source: ApiError| PublishError::Step { step, source };

        // 1. Branch off the base branch.
        self.downstream
            .create_branch(repo, base, &work_branch)
            .await
            .map_err(failed(PublishStep::CreateBranch))?;
        info!(work_branch = %work_branch, "created branch");

        // 2. One patch file per commit, oldest first.
        let mut patches = Vec::with_capacity(batch.len());
        for commit in batch.commits() {
            let file = commit.patch_file_name();
            let origin = commit.url.as_deref().unwrap_or(config.scm_repo.as_str());
            let message = format!("Add patch {} from {origin}", commit.id);
            self.downstream
                .create_file(repo, &work_branch, &file, &commit.diff, &message)
                .await
                .map_err(failed(PublishStep::UploadPatches))?;
            info!(commit = %commit.id, file = %file, "uploaded patch");
            patches.push(file);
        }

        // 3. Descriptor: read from the base branch, write to the work branch.
        let spec_path = spec_file_path(repo).map_err(failed(PublishStep::UpdateSpec))?;
        let title = format!("{} patch-tracking", started_at.format("%a %b %d %Y"));
        let note = format!(
            "append patch file of upstream repository from <{}> to <{}>",
            oldest.id, newest.id
        );
        let existing = self
            .downstream
            .get_file(repo, base, &spec_path)
            .await
            .map_err(failed(PublishStep::UpdateSpec))?;
        let current = existing.as_ref().map(|f| f.content.as_str()).unwrap_or("");
        let spec = SpecFile::parse(current);
        for anomaly in spec.anomalies() {
            obs::emit_spec_anomaly(&key, &spec_path, &anomaly);
        }
        let updated = spec.update(&title, &note, &patches);
        let spec_message = format!("Update {spec_path} by patch-tracking {stamp}");
        match &existing {
            Some(file) => self
                .downstream
                .update_file(repo, &work_branch, &spec_path, &updated, &file.sha, &spec_message)
                .await,
            None => self
                .downstream
                .create_file(repo, &work_branch, &spec_path, updated.as_bytes(), &spec_message)
                .await,
        }
        .map_err(failed(PublishStep::UpdateSpec))?;
        info!(path = %spec_path, created = existing.is_none(), "uploaded descriptor");

        // 4. Issue listing the batch.
        let issue_title = format!("[patch tracking] {stamp}");
        let issue_body = format!(
            "{}\nUpstream: {}@{}\nBranch: {work_branch}\n",
            render_issue_table(batch),
            config.scm_repo,
            config.scm_branch
        );
        let issue = self
            .downstream
            .create_issue(repo, &issue_title, &issue_body)
            .await
            .map_err(failed(PublishStep::CreateIssue))?;
        info!(issue = %issue, "created issue");

        // 5. Pull request linked to the issue. The issue may not be visible
        // to the PR endpoint right away, so every failure is retried.
        let pr = PullRequest {
            title: issue_title,
            head: work_branch.clone(),
            base: base.to_string(),
            body: format!("Patches from {} ({} commits)", config.scm_repo, batch.len()),
            issue: issue.clone(),
        };
        self.pr_retry
            .run(
                "create pull request",
                |_| self.downstream.create_pull_request(repo, &pr),
                |_| true,
            )
            .await
            .map_err(|err| match err {
                RetryError::Exhausted { attempts, last } => PublishError::Exhausted {
                    step: PublishStep::CreatePullRequest,
                    attempts,
                    source: last,
                },
                RetryError::Aborted { error, .. } => PublishError::Step {
                    step: PublishStep::CreatePullRequest,
                    source: error,
                },
            })?;
        info!(issue = %issue, head = %work_branch, "created pull request");

        // 6. Only now does the watermark move.
        self.store.update_watermark(&key, &newest.id).await?;
        obs::emit_watermark_advanced(&key, config.watermark(), &newest.id);

        if let Err(err) = self.issues.record_issue(IssueRecord::new(&key, &issue)).await {
            warn!(issue = %issue, error = %err, "failed to record issue");
        }
        obs::emit_publish_completed(&key, &work_branch, &issue, batch.len());

        Ok(PublishResult {
            repo: config.repo.clone(),
            branch: config.branch.clone(),
            work_branch,
            issue,
            watermark: newest.id.clone(),
            patches,
        })
    }
}
