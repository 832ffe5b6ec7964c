//! Upstream source backed by a local mirror clone.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use tracking_state::{BackendKind, TrackingConfig};

use super::git::{GitError, MirrorRepo};
use super::mirror::{mirror_dir_name, MirrorLocks};
use super::{github_commit_url, CommitRecord, PatchBatch, SourceError, SyncOutcome, UpstreamSource};
use crate::retry::{RetryError, RetryPolicy};

/// Computes batches from a mirror under `base_path`, one mirror per
/// upstream locator.
#[derive(Clone)]
pub struct LocalGitSource {
    base_path: PathBuf,
    locks: MirrorLocks,
    fetch_retry: RetryPolicy,
}

impl LocalGitSource {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            locks: MirrorLocks::new(),
            fetch_retry: RetryPolicy::MIRROR_FETCH,
        }
    }

    pub fn with_fetch_retry(mut self, policy: RetryPolicy) -> Self {
        self.fetch_retry = policy;
        self
    }

    pub fn with_locks(mut self, locks: MirrorLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn mirror_for(&self, locator: &str) -> MirrorRepo {
        MirrorRepo::new(self.base_path.join(mirror_dir_name(locator)))
    }

    /// Clone the mirror if missing, otherwise fetch, under the fetch retry
    /// policy. Exhausting the policy is a transient failure.
    async fn refresh(&self, mirror: &MirrorRepo, locator: &str) -> Result<(), SourceError> {
        let label = format!("refresh mirror {locator}");
        let result = self
            .fetch_retry
            .run(
                &label,
                |attempt| async move {
                    if mirror.is_initialized() {
                        mirror.fetch().await
                    } else {
                        if mirror.path().exists() {
                            debug!(path = %mirror.path().display(), "removing incomplete mirror");
                            tokio::fs::remove_dir_all(mirror.path()).await?;
                        }
                        info!(locator, attempt, path = %mirror.path().display(), "cloning mirror");
                        mirror.clone_mirror(locator).await
                    }
                },
                |err| matches!(err, GitError::Command { .. }),
            )
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(RetryError::Exhausted { attempts, last }) => Err(SourceError::Transient(format!(
                "mirror refresh of {locator} failed after {attempts} attempts: {last}"
            ))),
            Err(RetryError::Aborted { error, .. }) => Err(SourceError::Git(error)),
        }
    }
}

#[async_trait]
impl UpstreamSource for LocalGitSource {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalGit
    }

    async fn sync(&self, config: &TrackingConfig) -> Result<SyncOutcome, SourceError> {
        let locator = config.scm_repo.as_str();
        let mirror = self.mirror_for(locator);

        if let Some(parent) = mirror.path().parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(GitError::from)?;
        }

        let _guard = self.locks.lock(mirror.path()).await;
        self.refresh(&mirror, locator).await?;

        let tip = mirror
            .resolve_branch(&config.scm_branch)
            .await?
            .ok_or_else(|| SourceError::BranchNotFound {
                locator: locator.to_string(),
                branch: config.scm_branch.clone(),
            })?;

        let Some(watermark) = config.watermark() else {
            return Ok(SyncOutcome::Bootstrap { tip });
        };

        let Some(watermark) = mirror.resolve_commit(watermark).await? else {
            return Err(SourceError::diverged(format!(
                "watermark {watermark} no longer exists in {locator}"
            )));
        };
        if watermark == tip {
            return Ok(SyncOutcome::Empty);
        }
        if !mirror.is_ancestor(&watermark, &tip).await? {
            return Err(SourceError::diverged(format!(
                "watermark {watermark} is not an ancestor of {}@{tip}",
                config.scm_branch
            )));
        }

        let mut chain = mirror.first_parent_chain(&tip, &watermark).await?;
        chain.reverse();
        if chain.is_empty() {
            return Ok(SyncOutcome::Empty);
        }
        if let Some((oldest, parent)) = chain.first() {
            if parent.as_deref() != Some(watermark.as_str()) {
                warn!(
                    commit = %oldest,
                    watermark = %watermark,
                    "watermark is off the first-parent line; first patch spans the merge"
                );
            }
        }

        let with_url = locator.contains("github.com");
        let mut commits = Vec::with_capacity(chain.len());
        let mut previous = watermark;
        for (id, parent) in chain {
            let (timestamp, message) = mirror.commit_info(&id).await?;
            let diff = mirror.diff(&previous, &id).await?;
            let url = if with_url {
                github_commit_url(locator, &id)
            } else {
                None
            };
            commits.push(CommitRecord {
                id: id.clone(),
                message,
                timestamp,
                parent,
                diff,
                url,
            });
            previous = id;
        }

        debug!(locator, branch = %config.scm_branch, commits = commits.len(), "computed batch");
        Ok(SyncOutcome::Batch(PatchBatch::new(commits)))
    }
}
