//! Upstream source that only talks to a hosted repository's query API.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use tracking_state::{BackendKind, TrackingConfig};

use super::github::{UpstreamApi, UpstreamCommit};
use super::{github_commit_url, CommitRecord, PatchBatch, SourceError, SyncOutcome, UpstreamSource};

/// How many recent commits are listed when looking for the watermark, and
/// how many may follow it in one batch.
pub const LOOKBACK_LIMIT: usize = 100;

/// Computes batches through [`UpstreamApi`] calls; no local clone.
#[derive(Clone)]
pub struct RemoteApiSource {
    api: Arc<dyn UpstreamApi>,
    lookback: usize,
}

impl RemoteApiSource {
    pub fn new(api: Arc<dyn UpstreamApi>) -> Self {
        Self {
            api,
            lookback: LOOKBACK_LIMIT,
        }
    }

    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = lookback.max(1);
        self
    }
}

/// Full ids compare equal; an abbreviated id (7+ chars) matches its prefix.
fn same_commit(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (short, long) = if a.len() < b.len() { (a, b) } else { (b, a) };
    short.len() >= 7 && long.starts_with(short)
}

#[async_trait]
impl UpstreamSource for RemoteApiSource {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteApi
    }

    async fn sync(&self, config: &TrackingConfig) -> Result<SyncOutcome, SourceError> {
        let repo = config.scm_repo.as_str();
        let branch = config.scm_branch.as_str();

        let tip = self
            .api
            .branch_tip(repo, branch)
            .await?
            .ok_or_else(|| SourceError::BranchNotFound {
                locator: repo.to_string(),
                branch: branch.to_string(),
            })?;

        let Some(watermark) = config.watermark() else {
            return Ok(SyncOutcome::Bootstrap { tip });
        };
        if same_commit(&tip, watermark) {
            return Ok(SyncOutcome::Empty);
        }

        let recent = self.api.recent_commits(repo, branch, self.lookback).await?;
        if !recent.iter().any(|id| same_commit(id, watermark)) {
            return Err(SourceError::diverged(format!(
                "watermark {watermark} is not among the {} most recent commits of {repo}@{branch}",
                self.lookback
            )));
        }

        // First-parent walk from the tip over the commits the watermark
        // does not reach.
        let pending: HashSet<String> = self
            .api
            .commits_since(repo, watermark, &tip)
            .await?
            .into_iter()
            .collect();
        if pending.len() > self.lookback {
            return Err(SourceError::diverged(format!(
                "{} commits of {repo}@{branch} follow watermark {watermark}, more than the {} allowed",
                pending.len(),
                self.lookback
            )));
        }

        let mut walked: Vec<UpstreamCommit> = Vec::new();
        let mut current = Some(tip);
        while let Some(id) = current.take().filter(|id| pending.contains(id)) {
            let info = self.api.commit_info(repo, &id).await?;
            current = info.parent.clone();
            walked.push(info);
        }
        if walked.is_empty() {
            return Ok(SyncOutcome::Empty);
        }
        walked.reverse();
        if let Some(oldest) = walked.first() {
            if !oldest
                .parent
                .as_deref()
                .is_some_and(|parent| same_commit(parent, watermark))
            {
                warn!(
                    commit = %oldest.id,
                    watermark,
                    "watermark is off the first-parent line; first patch spans the merge"
                );
            }
        }

        let mut commits = Vec::with_capacity(walked.len());
        let mut previous = watermark.to_string();
        for info in walked {
            let diff = self.api.compare_diff(repo, &previous, &info.id).await?;
            previous = info.id.clone();
            commits.push(CommitRecord {
                url: github_commit_url(repo, &info.id),
                id: info.id,
                message: info.message,
                timestamp: info.timestamp,
                parent: info.parent,
                diff,
            });
        }

        debug!(repo, branch, commits = commits.len(), "computed batch");
        Ok(SyncOutcome::Batch(PatchBatch::new(commits)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ApiError;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    fn commit(id: &str, parents: &[&str]) -> (String, Vec<String>) {
        (id.to_string(), parents.iter().map(|p| p.to_string()).collect())
    }

    /// In-memory history: commits in creation order, root first, each with
    /// its parents (first parent first). The last commit is the tip.
    struct FakeApi {
        commits: Vec<(String, Vec<String>)>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeApi {
        fn linear(n: usize) -> Self {
            let commits = (1..=n)
                .map(|i| {
                    let parents = if i > 1 { vec![format!("c{}", i - 1)] } else { vec![] };
                    (format!("c{i}"), parents)
                })
                .collect();
            Self::history(commits)
        }

        fn history(commits: Vec<(String, Vec<String>)>) -> Self {
            Self {
                commits,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn index(&self, id: &str) -> Option<usize> {
            self.commits.iter().position(|(c, _)| c == id)
        }

        fn ancestors(&self, id: &str) -> HashSet<String> {
            let mut seen = HashSet::new();
            let mut stack = vec![id.to_string()];
            while let Some(id) = stack.pop() {
                if let Some(idx) = self.index(&id) {
                    if seen.insert(id) {
                        stack.extend(self.commits[idx].1.iter().cloned());
                    }
                }
            }
            seen
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UpstreamApi for FakeApi {
        async fn branch_tip(&self, _repo: &str, branch: &str) -> Result<Option<String>, ApiError> {
            self.calls.lock().unwrap().push("branch".to_string());
            Ok((branch == "main")
                .then(|| self.commits.last().map(|(id, _)| id.clone()))
                .flatten())
        }

        async fn recent_commits(
            &self,
            _repo: &str,
            _branch: &str,
            limit: usize,
        ) -> Result<Vec<String>, ApiError> {
            self.calls.lock().unwrap().push("list".to_string());
            Ok(self
                .commits
                .iter()
                .rev()
                .take(limit)
                .map(|(id, _)| id.clone())
                .collect())
        }

        async fn commit_info(&self, _repo: &str, commit: &str) -> Result<UpstreamCommit, ApiError> {
            self.calls.lock().unwrap().push(format!("info:{commit}"));
            let idx = self.index(commit).ok_or_else(|| ApiError::Status {
                method: "GET".to_string(),
                url: commit.to_string(),
                status: 404,
                body: "Not Found".to_string(),
            })?;
            Ok(UpstreamCommit {
                id: commit.to_string(),
                message: format!("message {commit}"),
                timestamp: Utc.timestamp_opt(1_700_000_000 + idx as i64, 0).unwrap(),
                parent: self.commits[idx].1.first().cloned(),
            })
        }

        async fn commits_since(
            &self,
            _repo: &str,
            base: &str,
            head: &str,
        ) -> Result<Vec<String>, ApiError> {
            self.calls.lock().unwrap().push(format!("since:{base}...{head}"));
            let reached = self.ancestors(base);
            Ok(self
                .commits
                .iter()
                .map(|(id, _)| id.clone())
                .filter(|id| self.ancestors(head).contains(id) && !reached.contains(id))
                .collect())
        }

        async fn compare_diff(&self, _repo: &str, from: &str, to: &str) -> Result<Vec<u8>, ApiError> {
            self.calls.lock().unwrap().push(format!("compare:{from}...{to}"));
            Ok(format!("diff {from}..{to}").into_bytes())
        }
    }

    fn tracking(watermark: Option<&str>) -> TrackingConfig {
        TrackingConfig {
            repo: "src-openeuler/zlib".to_string(),
            branch: "master".to_string(),
            backend: BackendKind::RemoteApi,
            scm_repo: "madler/zlib".to_string(),
            scm_branch: "main".to_string(),
            watermark: watermark.map(str::to_string),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn batch_is_watermark_exclusive_and_oldest_first() {
        let api = Arc::new(FakeApi::linear(3));
        let source = RemoteApiSource::new(api.clone());

        let outcome = source.sync(&tracking(Some("c1"))).await.unwrap();
        let batch = match outcome {
            SyncOutcome::Batch(batch) => batch,
            other => panic!("expected batch, got {other:?}"),
        };
        let ids: Vec<&str> = batch.commits().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c3"]);
        assert_eq!(batch.commits()[0].diff, b"diff c1..c2");
        assert_eq!(batch.commits()[1].diff, b"diff c2..c3");
        assert_eq!(
            batch.commits()[1].url.as_deref(),
            Some("https://github.com/madler/zlib/commit/c3")
        );
        assert!(api.calls().contains(&"compare:c2...c3".to_string()));
    }

    #[tokio::test]
    async fn empty_watermark_requests_bootstrap() {
        let api = Arc::new(FakeApi::linear(3));
        let source = RemoteApiSource::new(api.clone());

        let outcome = source.sync(&tracking(None)).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Bootstrap {
                tip: "c3".to_string()
            }
        );
        assert_eq!(api.calls(), vec!["branch"]);
    }

    #[tokio::test]
    async fn tip_equal_to_watermark_is_empty() {
        let source = RemoteApiSource::new(Arc::new(FakeApi::linear(3)));
        assert_eq!(
            source.sync(&tracking(Some("c3"))).await.unwrap(),
            SyncOutcome::Empty
        );
    }

    #[tokio::test]
    async fn watermark_outside_recent_window_diverges() {
        let api = Arc::new(FakeApi::linear(150));
        let source = RemoteApiSource::new(api.clone());

        let err = source.sync(&tracking(Some("c10"))).await.unwrap_err();
        assert!(err.is_diverged(), "{err}");
        assert!(!api.calls().iter().any(|c| c.starts_with("info:")));
    }

    #[tokio::test]
    async fn unknown_watermark_diverges() {
        let source = RemoteApiSource::new(Arc::new(FakeApi::linear(5)));
        let err = source.sync(&tracking(Some("rewritten"))).await.unwrap_err();
        assert!(err.is_diverged(), "{err}");
    }

    #[tokio::test]
    async fn walk_is_bounded_by_lookback() {
        let api = Arc::new(FakeApi::linear(10));
        let source = RemoteApiSource::new(api.clone()).with_lookback(3);

        // Only c10, c9 and c8 are listed.
        let err = source.sync(&tracking(Some("c7"))).await.unwrap_err();
        assert!(err.is_diverged());

        let outcome = source.sync(&tracking(Some("c8"))).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Batch(ref b) if b.len() == 2));
    }

    #[tokio::test]
    async fn watermark_merged_from_side_branch_spans_the_merge() {
        // c0 - x - m on the first-parent line; the watermark c1 branched off
        // c0 and came back in as m's second parent.
        let api = Arc::new(FakeApi::history(vec![
            commit("c0", &[]),
            commit("c1", &["c0"]),
            commit("x", &["c0"]),
            commit("m", &["x", "c1"]),
        ]));
        let source = RemoteApiSource::new(api.clone());

        let outcome = source.sync(&tracking(Some("c1"))).await.unwrap();

        let SyncOutcome::Batch(batch) = outcome else {
            panic!("expected a batch, got {outcome:?}");
        };
        let ids: Vec<&str> = batch.commits().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "m"]);
        assert_eq!(batch.commits()[0].diff, b"diff c1..x");
        assert_eq!(batch.commits()[0].parent.as_deref(), Some("c0"));
        assert_eq!(batch.commits()[1].diff, b"diff x..m");
        // The walk stops at c0 without fetching it.
        assert!(!api.calls().contains(&"info:c0".to_string()));
    }

    #[tokio::test]
    async fn too_many_commits_after_watermark_diverges() {
        // w is among the three most recent commits, but the merge brings in
        // five commits it does not reach.
        let api = Arc::new(FakeApi::history(vec![
            commit("c0", &[]),
            commit("a1", &["c0"]),
            commit("a2", &["a1"]),
            commit("a3", &["a2"]),
            commit("a4", &["a3"]),
            commit("w", &["c0"]),
            commit("m", &["a4", "w"]),
        ]));
        let source = RemoteApiSource::new(api.clone()).with_lookback(3);

        let err = source.sync(&tracking(Some("w"))).await.unwrap_err();

        assert!(err.is_diverged(), "{err}");
        assert!(!api.calls().iter().any(|c| c.starts_with("info:")));
    }

    #[tokio::test]
    async fn missing_branch_is_reported() {
        let source = RemoteApiSource::new(Arc::new(FakeApi::linear(2)));
        let mut config = tracking(Some("c1"));
        config.scm_branch = "gone".to_string();
        assert!(matches!(
            source.sync(&config).await.unwrap_err(),
            SourceError::BranchNotFound { .. }
        ));
    }

    #[test]
    fn abbreviated_ids_match_full_ids() {
        assert!(same_commit("0123456789abcdef", "0123456"));
        assert!(!same_commit("0123456789abcdef", "012345"));
        assert!(same_commit("c1", "c1"));
        assert!(!same_commit("c1", "c2"));
    }
}
