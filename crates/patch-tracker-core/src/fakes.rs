//! Scripted in-memory collaborators for tests.
//!
//! [`ScriptedDownstream`] records every downstream mutation and can be told
//! to fail specific calls; [`ScriptedSource`] replays queued sync outcomes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracking_state::{BackendKind, TrackingConfig, TrackingKey};

use crate::downstream::{DownstreamApi, PullRequest, RemoteFile};
use crate::http::ApiError;
use crate::upstream::{SourceError, SyncOutcome, UpstreamSource};

/// One recorded downstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownstreamCall {
    CreateBranch {
        repo: String,
        base: String,
        branch: String,
    },
    CreateFile {
        branch: String,
        path: String,
        content: Vec<u8>,
        message: String,
    },
    GetFile {
        branch: String,
        path: String,
    },
    UpdateFile {
        branch: String,
        path: String,
        content: String,
        sha: String,
    },
    CreateIssue {
        title: String,
        body: String,
    },
    CreatePullRequest(PullRequest),
}

#[derive(Default)]
struct DownstreamState {
    calls: Vec<DownstreamCall>,
    files: HashMap<(String, String), RemoteFile>,
    fail_branch: bool,
    fail_file_upload_at: Option<usize>,
    file_uploads: usize,
    fail_issue: bool,
    pr_failures_left: u32,
    issues_created: u32,
}

/// Downstream API that records calls and fails on request.
#[derive(Default)]
pub struct ScriptedDownstream {
    state: Mutex<DownstreamState>,
}

fn server_error(what: &str) -> ApiError {
    ApiError::Status {
        method: "POST".to_string(),
        url: format!("scripted://{what}"),
        status: 500,
        body: format!("scripted failure: {what}"),
    }
}

impl ScriptedDownstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file as existing on `branch`.
    pub fn with_file(self, branch: &str, path: &str, content: &str, sha: &str) -> Self {
        self.state.lock().unwrap().files.insert(
            (branch.to_string(), path.to_string()),
            RemoteFile {
                content: content.to_string(),
                sha: sha.to_string(),
            },
        );
        self
    }

    pub fn fail_branch(self) -> Self {
        self.state.lock().unwrap().fail_branch = true;
        self
    }

    /// Fail the `n`-th file creation (1-based).
    pub fn fail_file_upload_at(self, n: usize) -> Self {
        self.state.lock().unwrap().fail_file_upload_at = Some(n);
        self
    }

    pub fn fail_issue(self) -> Self {
        self.state.lock().unwrap().fail_issue = true;
        self
    }

    /// Fail the next `n` pull-request attempts.
    pub fn fail_pull_requests(self, n: u32) -> Self {
        self.state.lock().unwrap().pr_failures_left = n;
        self
    }

    pub fn calls(&self) -> Vec<DownstreamCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&DownstreamCall) -> bool) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }

    /// Bytes of the last upload of `path` to `branch`.
    pub fn uploaded(&self, branch: &str, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .rev()
            .find_map(|call| match call {
                DownstreamCall::CreateFile {
                    branch: b,
                    path: p,
                    content,
                    ..
                } if b == branch && p == path => Some(content.clone()),
                _ => None,
            })
    }

    pub fn file(&self, branch: &str, path: &str) -> Option<RemoteFile> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(&(branch.to_string(), path.to_string()))
            .cloned()
    }
}

#[async_trait]
impl DownstreamApi for ScriptedDownstream {
    async fn create_branch(&self, repo: &str, base: &str, branch: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DownstreamCall::CreateBranch {
            repo: repo.to_string(),
            base: base.to_string(),
            branch: branch.to_string(),
        });
        if state.fail_branch {
            return Err(server_error("create_branch"));
        }
        Ok(())
    }

    async fn create_file(
        &self,
        _repo: &str,
        branch: &str,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DownstreamCall::CreateFile {
            branch: branch.to_string(),
            path: path.to_string(),
            content: content.to_vec(),
            message: message.to_string(),
        });
        state.file_uploads += 1;
        let upload = state.file_uploads;
        if state.fail_file_upload_at == Some(upload) {
            return Err(server_error("create_file"));
        }
        state.files.insert(
            (branch.to_string(), path.to_string()),
            RemoteFile {
                content: String::from_utf8_lossy(content).into_owned(),
                sha: format!("sha-{upload}"),
            },
        );
        Ok(())
    }

    async fn get_file(
        &self,
        _repo: &str,
        branch: &str,
        path: &str,
    ) -> Result<Option<RemoteFile>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DownstreamCall::GetFile {
            branch: branch.to_string(),
            path: path.to_string(),
        });
        Ok(state
            .files
            .get(&(branch.to_string(), path.to_string()))
            .cloned())
    }

    async fn update_file(
        &self,
        _repo: &str,
        branch: &str,
        path: &str,
        content: &str,
        sha: &str,
        _message: &str,
    ) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DownstreamCall::UpdateFile {
            branch: branch.to_string(),
            path: path.to_string(),
            content: content.to_string(),
            sha: sha.to_string(),
        });
        state.files.insert(
            (branch.to_string(), path.to_string()),
            RemoteFile {
                content: content.to_string(),
                sha: format!("{sha}-next"),
            },
        );
        Ok(())
    }

    async fn create_issue(&self, _repo: &str, title: &str, body: &str) -> Result<String, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DownstreamCall::CreateIssue {
            title: title.to_string(),
            body: body.to_string(),
        });
        if state.fail_issue {
            return Err(server_error("create_issue"));
        }
        state.issues_created += 1;
        Ok(format!("I{}", state.issues_created))
    }

    async fn create_pull_request(&self, _repo: &str, pr: &PullRequest) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DownstreamCall::CreatePullRequest(pr.clone()));
        if state.pr_failures_left > 0 {
            state.pr_failures_left -= 1;
            return Err(server_error("create_pull_request"));
        }
        Ok(())
    }
}

/// Upstream source replaying queued outcomes per tracking.
///
/// With nothing queued for a tracking, `sync` returns `SyncOutcome::Empty`.
pub struct ScriptedSource {
    kind: BackendKind,
    queued: Mutex<HashMap<TrackingKey, VecDeque<Result<SyncOutcome, SourceError>>>>,
    delay: Duration,
    syncs: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            queued: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            syncs: AtomicUsize::new(0),
        }
    }

    /// Sleep this long inside every `sync`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push(&self, key: &TrackingKey, result: Result<SyncOutcome, SourceError>) {
        self.queued
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .push_back(result);
    }

    pub fn sync_count(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamSource for ScriptedSource {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn sync(&self, config: &TrackingConfig) -> Result<SyncOutcome, SourceError> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&config.key())
            .and_then(VecDeque::pop_front);
        next.unwrap_or(Ok(SyncOutcome::Empty))
    }
}
