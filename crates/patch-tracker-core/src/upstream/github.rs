//! GitHub REST client for the remote-API upstream backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Method;
use serde::Deserialize;

use crate::http::{ApiError, CredentialCheck, JsonApi};
use crate::retry::RetryPolicy;

pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";

const JSON_MEDIA_TYPE: &str = "application/vnd.github.v3+json";
const DIFF_MEDIA_TYPE: &str = "application/vnd.github.v3.diff";

/// Commit metadata as returned by the upstream query API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamCommit {
    pub id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub parent: Option<String>,
}

/// Query surface of a hosted upstream repository.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    /// Tip commit of `branch`, or `None` if the branch does not exist.
    async fn branch_tip(&self, repo: &str, branch: &str) -> Result<Option<String>, ApiError>;

    /// Ids of the most recent `limit` commits reachable from `branch`.
    async fn recent_commits(
        &self,
        repo: &str,
        branch: &str,
        limit: usize,
    ) -> Result<Vec<String>, ApiError>;

    async fn commit_info(&self, repo: &str, commit: &str) -> Result<UpstreamCommit, ApiError>;

    /// Ids of every commit reachable from `head` but not from `base`.
    async fn commits_since(&self, repo: &str, base: &str, head: &str)
        -> Result<Vec<String>, ApiError>;

    /// Unified diff between two commits, undecoded.
    async fn compare_diff(&self, repo: &str, from: &str, to: &str) -> Result<Vec<u8>, ApiError>;
}

/// `api.github.com` client authenticated with a personal access token.
#[derive(Clone)]
pub struct GitHubClient {
    api: JsonApi,
    token: String,
}

impl GitHubClient {
    pub fn new(token: &str) -> Result<Self, ApiError> {
        Self::with_base_url(DEFAULT_GITHUB_API, token, RetryPolicy::REMOTE_API)
    }

    pub fn with_base_url(base_url: &str, token: &str, retry: RetryPolicy) -> Result<Self, ApiError> {
        Ok(Self {
            api: JsonApi::new(base_url, retry)?,
            token: token.to_string(),
        })
    }

    fn auth(&self, accept: &'static str) -> impl Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder + '_ {
        move |req| {
            req.header(AUTHORIZATION, format!("token {}", self.token))
                .header(ACCEPT, accept)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ShaRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    commit: ShaRef,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    commit: CommitDetail,
    #[serde(default)]
    parents: Vec<ShaRef>,
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    #[serde(default)]
    commits: Vec<ShaRef>,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    message: String,
    committer: Signature,
}

#[derive(Debug, Deserialize)]
struct Signature {
    date: DateTime<Utc>,
}

fn parse_branch_tip(body: &str) -> Result<String, serde_json::Error> {
    serde_json::from_str::<BranchResponse>(body).map(|b| b.commit.sha)
}

fn parse_commit_list(body: &str) -> Result<Vec<String>, serde_json::Error> {
    serde_json::from_str::<Vec<ShaRef>>(body).map(|list| list.into_iter().map(|c| c.sha).collect())
}

fn parse_compare_commits(body: &str) -> Result<Vec<String>, serde_json::Error> {
    serde_json::from_str::<CompareResponse>(body)
        .map(|resp| resp.commits.into_iter().map(|c| c.sha).collect())
}

fn parse_commit(body: &str) -> Result<UpstreamCommit, serde_json::Error> {
    let resp: CommitResponse = serde_json::from_str(body)?;
    Ok(UpstreamCommit {
        id: resp.sha,
        message: resp.commit.message,
        timestamp: resp.commit.committer.date,
        parent: resp.parents.into_iter().next().map(|p| p.sha),
    })
}

fn decode_error(url: String, err: serde_json::Error) -> ApiError {
    ApiError::Decode {
        url,
        message: err.to_string(),
    }
}

#[async_trait]
impl UpstreamApi for GitHubClient {
    async fn branch_tip(&self, repo: &str, branch: &str) -> Result<Option<String>, ApiError> {
        let path = format!("/repos/{repo}/branches/{branch}");
        let Some(body) = self
            .api
            .send_text(Method::GET, &path, true, self.auth(JSON_MEDIA_TYPE))
            .await?
        else {
            return Ok(None);
        };
        parse_branch_tip(&body)
            .map(Some)
            .map_err(|e| decode_error(self.api.url(&path), e))
    }

    async fn recent_commits(
        &self,
        repo: &str,
        branch: &str,
        limit: usize,
    ) -> Result<Vec<String>, ApiError> {
        let path = format!("/repos/{repo}/commits");
        let per_page = limit.clamp(1, 100).to_string();
        let auth = self.auth(JSON_MEDIA_TYPE);
        let body = self
            .api
            .send_text(Method::GET, &path, false, |req| {
                auth(req).query(&[("sha", branch), ("per_page", per_page.as_str())])
            })
            .await?
            .unwrap_or_default();
        let mut ids = parse_commit_list(&body).map_err(|e| decode_error(self.api.url(&path), e))?;
        ids.truncate(limit);
        Ok(ids)
    }

    async fn commit_info(&self, repo: &str, commit: &str) -> Result<UpstreamCommit, ApiError> {
        let path = format!("/repos/{repo}/commits/{commit}");
        let body = self
            .api
            .send_text(Method::GET, &path, false, self.auth(JSON_MEDIA_TYPE))
            .await?
            .unwrap_or_default();
        parse_commit(&body).map_err(|e| decode_error(self.api.url(&path), e))
    }

    async fn commits_since(
        &self,
        repo: &str,
        base: &str,
        head: &str,
    ) -> Result<Vec<String>, ApiError> {
        let path = format!("/repos/{repo}/compare/{base}...{head}");
        let body = self
            .api
            .send_text(Method::GET, &path, false, self.auth(JSON_MEDIA_TYPE))
            .await?
            .unwrap_or_default();
        parse_compare_commits(&body).map_err(|e| decode_error(self.api.url(&path), e))
    }

    async fn compare_diff(&self, repo: &str, from: &str, to: &str) -> Result<Vec<u8>, ApiError> {
        let path = format!("/repos/{repo}/compare/{from}...{to}");
        Ok(self
            .api
            .send_bytes(Method::GET, &path, false, self.auth(DIFF_MEDIA_TYPE))
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl CredentialCheck for GitHubClient {
    fn service(&self) -> &str {
        "github"
    }

    async fn verify_credentials(&self) -> Result<(), ApiError> {
        self.api
            .send_text(Method::GET, "/user", false, self.auth(JSON_MEDIA_TYPE))
            .await
            .map(drop)
    }
}
