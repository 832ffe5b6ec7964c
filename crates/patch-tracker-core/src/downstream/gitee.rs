//! Gitee v5 REST client.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{repo_path, DownstreamApi, PullRequest, RemoteFile};
use crate::http::{ApiError, CredentialCheck, JsonApi};
use crate::retry::RetryPolicy;

pub const DEFAULT_GITEE_API: &str = "https://gitee.com/api/v5";

/// Gitee client authenticated with a personal access token.
///
/// Every call is a single attempt; the pipeline decides what to retry.
#[derive(Clone)]
pub struct GiteeClient {
    api: JsonApi,
    token: String,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    number: Value,
}

impl GiteeClient {
    pub fn new(token: &str) -> Result<Self, ApiError> {
        Self::with_base_url(DEFAULT_GITEE_API, token)
    }

    pub fn with_base_url(base_url: &str, token: &str) -> Result<Self, ApiError> {
        Ok(Self {
            api: JsonApi::new(base_url, RetryPolicy::ONCE)?,
            token: token.to_string(),
        })
    }

    async fn send_body(&self, method: Method, path: &str, mut body: Value) -> Result<String, ApiError> {
        body["access_token"] = Value::String(self.token.clone());
        Ok(self
            .api
            .send_text(method, path, false, |req| req.json(&body))
            .await?
            .unwrap_or_default())
    }
}

/// Decode a contents response: an object carries the file, an empty array
/// means the path does not exist.
fn parse_file_response(body: &str) -> Result<Option<RemoteFile>, String> {
    let value: Value = serde_json::from_str(body).map_err(|e| e.to_string())?;
    let Some(object) = value.as_object() else {
        return Ok(None);
    };
    let (Some(content), Some(sha)) = (
        object.get("content").and_then(Value::as_str),
        object.get("sha").and_then(Value::as_str),
    ) else {
        return Ok(None);
    };

    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64
        .decode(compact.as_bytes())
        .map_err(|e| format!("invalid base64 content: {e}"))?;
    let content = String::from_utf8(bytes).map_err(|e| format!("content is not UTF-8: {e}"))?;
    Ok(Some(RemoteFile {
        content,
        sha: sha.to_string(),
    }))
}

fn issue_number(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl DownstreamApi for GiteeClient {
    async fn create_branch(&self, repo: &str, base: &str, branch: &str) -> Result<(), ApiError> {
        let path = format!("/repos/{}/branches", repo_path(repo)?);
        self.send_body(
            Method::POST,
            &path,
            json!({ "refs": base, "branch_name": branch }),
        )
        .await
        .map(drop)
    }

    async fn create_file(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), ApiError> {
        let url_path = format!("/repos/{}/contents/{path}", repo_path(repo)?);
        debug!(repo, branch, path, bytes = content.len(), "creating file");
        self.send_body(
            Method::POST,
            &url_path,
            json!({
                "content": BASE64.encode(content),
                "message": message,
                "branch": branch,
            }),
        )
        .await
        .map(drop)
    }

    async fn get_file(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
    ) -> Result<Option<RemoteFile>, ApiError> {
        let url_path = format!("/repos/{}/contents/{path}", repo_path(repo)?);
        let token = self.token.as_str();
        let Some(body) = self
            .api
            .send_text(Method::GET, &url_path, true, |req| {
                req.query(&[("access_token", token), ("ref", branch)])
            })
            .await?
        else {
            return Ok(None);
        };
        parse_file_response(&body).map_err(|message| ApiError::Decode {
            url: self.api.url(&url_path),
            message,
        })
    }

    async fn update_file(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
        content: &str,
        sha: &str,
        message: &str,
    ) -> Result<(), ApiError> {
        let url_path = format!("/repos/{}/contents/{path}", repo_path(repo)?);
        self.send_body(
            Method::PUT,
            &url_path,
            json!({
                "content": BASE64.encode(content.as_bytes()),
                "sha": sha,
                "message": message,
                "branch": branch,
            }),
        )
        .await
        .map(drop)
    }

    async fn create_issue(&self, repo: &str, title: &str, body: &str) -> Result<String, ApiError> {
        let full = repo_path(repo)?;
        let (owner, name) = full
            .split_once('/')
            .ok_or_else(|| ApiError::InvalidRepo(repo.to_string()))?;
        let path = format!("/repos/{owner}/issues");
        let response = self
            .send_body(
                Method::POST,
                &path,
                json!({ "repo": name, "title": title, "body": body }),
            )
            .await?;

        let url = self.api.url(&path);
        let parsed: IssueResponse =
            serde_json::from_str(&response).map_err(|e| ApiError::Decode {
                url: url.clone(),
                message: e.to_string(),
            })?;
        issue_number(&parsed.number).ok_or_else(|| ApiError::Decode {
            url,
            message: format!("unexpected issue number {}", parsed.number),
        })
    }

    async fn create_pull_request(&self, repo: &str, pr: &PullRequest) -> Result<(), ApiError> {
        let path = format!("/repos/{}/pulls", repo_path(repo)?);
        self.send_body(
            Method::POST,
            &path,
            json!({
                "title": pr.title,
                "head": pr.head,
                "base": pr.base,
                "body": pr.body,
                "issue": pr.issue,
                "prune_source_branch": true,
            }),
        )
        .await
        .map(drop)
    }
}

#[async_trait]
impl CredentialCheck for GiteeClient {
    fn service(&self) -> &str {
        "gitee"
    }

    async fn verify_credentials(&self) -> Result<(), ApiError> {
        let token = self.token.as_str();
        self.api
            .send_text(Method::GET, "/user", false, |req| {
                req.query(&[("access_token", token)])
            })
            .await
            .map(drop)
    }
}
