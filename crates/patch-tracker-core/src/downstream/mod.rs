//! Downstream repository API used by the publish pipeline.

pub mod gitee;

use async_trait::async_trait;

use crate::http::ApiError;
pub use gitee::GiteeClient;

/// A file read back from the downstream repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Decoded UTF-8 content.
    pub content: String,
    /// Version token required to update the file.
    pub sha: String,
}

/// Pull request to open from a patch-tracking branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
    pub issue: String,
}

/// Mutations the pipeline performs on the downstream repository.
///
/// `repo` is always `owner/name`.
#[async_trait]
pub trait DownstreamApi: Send + Sync {
    async fn create_branch(&self, repo: &str, base: &str, branch: &str) -> Result<(), ApiError>;

    /// `content` is uploaded byte for byte.
    async fn create_file(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), ApiError>;

    /// `None` when `path` does not exist on `branch`.
    async fn get_file(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
    ) -> Result<Option<RemoteFile>, ApiError>;

    async fn update_file(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
        content: &str,
        sha: &str,
        message: &str,
    ) -> Result<(), ApiError>;

    /// Returns the issue number assigned by the service.
    async fn create_issue(&self, repo: &str, title: &str, body: &str) -> Result<String, ApiError>;

    async fn create_pull_request(&self, repo: &str, pr: &PullRequest) -> Result<(), ApiError>;
}

/// `owner/name` of a downstream repository, accepting full gitee URLs.
pub fn repo_path(repo: &str) -> Result<&str, ApiError> {
    let path = repo
        .trim()
        .trim_start_matches("https://gitee.com/")
        .trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    match path.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok(path)
        }
        _ => Err(ApiError::InvalidRepo(repo.to_string())),
    }
}

/// Path of the packaging descriptor: `<name>.spec` at the repository root.
pub fn spec_file_path(repo: &str) -> Result<String, ApiError> {
    let path = repo_path(repo)?;
    let name = path.rsplit('/').next().unwrap_or(path);
    Ok(format!("{name}.spec"))
}
