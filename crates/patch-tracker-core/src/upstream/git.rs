//! Git plumbing over a bare mirror repository.
//!
//! Every operation shells out to the `git` CLI with an explicit `--git-dir`
//! so no working tree is ever needed.

use std::path::{Path, PathBuf};
use std::process::Output;

use chrono::{DateTime, TimeZone, Utc};
use tokio::process::Command;
use tracing::debug;

/// Failure running a git command against a mirror.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("failed to run git: {0}")]
    Io(#[from] std::io::Error),

    #[error("`git {command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("unexpected git output: {0}")]
    Parse(String),
}

/// A bare mirror clone of an upstream repository.
#[derive(Debug, Clone)]
pub struct MirrorRepo {
    git_dir: PathBuf,
}

impl MirrorRepo {
    pub fn new(git_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_dir: git_dir.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.git_dir
    }

    /// A mirror exists once its `HEAD` file does.
    pub fn is_initialized(&self) -> bool {
        self.git_dir.join("HEAD").is_file()
    }

    /// `git clone --mirror <locator> <git_dir>`.
    pub async fn clone_mirror(&self, locator: &str) -> Result<(), GitError> {
        let output = base_command()
            .arg("clone")
            .arg("--mirror")
            .arg("--quiet")
            .arg(locator)
            .arg(&self.git_dir)
            .output()
            .await?;
        check("clone --mirror", output).map(drop)
    }

    /// Fetch every ref from `origin`, pruning refs deleted upstream.
    pub async fn fetch(&self) -> Result<(), GitError> {
        self.run(&["fetch", "--prune", "--quiet", "origin"])
            .await
            .map(drop)
    }

    /// Commit id at the tip of `branch`, or `None` if the branch is absent.
    pub async fn resolve_branch(&self, branch: &str) -> Result<Option<String>, GitError> {
        self.rev_parse(&format!("refs/heads/{branch}^{{commit}}"))
            .await
    }

    /// Full id of `commit`, or `None` if the mirror does not contain it.
    /// Anything but an (abbreviated) hex object id resolves to `None`.
    pub async fn resolve_commit(&self, commit: &str) -> Result<Option<String>, GitError> {
        if !is_object_id(commit) {
            return Ok(None);
        }
        self.rev_parse(&format!("{commit}^{{commit}}")).await
    }

    /// `git merge-base --is-ancestor`: exit 0 is true, exit 1 is false.
    pub async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, GitError> {
        let output = self
            .command(&[
                "merge-base",
                "--is-ancestor",
                "--end-of-options",
                ancestor,
                descendant,
            ])
            .output()
            .await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(command_error("merge-base --is-ancestor", &output)),
        }
    }

    /// Commits reachable from `tip` along first parents, stopping before any
    /// ancestor of `stop`. Newest first, each paired with its first parent.
    pub async fn first_parent_chain(
        &self,
        tip: &str,
        stop: &str,
    ) -> Result<Vec<(String, Option<String>)>, GitError> {
        let exclude = format!("^{stop}");
        let stdout = self
            .run(&[
                "rev-list",
                "--first-parent",
                "--parents",
                "--end-of-options",
                tip,
                &exclude,
            ])
            .await?;

        let mut chain = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            let mut ids = line.split_whitespace();
            let id = ids
                .next()
                .ok_or_else(|| GitError::Parse(format!("empty rev-list line: {line:?}")))?;
            chain.push((id.to_string(), ids.next().map(str::to_string)));
        }
        Ok(chain)
    }

    /// Committer timestamp and raw message of `commit`.
    pub async fn commit_info(&self, commit: &str) -> Result<(DateTime<Utc>, String), GitError> {
        let stdout = self
            .run(&["log", "-1", "--format=%ct%x00%B", "--end-of-options", commit])
            .await?;
        parse_commit_info(&stdout)
    }

    /// Binary-safe unified diff from `from` to `to`, as raw bytes.
    pub async fn diff(&self, from: &str, to: &str) -> Result<Vec<u8>, GitError> {
        self.run_raw(&["diff", "--binary", "--end-of-options", from, to])
            .await
    }

    // -- private helpers -----------------------------------------------------

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = base_command();
        cmd.arg("--git-dir").arg(&self.git_dir).args(args);
        cmd
    }

    /// Run and decode stdout leniently; commit messages and ids never
    /// need to round-trip byte for byte.
    async fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let stdout = self.run_raw(args).await?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    async fn run_raw(&self, args: &[&str]) -> Result<Vec<u8>, GitError> {
        debug!(git_dir = %self.git_dir.display(), args = ?args, "git");
        let output = self.command(args).output().await?;
        check(&args.join(" "), output)
    }

    async fn rev_parse(&self, rev: &str) -> Result<Option<String>, GitError> {
        let output = self
            .command(&["rev-parse", "--verify", "--quiet", rev])
            .output()
            .await?;
        if output.status.success() {
            let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if id.is_empty() {
                return Err(GitError::Parse(format!("rev-parse {rev} printed nothing")));
            }
            Ok(Some(id))
        } else if output.status.code() == Some(1) {
            Ok(None)
        } else {
            Err(command_error("rev-parse", &output))
        }
    }
}

fn base_command() -> Command {
    let mut cmd = Command::new("git");
    cmd.env("GIT_TERMINAL_PROMPT", "0").kill_on_drop(true);
    cmd
}

fn check(command: &str, output: Output) -> Result<Vec<u8>, GitError> {
    if !output.status.success() {
        return Err(command_error(command, &output));
    }
    Ok(output.stdout)
}

/// 4 to 64 hex digits: an abbreviated or full SHA-1/SHA-256 object id.
fn is_object_id(rev: &str) -> bool {
    (4..=64).contains(&rev.len()) && rev.bytes().all(|b| b.is_ascii_hexdigit())
}

fn command_error(command: &str, output: &Output) -> GitError {
    GitError::Command {
        command: command.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn parse_commit_info(stdout: &str) -> Result<(DateTime<Utc>, String), GitError> {
    let (secs, message) = stdout
        .split_once('\0')
        .ok_or_else(|| GitError::Parse(format!("missing separator in {stdout:?}")))?;
    let secs: i64 = secs
        .trim()
        .parse()
        .map_err(|e| GitError::Parse(format!("bad commit time {secs:?}: {e}")))?;
    let timestamp = Utc
        .timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| GitError::Parse(format!("commit time out of range: {secs}")))?;
    Ok((timestamp, message.trim_end().to_string()))
}
