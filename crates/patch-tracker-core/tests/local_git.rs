//! LocalGit source against real repositories.
//!
//! Each test builds an upstream repository in a temp dir, points a tracking
//! at it through a `file://` locator and lets `LocalGitSource` mirror it.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use patch_tracker_core::fakes::{DownstreamCall, ScriptedDownstream};
use patch_tracker_core::retry::RetryPolicy;
use patch_tracker_core::{
    CycleOutcome, LocalGitSource, PublishPipeline, SourceError, SourceFactory, SyncOutcome,
    Tracker, UpstreamSource,
};
use tempfile::TempDir;
use tracing_test::traced_test;
use tracking_state::fakes::{MemoryIssueLog, MemoryTrackingStore};
use tracking_state::{BackendKind, TrackingConfig, TrackingStore};

struct Upstream {
    dir: TempDir,
}

impl Upstream {
    fn new() -> Self {
        let upstream = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        upstream.git(&["init", "--quiet", "--initial-branch=main"]);
        upstream
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn locator(&self) -> String {
        format!("file://{}", self.path().display())
    }

    fn git(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .arg("-C")
            .arg(self.path())
            .args(["-c", "user.name=Upstream Dev", "-c", "user.email=dev@upstream.test"])
            .args(args)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8(output.stdout).unwrap().trim().to_string()
    }

    /// Write `file` with `content` and commit it; returns the commit id.
    fn commit(&self, file: &str, content: &str, message: &str) -> String {
        self.commit_bytes(file, content.as_bytes(), message)
    }

    fn commit_bytes(&self, file: &str, content: &[u8], message: &str) -> String {
        std::fs::write(self.path().join(file), content).unwrap();
        self.git(&["add", file]);
        self.git(&["commit", "--quiet", "-m", message]);
        self.git(&["rev-parse", "HEAD"])
    }
}

fn tracking(upstream: &Upstream, watermark: Option<&str>) -> TrackingConfig {
    TrackingConfig {
        repo: "src-openeuler/zlib".to_string(),
        branch: "master".to_string(),
        backend: BackendKind::LocalGit,
        scm_repo: upstream.locator(),
        scm_branch: "main".to_string(),
        watermark: watermark.map(str::to_string),
        enabled: true,
    }
}

fn source(base: &Path) -> LocalGitSource {
    LocalGitSource::new(PathBuf::from(base)).with_fetch_retry(RetryPolicy::ONCE)
}

fn text(diff: &[u8]) -> String {
    String::from_utf8_lossy(diff).into_owned()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn harness(
    upstream: &Upstream,
    mirrors: &Path,
    watermark: &str,
) -> (TrackingConfig, Tracker, Arc<MemoryTrackingStore>, Arc<ScriptedDownstream>) {
    let config = tracking(upstream, Some(watermark));
    let store = Arc::new(MemoryTrackingStore::with_trackings([config.clone()]));
    let downstream = Arc::new(ScriptedDownstream::new().with_file(
        "master",
        "zlib.spec",
        "Name: zlib\nVersion: 1.3\nRelease: 1\nSource0: zlib-1.3.tar.gz\n\n%prep\n%setup -q\n\n%changelog\n",
        "spec-sha",
    ));
    let local: Arc<dyn UpstreamSource> = Arc::new(source(mirrors));
    let tracker = Tracker::new(
        store.clone(),
        SourceFactory::new(local.clone(), local),
        PublishPipeline::new(downstream.clone(), store.clone(), Arc::new(MemoryIssueLog::new())),
    );
    (config, tracker, store, downstream)
}

#[tokio::test]
async fn batch_holds_commits_after_watermark_oldest_first() {
    let upstream = Upstream::new();
    let c1 = upstream.commit("a.txt", "one\n", "first");
    let c2 = upstream.commit("a.txt", "one\ntwo\n", "second");
    let c3 = upstream.commit("b.txt", "three\n", "third\n\nwith a body");
    let mirrors = tempfile::tempdir().unwrap();

    let outcome = source(mirrors.path())
        .sync(&tracking(&upstream, Some(&c1)))
        .await
        .unwrap();

    let SyncOutcome::Batch(batch) = outcome else {
        panic!("expected a batch");
    };
    let ids: Vec<&str> = batch.commits().iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec![c2.as_str(), c3.as_str()]);

    let second = &batch.commits()[0];
    assert_eq!(second.message, "second");
    assert_eq!(second.parent.as_deref(), Some(c1.as_str()));
    assert!(text(&second.diff).contains("+two"));
    assert!(!text(&second.diff).contains("three"));
    assert!(second.url.is_none());

    let third = &batch.commits()[1];
    assert_eq!(third.message, "third\n\nwith a body");
    assert!(text(&third.diff).contains("b.txt"));
    assert!(text(&third.diff).contains("+three"));
}

#[tokio::test]
async fn empty_watermark_bootstraps_to_tip() {
    let upstream = Upstream::new();
    upstream.commit("a.txt", "one\n", "first");
    let tip = upstream.commit("a.txt", "two\n", "second");
    let mirrors = tempfile::tempdir().unwrap();

    let outcome = source(mirrors.path())
        .sync(&tracking(&upstream, None))
        .await
        .unwrap();

    assert_eq!(outcome, SyncOutcome::Bootstrap { tip });
}

#[tokio::test]
async fn watermark_at_tip_is_empty() {
    let upstream = Upstream::new();
    let tip = upstream.commit("a.txt", "one\n", "first");
    let mirrors = tempfile::tempdir().unwrap();

    let outcome = source(mirrors.path())
        .sync(&tracking(&upstream, Some(&tip)))
        .await
        .unwrap();

    assert_eq!(outcome, SyncOutcome::Empty);
}

#[tokio::test]
async fn second_sync_fetches_new_commits_into_existing_mirror() {
    let upstream = Upstream::new();
    let c1 = upstream.commit("a.txt", "one\n", "first");
    let mirrors = tempfile::tempdir().unwrap();
    let source = source(mirrors.path());

    assert_eq!(
        source.sync(&tracking(&upstream, Some(&c1))).await.unwrap(),
        SyncOutcome::Empty
    );
    assert!(source.mirror_for(&upstream.locator()).is_initialized());

    let c2 = upstream.commit("a.txt", "two\n", "second");
    let SyncOutcome::Batch(batch) = source.sync(&tracking(&upstream, Some(&c1))).await.unwrap()
    else {
        panic!("expected a batch after upstream moved");
    };
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.newest().unwrap().id, c2);
}

#[tokio::test]
async fn force_push_over_watermark_is_divergence() {
    let upstream = Upstream::new();
    let c1 = upstream.commit("a.txt", "one\n", "first");
    upstream.commit("a.txt", "two\n", "second");
    let c3 = upstream.commit("a.txt", "three\n", "third");
    let mirrors = tempfile::tempdir().unwrap();
    let source = source(mirrors.path());

    // Mirror the history that contains the watermark, then rewrite it.
    source.sync(&tracking(&upstream, Some(&c3))).await.unwrap();
    upstream.git(&["reset", "--quiet", "--hard", &c1]);
    upstream.commit("a.txt", "rewritten\n", "rewritten second");

    let err = source
        .sync(&tracking(&upstream, Some(&c3)))
        .await
        .unwrap_err();

    assert!(err.is_diverged(), "unexpected error: {err}");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn unknown_watermark_is_divergence() {
    let upstream = Upstream::new();
    upstream.commit("a.txt", "one\n", "first");
    let mirrors = tempfile::tempdir().unwrap();

    let err = source(mirrors.path())
        .sync(&tracking(&upstream, Some("0123456789abcdef0123456789abcdef01234567")))
        .await
        .unwrap_err();

    assert!(err.is_diverged(), "unexpected error: {err}");
}

#[tokio::test]
async fn missing_branch_is_reported() {
    let upstream = Upstream::new();
    let c1 = upstream.commit("a.txt", "one\n", "first");
    let mirrors = tempfile::tempdir().unwrap();
    let mut config = tracking(&upstream, Some(&c1));
    config.scm_branch = "release-9".to_string();

    let err = source(mirrors.path()).sync(&config).await.unwrap_err();

    assert!(matches!(err, SourceError::BranchNotFound { ref branch, .. } if branch == "release-9"));
}

#[tokio::test]
async fn unreachable_upstream_is_transient() {
    let mirrors = tempfile::tempdir().unwrap();
    let missing = mirrors.path().join("no-such-upstream");
    let config = TrackingConfig {
        repo: "src-openeuler/zlib".to_string(),
        branch: "master".to_string(),
        backend: BackendKind::LocalGit,
        scm_repo: missing.display().to_string(),
        scm_branch: "main".to_string(),
        watermark: None,
        enabled: true,
    };

    let err = source(mirrors.path()).sync(&config).await.unwrap_err();

    assert!(err.is_retryable(), "unexpected error: {err}");
}

#[tokio::test]
async fn cycle_publishes_local_batch_and_advances_watermark() {
    let upstream = Upstream::new();
    let c1 = upstream.commit("a.txt", "one\n", "first");
    let c2 = upstream.commit("a.txt", "two\n", "second");
    let mirrors = tempfile::tempdir().unwrap();
    let config = tracking(&upstream, Some(&c1));

    let store = Arc::new(MemoryTrackingStore::with_trackings([config.clone()]));
    let issues = Arc::new(MemoryIssueLog::new());
    let downstream = Arc::new(ScriptedDownstream::new().with_file(
        "master",
        "zlib.spec",
        "Name: zlib\nVersion: 1.3\nRelease: 1\nSource0: zlib-1.3.tar.gz\n\n%prep\n%setup -q\n\n%changelog\n",
        "spec-sha",
    ));
    let local: Arc<dyn UpstreamSource> = Arc::new(source(mirrors.path()));
    let tracker = Tracker::new(
        store.clone(),
        SourceFactory::new(local.clone(), local),
        PublishPipeline::new(downstream.clone(), store.clone(), issues.clone()),
    );

    let CycleOutcome::Published(result) = tracker.run_cycle(&config).await else {
        panic!("expected the batch to be published");
    };

    assert_eq!(result.watermark, c2);
    assert_eq!(result.patches, vec![format!("{c2}.patch")]);
    let stored = store.get(&config.key()).await.unwrap().unwrap();
    assert_eq!(stored.watermark.as_deref(), Some(c2.as_str()));
    assert_eq!(issues.all().len(), 1);

    let patch = downstream
        .file(&result.work_branch, &format!("{c2}.patch"))
        .unwrap();
    assert!(patch.content.contains("+two"));
    let spec = downstream.file(&result.work_branch, "zlib.spec").unwrap();
    assert!(spec.content.contains(&format!("Patch0001: {c2}.patch")));
    assert!(spec.content.contains("Release: 2"));
    assert!(result.work_branch.starts_with("patch-tracking/"));
    assert!(result.work_branch.len() > "patch-tracking/".len());
    assert!(spec.content.contains("patch-tracking - 1.3-2"));
    assert_eq!(
        downstream.count(|c| matches!(c, DownstreamCall::CreatePullRequest(_))),
        1
    );

    // Nothing new upstream: the next cycle is a no-op.
    let next = store.get(&config.key()).await.unwrap().unwrap();
    assert_eq!(tracker.run_cycle(&next).await, CycleOutcome::UpToDate);
}

#[tokio::test]
async fn legacy_encoded_text_is_published_byte_for_byte() {
    let upstream = Upstream::new();
    let c1 = upstream.commit("inflate.c", "/* zlib */\n", "first");
    let c2 = upstream.commit_bytes("inflate.c", b"/* zlib */\n/* J\xe9r\xf4me */\n", "credit");
    let mirrors = tempfile::tempdir().unwrap();
    let (config, tracker, store, downstream) = harness(&upstream, mirrors.path(), &c1);

    let SyncOutcome::Batch(batch) = source(mirrors.path()).sync(&config).await.unwrap() else {
        panic!("expected a batch");
    };
    assert!(contains(&batch.commits()[0].diff, b"+/* J\xe9r\xf4me */"));

    let CycleOutcome::Published(result) = tracker.run_cycle(&config).await else {
        panic!("expected the batch to be published");
    };
    let patch = downstream
        .uploaded(&result.work_branch, &format!("{c2}.patch"))
        .unwrap();
    assert!(contains(&patch, b"J\xe9r\xf4me"));
    let stored = store.get(&config.key()).await.unwrap().unwrap();
    assert_eq!(stored.watermark.as_deref(), Some(c2.as_str()));
}

#[traced_test]
#[tokio::test]
async fn watermark_merged_from_side_branch_spans_the_merge() {
    let upstream = Upstream::new();
    let c0 = upstream.commit("a.txt", "base\n", "base");
    upstream.git(&["checkout", "--quiet", "-b", "side", &c0]);
    let c1 = upstream.commit("side.txt", "side\n", "side work");
    upstream.git(&["checkout", "--quiet", "main"]);
    let x = upstream.commit("main.txt", "main\n", "main work");
    upstream.git(&["merge", "--quiet", "--no-ff", "-m", "merge side", "side"]);
    let m = upstream.git(&["rev-parse", "HEAD"]);
    let mirrors = tempfile::tempdir().unwrap();

    let outcome = source(mirrors.path())
        .sync(&tracking(&upstream, Some(&c1)))
        .await
        .unwrap();

    let SyncOutcome::Batch(batch) = outcome else {
        panic!("expected a batch");
    };
    let ids: Vec<&str> = batch.commits().iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec![x.as_str(), m.as_str()]);
    let first = &batch.commits()[0];
    assert_eq!(first.parent.as_deref(), Some(c0.as_str()));
    // Diffed against the watermark, so side.txt disappears in the first patch.
    assert!(text(&first.diff).contains("main.txt"));
    assert!(text(&first.diff).contains("side.txt"));
    assert!(logs_contain("first patch spans the merge"));
}

#[tokio::test(start_paused = true)]
async fn mirror_refresh_gives_up_after_ten_attempts() {
    let mirrors = tempfile::tempdir().unwrap();
    let upstream_dir = tempfile::tempdir().unwrap();
    let mut config = tracking(&Upstream::new(), None);
    config.scm_repo = upstream_dir.path().join("missing").display().to_string();
    let source = LocalGitSource::new(mirrors.path());

    let started = tokio::time::Instant::now();
    let err = source.sync(&config).await.unwrap_err();

    assert!(err.is_retryable(), "unexpected error: {err}");
    assert!(err.to_string().contains("after 10 attempts"), "{err}");
    assert!(started.elapsed() >= Duration::from_secs(9));
}

#[tokio::test(start_paused = true)]
async fn mirror_refresh_recovers_once_upstream_appears() {
    let mirrors = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    let target = staging.path().join("upstream");
    let mut config = tracking(&Upstream::new(), None);
    config.scm_repo = target.display().to_string();
    let source = LocalGitSource::new(mirrors.path());

    // Build the repository elsewhere and move it into place in one step, a
    // few retry delays into the sync.
    let publish = tokio::spawn({
        let target = target.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(3500)).await;
            let built = Upstream::new();
            let tip = built.commit("a.txt", "one\n", "first");
            std::fs::rename(built.path(), &target).unwrap();
            tip
        }
    });

    let outcome = source.sync(&config).await.unwrap();
    let tip = publish.await.unwrap();

    assert_eq!(outcome, SyncOutcome::Bootstrap { tip });
}
