//! Trait contract tests for TrackingStore and IssueLog.
//!
//! Every contract runs against both the in-memory fakes and the SurrealDB
//! implementation (in-memory engine).

use std::sync::Arc;

use tracking_state::fakes::{MemoryIssueLog, MemoryTrackingStore};
use tracking_state::*;

fn tracking(repo: &str, branch: &str, enabled: bool) -> TrackingConfig {
    TrackingConfig {
        repo: repo.to_string(),
        branch: branch.to_string(),
        backend: BackendKind::LocalGit,
        scm_repo: format!("https://example.com/{repo}.git"),
        scm_branch: "main".to_string(),
        watermark: None,
        enabled,
    }
}

async fn stores() -> Vec<(&'static str, Arc<dyn TrackingStore>)> {
    vec![
        ("memory", Arc::new(MemoryTrackingStore::new())),
        (
            "surreal",
            Arc::new(SurrealTrackingStore::in_memory().await.unwrap()),
        ),
    ]
}

async fn issue_logs() -> Vec<(&'static str, Arc<dyn IssueLog>)> {
    vec![
        ("memory", Arc::new(MemoryIssueLog::new())),
        (
            "surreal",
            Arc::new(SurrealTrackingStore::in_memory().await.unwrap()),
        ),
    ]
}

// ===========================================================================
// TrackingStore contract tests
// ===========================================================================

#[tokio::test]
async fn list_enabled_skips_disabled_trackings() {
    for (name, store) in stores().await {
        store.upsert(tracking("org/a", "master", true)).await.unwrap();
        store.upsert(tracking("org/b", "master", false)).await.unwrap();
        store.upsert(tracking("org/c", "dev", true)).await.unwrap();

        let enabled = store.list_enabled().await.unwrap();
        let repos: Vec<&str> = enabled.iter().map(|t| t.repo.as_str()).collect();
        assert_eq!(repos, vec!["org/a", "org/c"], "backend {name}");
    }
}

#[tokio::test]
async fn upsert_replaces_existing_key() {
    for (name, store) in stores().await {
        store.upsert(tracking("org/a", "master", true)).await.unwrap();

        let mut changed = tracking("org/a", "master", true);
        changed.scm_branch = "release".to_string();
        changed.backend = BackendKind::RemoteApi;
        store.upsert(changed.clone()).await.unwrap();

        let enabled = store.list_enabled().await.unwrap();
        assert_eq!(enabled.len(), 1, "backend {name}");
        assert_eq!(enabled[0], changed, "backend {name}");
    }
}

#[tokio::test]
async fn upsert_without_watermark_keeps_stored_watermark() {
    for (name, store) in stores().await {
        let key = TrackingKey::new("org/a", "master");
        store.upsert(tracking("org/a", "master", true)).await.unwrap();
        store.update_watermark(&key, "c42").await.unwrap();

        // Re-tracking only to disable it.
        store.upsert(tracking("org/a", "master", false)).await.unwrap();

        let found = store.get(&key).await.unwrap().unwrap();
        assert!(!found.enabled, "backend {name}");
        assert_eq!(found.watermark.as_deref(), Some("c42"), "backend {name}");
    }
}

#[tokio::test]
async fn upsert_with_blank_watermark_clears_it() {
    for (name, store) in stores().await {
        let key = TrackingKey::new("org/a", "master");
        store.upsert(tracking("org/a", "master", true)).await.unwrap();
        store.update_watermark(&key, "c42").await.unwrap();

        let mut reset = tracking("org/a", "master", true);
        reset.watermark = Some(String::new());
        store.upsert(reset).await.unwrap();

        let found = store.get(&key).await.unwrap().unwrap();
        assert_eq!(found.watermark(), None, "backend {name}");
    }
}

#[tokio::test]
async fn get_returns_none_for_unknown_key() {
    for (name, store) in stores().await {
        let found = store
            .get(&TrackingKey::new("org/missing", "master"))
            .await
            .unwrap();
        assert!(found.is_none(), "backend {name}");
    }
}

#[tokio::test]
async fn update_watermark_only_changes_watermark() {
    for (name, store) in stores().await {
        let original = tracking("org/a", "master", true);
        store.upsert(original.clone()).await.unwrap();

        store
            .update_watermark(&original.key(), "c3c3c3")
            .await
            .unwrap();

        let updated = store.get(&original.key()).await.unwrap().unwrap();
        assert_eq!(updated.watermark(), Some("c3c3c3"), "backend {name}");
        assert_eq!(updated.scm_repo, original.scm_repo, "backend {name}");
        assert_eq!(updated.enabled, original.enabled, "backend {name}");
    }
}

#[tokio::test]
async fn update_watermark_unknown_key_is_not_found() {
    for (name, store) in stores().await {
        let err = store
            .update_watermark(&TrackingKey::new("org/none", "master"), "abc")
            .await
            .unwrap_err();
        assert!(
            matches!(err, StorageError::TrackingNotFound { .. }),
            "backend {name}: {err}"
        );
    }
}

// ===========================================================================
// IssueLog contract tests
// ===========================================================================

#[tokio::test]
async fn issues_are_scoped_to_tracking_key() {
    for (name, log) in issue_logs().await {
        let a = TrackingKey::new("org/a", "master");
        let b = TrackingKey::new("org/b", "master");

        log.record_issue(IssueRecord::new(&a, "I1")).await.unwrap();
        log.record_issue(IssueRecord::new(&b, "I2")).await.unwrap();
        log.record_issue(IssueRecord::new(&a, "I3")).await.unwrap();

        let issues: Vec<String> = log
            .issues_for(&a)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.issue)
            .collect();
        assert_eq!(issues, vec!["I1", "I3"], "backend {name}");
    }
}
