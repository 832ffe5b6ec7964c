//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryTrackingStore` and `MemoryIssueLog` that satisfy the trait
//! contracts without any external dependencies.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryTrackingStore
// ---------------------------------------------------------------------------

/// In-memory tracking store backed by a `HashMap<TrackingKey, TrackingConfig>`.
#[derive(Debug, Default)]
pub struct MemoryTrackingStore {
    trackings: Mutex<HashMap<TrackingKey, TrackingConfig>>,
}

impl MemoryTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with the given trackings.
    pub fn with_trackings(trackings: impl IntoIterator<Item = TrackingConfig>) -> Self {
        let store = Self::new();
        {
            let mut map = store.trackings.lock().unwrap();
            for t in trackings {
                map.insert(t.key(), t);
            }
        }
        store
    }
}

#[async_trait]
impl TrackingStore for MemoryTrackingStore {
    async fn list_enabled(&self) -> StorageResult<Vec<TrackingConfig>> {
        let map = self.trackings.lock().unwrap();
        let mut enabled: Vec<TrackingConfig> =
            map.values().filter(|t| t.enabled).cloned().collect();
        enabled.sort_by(|a, b| (&a.repo, &a.branch).cmp(&(&b.repo, &b.branch)));
        Ok(enabled)
    }

    async fn get(&self, key: &TrackingKey) -> StorageResult<Option<TrackingConfig>> {
        let map = self.trackings.lock().unwrap();
        Ok(map.get(key).cloned())
    }

    async fn upsert(&self, mut config: TrackingConfig) -> StorageResult<()> {
        let mut map = self.trackings.lock().unwrap();
        if config.watermark.is_none() {
            config.watermark = map.get(&config.key()).and_then(|t| t.watermark.clone());
        }
        map.insert(config.key(), config);
        Ok(())
    }

    async fn update_watermark(&self, key: &TrackingKey, commit: &str) -> StorageResult<()> {
        let mut map = self.trackings.lock().unwrap();
        let tracking = map
            .get_mut(key)
            .ok_or_else(|| StorageError::TrackingNotFound {
                repo: key.repo.clone(),
                branch: key.branch.clone(),
            })?;
        tracking.watermark = Some(commit.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryIssueLog
// ---------------------------------------------------------------------------

/// In-memory issue log backed by a `Vec<IssueRecord>`.
#[derive(Debug, Default)]
pub struct MemoryIssueLog {
    issues: Mutex<Vec<IssueRecord>>,
}

impl MemoryIssueLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded issue, in insertion order.
    pub fn all(&self) -> Vec<IssueRecord> {
        self.issues.lock().unwrap().clone()
    }
}

#[async_trait]
impl IssueLog for MemoryIssueLog {
    async fn record_issue(&self, record: IssueRecord) -> StorageResult<()> {
        self.issues.lock().unwrap().push(record);
        Ok(())
    }

    async fn issues_for(&self, key: &TrackingKey) -> StorageResult<Vec<IssueRecord>> {
        let issues = self.issues.lock().unwrap();
        Ok(issues
            .iter()
            .filter(|i| i.repo == key.repo && i.branch == key.branch)
            .cloned()
            .collect())
    }
}
