//! One tracking cycle: sync the upstream, publish any new batch, and report
//! what happened.
//!
//! Every failure is contained in the cycle that hit it and turned into a
//! [`CycleOutcome`]; nothing propagates to sibling cycles.

use std::sync::Arc;

use chrono::Local;
use tracing::debug;
use tracking_state::{StorageError, TrackingConfig, TrackingKey, TrackingStore};
use uuid::Uuid;

use crate::error::Result;
use crate::obs::{self, CycleSpan};
use crate::pipeline::{PublishPipeline, PublishResult, PublishStep};
use crate::upstream::{SourceFactory, SyncOutcome};

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A batch was published and the watermark advanced.
    Published(PublishResult),
    /// Nothing new upstream.
    UpToDate,
    /// The empty watermark was set to the upstream tip.
    Bootstrapped { tip: String },
    /// The watermark is unreachable from the upstream tip.
    Diverged { reason: String },
    /// The upstream could not be read this cycle; retried next cycle.
    Skipped { reason: String },
    /// A publish step failed; the batch is retried next cycle.
    Failed {
        step: Option<PublishStep>,
        error: String,
    },
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Published(_) => "published",
            CycleOutcome::UpToDate => "up-to-date",
            CycleOutcome::Bootstrapped { .. } => "bootstrapped",
            CycleOutcome::Diverged { .. } => "diverged",
            CycleOutcome::Skipped { .. } => "skipped",
            CycleOutcome::Failed { .. } => "failed",
        }
    }
}

/// Wires an upstream source, the publish pipeline and the tracking store
/// into a runnable cycle.
#[derive(Clone)]
pub struct Tracker {
    store: Arc<dyn TrackingStore>,
    sources: SourceFactory,
    pipeline: PublishPipeline,
}

impl Tracker {
    pub fn new(
        store: Arc<dyn TrackingStore>,
        sources: SourceFactory,
        pipeline: PublishPipeline,
    ) -> Self {
        Self {
            store,
            sources,
            pipeline,
        }
    }

    pub fn store(&self) -> &Arc<dyn TrackingStore> {
        &self.store
    }

    /// Run one full cycle for `config`.
    pub async fn run_cycle(&self, config: &TrackingConfig) -> CycleOutcome {
        let cycle_id = Uuid::new_v4().to_string();
        let span = CycleSpan::new(&cycle_id, &config.key());
        span.instrument(self.cycle(&cycle_id, config)).await
    }

    /// Look up `key` in the store and run one cycle for it.
    pub async fn run_for_key(&self, key: &TrackingKey) -> Result<CycleOutcome> {
        let config = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| StorageError::TrackingNotFound {
                repo: key.repo.clone(),
                branch: key.branch.clone(),
            })?;
        Ok(self.run_cycle(&config).await)
    }

    /// Set the watermark of a never-synced tracking to its upstream tip.
    /// Trackings that already have a watermark are left alone.
    pub async fn bootstrap_watermark(&self, config: &TrackingConfig) -> CycleOutcome {
        if config.watermark().is_some() {
            return CycleOutcome::UpToDate;
        }
        let cycle_id = Uuid::new_v4().to_string();
        let key = config.key();
        let span = CycleSpan::new(&cycle_id, &key);
        span.instrument(async {
            let source = self.sources.for_config(config);
            match source.sync(config).await {
                Ok(SyncOutcome::Bootstrap { tip }) => self.apply_bootstrap(&key, tip).await,
                Ok(_) => CycleOutcome::UpToDate,
                Err(err) => {
                    obs::emit_cycle_skipped(&key, &err);
                    CycleOutcome::Skipped {
                        reason: err.to_string(),
                    }
                }
            }
        })
        .await
    }

    async fn cycle(&self, cycle_id: &str, config: &TrackingConfig) -> CycleOutcome {
        let key = config.key();
        let started_at = Local::now();
        let source = self.sources.for_config(config);
        obs::emit_cycle_started(cycle_id, &key, source.kind().as_str());

        let batch = match source.sync(config).await {
            Ok(SyncOutcome::Batch(batch)) if !batch.is_empty() => batch,
            Ok(SyncOutcome::Batch(_)) | Ok(SyncOutcome::Empty) => {
                debug!("no new upstream commits");
                return CycleOutcome::UpToDate;
            }
            Ok(SyncOutcome::Bootstrap { tip }) => return self.apply_bootstrap(&key, tip).await,
            Err(err) if err.is_diverged() => {
                obs::emit_cycle_diverged(&key, config.watermark(), &err);
                return CycleOutcome::Diverged {
                    reason: err.to_string(),
                };
            }
            Err(err) => {
                obs::emit_cycle_skipped(&key, &err);
                return CycleOutcome::Skipped {
                    reason: err.to_string(),
                };
            }
        };

        debug!(commits = batch.len(), "publishing batch");
        match self.pipeline.publish(config, &batch, started_at).await {
            Ok(result) => CycleOutcome::Published(result),
            Err(err) => {
                let step = err.step();
                let label = step.map(|s| s.as_str()).unwrap_or("publish");
                obs::emit_publish_step_failed(&key, &label, err.attempts(), &err);
                CycleOutcome::Failed {
                    step,
                    error: err.to_string(),
                }
            }
        }
    }

    async fn apply_bootstrap(&self, key: &TrackingKey, tip: String) -> CycleOutcome {
        match self.store.update_watermark(key, &tip).await {
            Ok(()) => {
                obs::emit_watermark_bootstrapped(key, &tip);
                CycleOutcome::Bootstrapped { tip }
            }
            Err(err) => {
                obs::emit_cycle_skipped(key, &err);
                CycleOutcome::Skipped {
                    reason: err.to_string(),
                }
            }
        }
    }
}
