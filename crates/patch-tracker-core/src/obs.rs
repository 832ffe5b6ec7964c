//! Structured observability hooks for tracking cycle lifecycle events.
//!
//! This module provides:
//! - Cycle-scoped tracing spans via [`CycleSpan`]
//! - Emission functions for the lifecycle events of a cycle: start, skip,
//!   divergence, publish step failure, publish completion, watermark moves
//!   and descriptor anomalies
//!
//! Every event carries a fixed `event` field so log pipelines can filter on
//! it regardless of message wording.

use std::fmt::Display;
use std::future::Future;

use tracing::instrument::Instrumented;
use tracing::{info, warn, Instrument};
use tracking_state::TrackingKey;

/// Span tagging every log line of one tracking cycle with its cycle id and
/// tracking identity.
///
/// # Example
///
/// ```ignore
/// let span = CycleSpan::new(&cycle_id, &key);
/// span.instrument(async { /* logs carry cycle_id, repo, branch */ }).await;
/// ```
#[derive(Debug, Clone)]
pub struct CycleSpan {
    span: tracing::Span,
}

impl CycleSpan {
    pub fn new(cycle_id: &str, key: &TrackingKey) -> Self {
        let span = tracing::info_span!(
            "patch_tracker.cycle",
            cycle_id = %cycle_id,
            repo = %key.repo,
            branch = %key.branch,
        );
        Self { span }
    }

    /// Run `future` inside the span.
    pub fn instrument<F: Future>(&self, future: F) -> Instrumented<F> {
        future.instrument(self.span.clone())
    }

    /// Enter the span for synchronous code.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// Emit event: a cycle started for a tracking.
pub fn emit_cycle_started(cycle_id: &str, key: &TrackingKey, backend: &str) {
    info!(
        event = "cycle.started",
        cycle_id = %cycle_id,
        repo = %key.repo,
        branch = %key.branch,
        backend = %backend,
    );
}

/// Emit event: a cycle ended without publishing because of a transient or
/// hard upstream failure. The watermark is unchanged.
pub fn emit_cycle_skipped(key: &TrackingKey, reason: &dyn Display) {
    warn!(
        event = "cycle.skipped",
        repo = %key.repo,
        branch = %key.branch,
        reason = %reason,
    );
}

/// Emit event: upstream history no longer contains the watermark.
pub fn emit_cycle_diverged(key: &TrackingKey, watermark: Option<&str>, reason: &dyn Display) {
    warn!(
        event = "cycle.diverged",
        repo = %key.repo,
        branch = %key.branch,
        watermark = watermark.unwrap_or(""),
        reason = %reason,
        "operator re-baseline required"
    );
}

/// Emit event: a publish step failed and the batch was abandoned.
pub fn emit_publish_step_failed(
    key: &TrackingKey,
    step: &dyn Display,
    attempts: u32,
    error: &dyn Display,
) {
    warn!(
        event = "publish.step_failed",
        repo = %key.repo,
        branch = %key.branch,
        step = %step,
        attempts = attempts,
        error = %error,
    );
}

/// Emit event: a batch was fully published.
pub fn emit_publish_completed(key: &TrackingKey, work_branch: &str, issue: &str, commits: usize) {
    info!(
        event = "publish.completed",
        repo = %key.repo,
        branch = %key.branch,
        work_branch = %work_branch,
        issue = %issue,
        commits = commits,
    );
}

/// Emit event: the watermark moved forward after a publish.
pub fn emit_watermark_advanced(key: &TrackingKey, from: Option<&str>, to: &str) {
    info!(
        event = "watermark.advanced",
        repo = %key.repo,
        branch = %key.branch,
        from = from.unwrap_or(""),
        to = %to,
    );
}

/// Emit event: an empty watermark was set to the current upstream tip.
pub fn emit_watermark_bootstrapped(key: &TrackingKey, tip: &str) {
    info!(
        event = "watermark.bootstrapped",
        repo = %key.repo,
        branch = %key.branch,
        tip = %tip,
    );
}

/// Emit event: the packaging descriptor deviates from the expected layout.
pub fn emit_spec_anomaly(key: &TrackingKey, path: &str, anomaly: &dyn Display) {
    warn!(
        event = "spec.anomaly",
        repo = %key.repo,
        branch = %key.branch,
        path = %path,
        anomaly = %anomaly,
    );
}
