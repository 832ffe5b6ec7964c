//! Patch-Tracker Core Library
//!
//! Keeps a downstream package repository in step with an upstream source
//! repository. Each cycle turns the upstream commits published since the
//! tracking's watermark into single-commit patches, pushes them to a fresh
//! downstream branch together with an updated RPM spec file, and opens an
//! issue and a pull request for review.
//!
//! ## Key Components
//!
//! - `upstream`: `LocalGitSource` / `RemoteApiSource` behind `UpstreamSource`
//! - `pipeline`: `PublishPipeline`, the ordered downstream publish steps
//! - `spec_file`: RPM spec parsing and patch/changelog insertion
//! - `cycle` / `scheduler`: per-tracking cycles and their periodic driver

pub mod config;
pub mod cycle;
pub mod downstream;
pub mod error;
pub mod fakes;
pub mod http;
pub mod obs;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod spec_file;
pub mod telemetry;
pub mod upstream;

pub use config::{ConfigError, Settings};
pub use cycle::{CycleOutcome, Tracker};
pub use downstream::{DownstreamApi, GiteeClient, PullRequest, RemoteFile};
pub use error::{Result, TrackerError};
pub use http::{ApiError, CredentialCheck};
pub use pipeline::{PublishError, PublishPipeline, PublishResult, PublishStep, WORK_BRANCH_PREFIX};
pub use retry::{Delay, RetryError, RetryPolicy};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use spec_file::{update_spec, SpecAnomaly, SpecFile};
pub use upstream::{
    CommitRecord, GitHubClient, LocalGitSource, PatchBatch, RemoteApiSource, SourceError,
    SourceFactory, SyncOutcome, UpstreamApi, UpstreamSource,
};

pub use tracking_state::{
    BackendKind, IssueLog, IssueRecord, StorageError, SurrealTrackingStore, TrackingConfig,
    TrackingKey, TrackingStore,
};
