//! Tracking-State: persistence for patch-tracker
//!
//! This crate holds the durable state of the sync pipeline: the tracking
//! configurations (including each tracking's watermark) and the log of
//! issues opened downstream.
//!
//! ## Key Components
//!
//! - `TrackingStore` / `IssueLog`: async storage traits used by the pipeline
//! - `SurrealTrackingStore`: SurrealDB implementation of both traits
//! - `fakes`: in-memory implementations for tests

mod error;
pub mod fakes;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::StorageError;
pub use storage_traits::{
    BackendKind, IssueLog, IssueRecord, StorageResult, TrackingConfig, TrackingKey, TrackingStore,
};
pub use surreal_store::SurrealTrackingStore;
