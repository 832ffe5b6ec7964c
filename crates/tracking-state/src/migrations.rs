//! SurrealDB schema migrations and initialization
//!
//! Sets up the `trackings` and `issues` tables with their indexes.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;

/// Initialize all patch-tracker tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<(), StorageError> {
    info!("Initializing patch-tracker SurrealDB schema");

    init_trackings_table(db).await?;
    init_issues_table(db).await?;

    info!("patch-tracker schema initialization complete");
    Ok(())
}

/// Initialize `trackings` table
///
/// Schema:
/// ```text
/// TABLE trackings {
///   repo:        STRING
///   branch:      STRING
///   backend:     STRING (enum: local-git | remote-api)
///   scm_repo:    STRING
///   scm_branch:  STRING
///   watermark:   STRING?
///   enabled:     BOOL (indexed)
///   updated_at:  DATETIME
/// }
/// ```
///
/// Constraints:
/// - `(repo, branch)` is unique
async fn init_trackings_table(db: &Surreal<Any>) -> Result<(), StorageError> {
    debug!("Initializing trackings table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS trackings SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_tracking_key ON TABLE trackings COLUMNS repo, branch UNIQUE;

        DEFINE INDEX IF NOT EXISTS idx_tracking_enabled ON TABLE trackings COLUMNS enabled;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StorageError::SchemaSetup(e.to_string()))?
        .check()
        .map_err(|e| StorageError::SchemaSetup(e.to_string()))?;
    info!("trackings table initialized");
    Ok(())
}

/// Initialize `issues` table
///
/// Schema:
/// ```text
/// TABLE issues {
///   repo:        STRING
///   branch:      STRING
///   issue:       STRING
///   created_at:  DATETIME
/// }
/// ```
async fn init_issues_table(db: &Surreal<Any>) -> Result<(), StorageError> {
    debug!("Initializing issues table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS issues SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_issue_key ON TABLE issues COLUMNS repo, branch;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StorageError::SchemaSetup(e.to_string()))?
        .check()
        .map_err(|e| StorageError::SchemaSetup(e.to_string()))?;
    info!("issues table initialized");
    Ok(())
}
