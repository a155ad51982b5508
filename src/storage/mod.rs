//! Storage module for the snapshot datastore
//!
//! This module handles all database operations for the scheduler, including:
//! - SQLite database initialization and schema management
//! - Snapshot rows, their lifecycle states, and the claim contract
//! - Link topology and per-snapshot word tallies
//! - Recordings and save-on-demand bookkeeping

mod retry;
mod schema;
mod sqlite;
mod traits;

pub use retry::RetryingStore;
pub use schema::{initialize_schema, SCHEMA_SQL};
pub use sqlite::SqliteDatastore;
pub use traits::{Storage, StorageError, StorageResult};

use crate::config::DatastoreConfig;
use crate::state::SnapshotState;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Initializes or opens the snapshot datastore
pub fn open_datastore(path: &Path) -> StorageResult<SqliteDatastore> {
    SqliteDatastore::new(path)
}

/// Runs a storage operation, waiting out transient database errors.
///
/// A locked or busy database is not a reason to lose a snapshot partway
/// through its lifecycle. [`RetryingStore`] routes every storage operation
/// through this so workflows wait rather than fail.
pub fn run_with_retry<T>(
    config: &DatastoreConfig,
    mut op: impl FnMut() -> StorageResult<T>,
) -> StorageResult<T> {
    let mut attempt: u32 = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < config.max_error_retries && is_transient(&err) => {
                attempt += 1;
                warn!(
                    attempt,
                    max = config.max_error_retries,
                    error = %err,
                    "transient datastore error, waiting"
                );
                std::thread::sleep(Duration::from_secs(config.error_wait_secs));
            }
            Err(err) => return Err(err),
        }
    }
}

fn is_transient(err: &StorageError) -> bool {
    match err {
        StorageError::Sqlite(rusqlite::Error::SqliteFailure(code, _)) => matches!(
            code.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}

/// Represents a snapshot row in the database
#[derive(Debug, Clone)]
pub struct SnapshotRecord {
    pub id: i64,
    pub url: String,
    pub timestamp: String,
    pub url_key: String,
    pub host: String,
    pub domain: String,
    pub parent_id: Option<i64>,
    pub state: SnapshotState,
    pub depth: i64,
    pub priority: i64,
    pub is_media: bool,
    pub media_extension: Option<String>,
    pub is_sensitive: Option<bool>,
    pub points: Option<i64>,
    pub title: Option<String>,
    pub page_language: Option<String>,
    pub uses_plugins: bool,
    pub oldest_year: Option<i32>,
    pub last_modified: Option<String>,
    pub options: Option<String>,
    pub error_message: Option<String>,
    pub discovered_at: String,
    pub scouted_at: Option<String>,
    pub claimed_at: Option<String>,
}

/// Everything needed to insert a newly discovered snapshot
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub url: String,
    pub timestamp: String,
    pub url_key: String,
    pub host: String,
    pub domain: String,
    pub parent_id: Option<i64>,
    pub depth: i64,
    pub is_media: bool,
    pub media_extension: Option<String>,
}

/// What the scout learned about one snapshot
#[derive(Debug, Clone, Default)]
pub struct ScoutResult {
    pub title: Option<String>,
    pub points: i64,
    pub is_sensitive: bool,
    pub page_language: Option<String>,
    pub uses_plugins: bool,
    pub oldest_year: Option<i32>,
    pub last_modified: Option<String>,
}

/// A thin row used for batch candidate selection
#[derive(Debug, Clone)]
pub struct CandidateRow {
    pub id: i64,
    pub points: Option<i64>,
    pub priority: i64,
    pub depth: i64,
    pub host: String,
}

/// Represents a finished capture
#[derive(Debug, Clone)]
pub struct RecordingRecord {
    pub id: i64,
    pub snapshot_id: i64,
    pub path: String,
    pub has_audio: bool,
    pub created_at: String,
    pub approved: bool,
    pub published_at: Option<String>,
    pub publish_url: Option<String>,
}

/// Represents a program run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
}

/// Row counts for the stats report
#[derive(Debug, Clone, Default)]
pub struct StatsRecord {
    pub by_state: Vec<(SnapshotState, u32)>,
    pub total_snapshots: u32,
    pub total_recordings: u32,
    pub unpublished_recordings: u32,
}
