//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::config::SnapshotOptions;
use crate::scoring::WordTally;
use crate::state::{SnapshotState, Stage};
use crate::storage::{
    CandidateRow, NewSnapshot, RecordingRecord, RunRecord, ScoutResult, SnapshotRecord,
    StatsRecord,
};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(i64),

    #[error("Recording not found: {0}")]
    RecordingNotFound(i64),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: SnapshotState,
        to: SnapshotState,
    },

    #[error("Snapshot {0} must be claimed before it can transition")]
    ClaimRequired(i64),

    #[error("Snapshot {0} holds an unknown state code {1}")]
    UnknownStateCode(i64, i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines all database operations needed by the scheduler. A
/// workflow that wants to mutate a snapshot must claim it first; every
/// transition checks the claim and releases it.
pub trait Storage {
    // ===== Run Management =====

    /// Records the start of a program run with its config hash, returning
    /// the run ID and the previous run's config hash if one exists.
    fn create_run(&mut self, config_hash: &str) -> StorageResult<(i64, Option<String>)>;

    /// Marks a run as finished
    fn complete_run(&mut self, run_id: i64) -> StorageResult<()>;

    // ===== Snapshot Management =====

    /// Inserts a new snapshot or returns the existing row's ID for the same
    /// (url, timestamp) pair
    fn insert_or_get_snapshot(&mut self, snapshot: &NewSnapshot) -> StorageResult<i64>;

    /// Gets a snapshot by ID
    fn get_snapshot(&self, snapshot_id: i64) -> StorageResult<SnapshotRecord>;

    /// Gets a snapshot by its (url, timestamp) pair
    fn get_snapshot_by_url(
        &self,
        url: &str,
        timestamp: &str,
    ) -> StorageResult<Option<SnapshotRecord>>;

    /// Attempts to claim a snapshot for exclusive processing.
    ///
    /// Succeeds only when the row is still in `expected` state and nothing
    /// else holds the claim. Returns whether the claim was won.
    fn claim_snapshot(
        &mut self,
        snapshot_id: i64,
        expected: SnapshotState,
    ) -> StorageResult<bool>;

    /// Releases a claim without changing state, e.g. when a batch is
    /// abandoned partway
    fn release_claim(&mut self, snapshot_id: i64) -> StorageResult<()>;

    /// Releases claims older than `max_age_secs`, for crash recovery
    fn release_stale_claims(&mut self, max_age_secs: i64) -> StorageResult<usize>;

    /// Moves a claimed snapshot through a legal transition and releases the
    /// claim. Fails with `InvalidTransition` otherwise.
    fn transition_snapshot(
        &mut self,
        snapshot_id: i64,
        to: SnapshotState,
    ) -> StorageResult<()>;

    /// Stores everything the scout learned about a snapshot
    fn store_scout_result(&mut self, snapshot_id: i64, result: &ScoutResult)
        -> StorageResult<()>;

    /// Records an error message against a snapshot
    fn set_error(&mut self, snapshot_id: i64, message: &str) -> StorageResult<()>;

    /// Replaces a snapshot's option overrides
    fn set_options(&mut self, snapshot_id: i64, options: &SnapshotOptions) -> StorageResult<()>;

    /// Manually enqueues a snapshot for a stage: bumps its priority into the
    /// stage's band. A row already past the stage steps back to the stage's
    /// entry state; a row short of it keeps its state and is never moved
    /// forward.
    fn enqueue_snapshot(&mut self, snapshot_id: i64, stage: Stage) -> StorageResult<()>;

    /// Deletes a snapshot and everything hanging off it
    fn delete_snapshot(&mut self, snapshot_id: i64) -> StorageResult<()>;

    // ===== Candidate Queries =====

    /// Unvisited snapshots eligible for scouting, oldest first. A pending
    /// row has no points of its own yet, so it inherits the best point
    /// total among its parents, self-links excluded.
    fn scout_candidates(&self, limit: u32) -> StorageResult<Vec<CandidateRow>>;

    /// Scouted or retry-eligible snapshots awaiting recording
    fn record_candidates(&self, limit: u32) -> StorageResult<Vec<CandidateRow>>;

    /// Recorded snapshots awaiting publication, excluding any UrlKey
    /// published within the cool-down window
    fn publish_candidates(
        &self,
        min_publish_days: i64,
        limit: u32,
    ) -> StorageResult<Vec<CandidateRow>>;

    /// How many visited snapshots each host has
    fn visited_counts_by_host(&self) -> StorageResult<HashMap<String, u32>>;

    /// How many recordings each host has
    fn recording_counts_by_host(&self) -> StorageResult<HashMap<String, u32>>;

    // ===== Topology =====

    /// Records a link between two snapshots
    fn insert_link(&mut self, from_id: i64, to_id: i64) -> StorageResult<()>;

    // ===== Words =====

    /// Replaces a snapshot's word tallies
    fn set_snapshot_words(
        &mut self,
        snapshot_id: i64,
        tallies: &[WordTally],
    ) -> StorageResult<()>;

    /// Gets a snapshot's word tallies
    fn get_snapshot_words(&self, snapshot_id: i64) -> StorageResult<Vec<WordTally>>;

    // ===== Recordings =====

    /// Stores a finished capture. A snapshot holds at most one recording;
    /// recording again replaces it and resets approval.
    fn insert_recording(
        &mut self,
        snapshot_id: i64,
        path: &str,
        has_audio: bool,
    ) -> StorageResult<i64>;

    /// Gets a recording by ID
    fn get_recording(&self, recording_id: i64) -> StorageResult<RecordingRecord>;

    /// Gets the recording for a snapshot, if one exists
    fn recording_for(&self, snapshot_id: i64) -> StorageResult<Option<RecordingRecord>>;

    /// Marks a recording as approved for publication
    fn approve_recording(&mut self, recording_id: i64) -> StorageResult<()>;

    /// Marks a recording as published
    fn mark_published(
        &mut self,
        recording_id: i64,
        publish_url: Option<&str>,
    ) -> StorageResult<()>;

    // ===== Save-on-demand bookkeeping =====

    /// Whether a URL was already submitted to save-on-demand
    fn was_saved(&self, url: &str) -> StorageResult<bool>;

    /// Remembers that a URL was submitted to save-on-demand
    fn mark_saved(&mut self, url: &str) -> StorageResult<()>;

    // ===== Reporting =====

    /// Row counts per state plus recording totals
    fn stats(&self) -> StorageResult<StatsRecord>;

    /// The previous run's config hash, if any run finished before
    fn latest_run(&self) -> StorageResult<Option<RunRecord>>;
}
