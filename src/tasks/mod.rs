//! Batch workflows
//!
//! The three long-running processes (scout, record, publish) each run as a
//! bounded batch: pick candidates through ranking, claim one row at a time,
//! process it end to end, advance its state. A bad snapshot costs only
//! itself; the batch always runs to completion unless the outside world
//! (archive, publish target) is confirmed down.
//!
//! Maintenance operations (manual enqueue, snapshot removal) live here too
//! since they share the same storage contracts.

mod collaborators;
mod publish;
mod record;
mod scout;

pub use collaborators::{Capture, CaptureError, PublishError, PublishTarget, Renderer};
pub use publish::PublishTask;
pub use record::RecordTask;
pub use scout::ScoutTask;

use crate::config::Config;
use crate::ranking::Candidate;
use crate::state::Stage;
use crate::storage::{CandidateRow, NewSnapshot, Storage};
use crate::url::{media_extension, registered_domain, url_host, url_key};
use crate::Result;
use std::collections::HashMap;
use std::fmt;
use tracing::info;

/// Per-batch outcome counts, one line per finished batch in the log.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    /// Rows this batch claimed and worked on
    pub processed: u32,
    /// Rows that advanced to their stage's success state
    pub succeeded: u32,
    /// Rows rejected by policy
    pub rejected: u32,
    /// Rows that errored and were left for retry or operator attention
    pub failed: u32,
    /// Rows skipped without processing (lost claim, awaiting approval)
    pub skipped: u32,
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed ({} ok, {} rejected, {} failed, {} skipped)",
            self.processed, self.succeeded, self.rejected, self.failed, self.skipped
        )
    }
}

/// How many rows to pull from storage for one ranking round.
///
/// The weighted draw needs a pool wider than the batch or it degenerates
/// into insertion order.
pub(crate) fn candidate_pool(batch_size: usize) -> u32 {
    (batch_size.saturating_mul(10).max(100)).min(u32::MAX as usize) as u32
}

/// Attaches the host cool-down flag to raw candidate rows.
pub(crate) fn cooled_candidates(
    rows: Vec<CandidateRow>,
    host_counts: &HashMap<String, u32>,
    threshold: u32,
) -> Vec<Candidate> {
    rows.into_iter()
        .map(|row| {
            let cooled = threshold > 0
                && host_counts.get(&row.host).copied().unwrap_or(0) >= threshold;
            Candidate {
                id: row.id,
                points: row.points,
                priority: row.priority,
                depth: row.depth,
                cooled,
            }
        })
        .collect()
}

/// Manually enqueues a URL at a timestamp for a workflow stage.
///
/// Creates the snapshot row if the URL was never discovered, then bumps it
/// into the stage's priority band so the next batch picks it first.
pub fn enqueue_url(
    store: &mut impl Storage,
    config: &Config,
    url: &str,
    timestamp: &str,
    stage: Stage,
) -> Result<i64> {
    let key = url_key(url)?;
    let host = url_host(url)?;
    let domain = registered_domain(&host);

    let extension = media_extension(url);
    let is_media = extension
        .as_deref()
        .map(|ext| {
            config
                .scout
                .media_extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false);

    let id = store.insert_or_get_snapshot(&NewSnapshot {
        url: url.to_string(),
        timestamp: timestamp.to_string(),
        url_key: key,
        host,
        domain,
        parent_id: None,
        depth: 0,
        is_media,
        media_extension: if is_media { extension } else { None },
    })?;

    store.enqueue_snapshot(id, stage)?;
    info!(snapshot_id = id, url, stage = stage.as_str(), "enqueued");
    Ok(id)
}

/// Removes a snapshot and, when it was recorded, its media file.
pub fn remove_snapshot(store: &mut impl Storage, snapshot_id: i64) -> Result<()> {
    if let Some(recording) = store.recording_for(snapshot_id)? {
        match std::fs::remove_file(&recording.path) {
            Ok(()) => info!(path = recording.path, "removed recording file"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    store.delete_snapshot(snapshot_id)?;
    info!(snapshot_id, "snapshot removed");
    Ok(())
}
