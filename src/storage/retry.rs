//! Transient-error retry decorator for storage backends

use crate::config::{DatastoreConfig, SnapshotOptions};
use crate::scoring::WordTally;
use crate::state::{SnapshotState, Stage};
use crate::storage::traits::{Storage, StorageResult};
use crate::storage::{
    run_with_retry, CandidateRow, NewSnapshot, RecordingRecord, RunRecord, ScoutResult,
    SnapshotRecord, StatsRecord,
};
use std::collections::HashMap;

/// Wraps a storage backend so every operation waits out transient database
/// errors instead of failing the snapshot it was part of. Waits and retry
/// counts come from [`DatastoreConfig`].
pub struct RetryingStore<S> {
    inner: S,
    config: DatastoreConfig,
}

impl<S> RetryingStore<S> {
    pub fn new(inner: S, config: DatastoreConfig) -> Self {
        Self { inner, config }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Storage> Storage for RetryingStore<S> {
    fn create_run(&mut self, config_hash: &str) -> StorageResult<(i64, Option<String>)> {
        run_with_retry(&self.config, || self.inner.create_run(config_hash))
    }

    fn complete_run(&mut self, run_id: i64) -> StorageResult<()> {
        run_with_retry(&self.config, || self.inner.complete_run(run_id))
    }

    fn insert_or_get_snapshot(&mut self, snapshot: &NewSnapshot) -> StorageResult<i64> {
        run_with_retry(&self.config, || self.inner.insert_or_get_snapshot(snapshot))
    }

    fn get_snapshot(&self, snapshot_id: i64) -> StorageResult<SnapshotRecord> {
        run_with_retry(&self.config, || self.inner.get_snapshot(snapshot_id))
    }

    fn get_snapshot_by_url(
        &self,
        url: &str,
        timestamp: &str,
    ) -> StorageResult<Option<SnapshotRecord>> {
        run_with_retry(&self.config, || {
            self.inner.get_snapshot_by_url(url, timestamp)
        })
    }

    fn claim_snapshot(&mut self, snapshot_id: i64, expected: SnapshotState) -> StorageResult<bool> {
        run_with_retry(&self.config, || {
            self.inner.claim_snapshot(snapshot_id, expected)
        })
    }

    fn release_claim(&mut self, snapshot_id: i64) -> StorageResult<()> {
        run_with_retry(&self.config, || self.inner.release_claim(snapshot_id))
    }

    fn release_stale_claims(&mut self, max_age_secs: i64) -> StorageResult<usize> {
        run_with_retry(&self.config, || {
            self.inner.release_stale_claims(max_age_secs)
        })
    }

    fn transition_snapshot(&mut self, snapshot_id: i64, to: SnapshotState) -> StorageResult<()> {
        run_with_retry(&self.config, || {
            self.inner.transition_snapshot(snapshot_id, to)
        })
    }

    fn store_scout_result(
        &mut self,
        snapshot_id: i64,
        result: &ScoutResult,
    ) -> StorageResult<()> {
        run_with_retry(&self.config, || {
            self.inner.store_scout_result(snapshot_id, result)
        })
    }

    fn set_error(&mut self, snapshot_id: i64, message: &str) -> StorageResult<()> {
        run_with_retry(&self.config, || self.inner.set_error(snapshot_id, message))
    }

    fn set_options(&mut self, snapshot_id: i64, options: &SnapshotOptions) -> StorageResult<()> {
        run_with_retry(&self.config, || self.inner.set_options(snapshot_id, options))
    }

    fn enqueue_snapshot(&mut self, snapshot_id: i64, stage: Stage) -> StorageResult<()> {
        run_with_retry(&self.config, || {
            self.inner.enqueue_snapshot(snapshot_id, stage)
        })
    }

    fn delete_snapshot(&mut self, snapshot_id: i64) -> StorageResult<()> {
        run_with_retry(&self.config, || self.inner.delete_snapshot(snapshot_id))
    }

    fn scout_candidates(&self, limit: u32) -> StorageResult<Vec<CandidateRow>> {
        run_with_retry(&self.config, || self.inner.scout_candidates(limit))
    }

    fn record_candidates(&self, limit: u32) -> StorageResult<Vec<CandidateRow>> {
        run_with_retry(&self.config, || self.inner.record_candidates(limit))
    }

    fn publish_candidates(
        &self,
        min_publish_days: i64,
        limit: u32,
    ) -> StorageResult<Vec<CandidateRow>> {
        run_with_retry(&self.config, || {
            self.inner.publish_candidates(min_publish_days, limit)
        })
    }

    fn visited_counts_by_host(&self) -> StorageResult<HashMap<String, u32>> {
        run_with_retry(&self.config, || self.inner.visited_counts_by_host())
    }

    fn recording_counts_by_host(&self) -> StorageResult<HashMap<String, u32>> {
        run_with_retry(&self.config, || self.inner.recording_counts_by_host())
    }

    fn insert_link(&mut self, from_id: i64, to_id: i64) -> StorageResult<()> {
        run_with_retry(&self.config, || self.inner.insert_link(from_id, to_id))
    }

    fn set_snapshot_words(&mut self, snapshot_id: i64, tallies: &[WordTally]) -> StorageResult<()> {
        run_with_retry(&self.config, || {
            self.inner.set_snapshot_words(snapshot_id, tallies)
        })
    }

    fn get_snapshot_words(&self, snapshot_id: i64) -> StorageResult<Vec<WordTally>> {
        run_with_retry(&self.config, || self.inner.get_snapshot_words(snapshot_id))
    }

    fn insert_recording(
        &mut self,
        snapshot_id: i64,
        path: &str,
        has_audio: bool,
    ) -> StorageResult<i64> {
        run_with_retry(&self.config, || {
            self.inner.insert_recording(snapshot_id, path, has_audio)
        })
    }

    fn get_recording(&self, recording_id: i64) -> StorageResult<RecordingRecord> {
        run_with_retry(&self.config, || self.inner.get_recording(recording_id))
    }

    fn recording_for(&self, snapshot_id: i64) -> StorageResult<Option<RecordingRecord>> {
        run_with_retry(&self.config, || self.inner.recording_for(snapshot_id))
    }

    fn approve_recording(&mut self, recording_id: i64) -> StorageResult<()> {
        run_with_retry(&self.config, || self.inner.approve_recording(recording_id))
    }

    fn mark_published(
        &mut self,
        recording_id: i64,
        publish_url: Option<&str>,
    ) -> StorageResult<()> {
        run_with_retry(&self.config, || {
            self.inner.mark_published(recording_id, publish_url)
        })
    }

    fn was_saved(&self, url: &str) -> StorageResult<bool> {
        run_with_retry(&self.config, || self.inner.was_saved(url))
    }

    fn mark_saved(&mut self, url: &str) -> StorageResult<()> {
        run_with_retry(&self.config, || self.inner.mark_saved(url))
    }

    fn stats(&self) -> StorageResult<StatsRecord> {
        run_with_retry(&self.config, || self.inner.stats())
    }

    fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        run_with_retry(&self.config, || self.inner.latest_run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SqliteDatastore, StorageError};
    use crate::url::{registered_domain, url_host, url_key};

    fn busy() -> StorageError {
        StorageError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ))
    }

    fn fast_config() -> DatastoreConfig {
        DatastoreConfig {
            path: ":memory:".to_string(),
            error_wait_secs: 0,
            max_error_retries: 5,
        }
    }

    fn pending_snapshot(store: &mut SqliteDatastore, url: &str) -> i64 {
        let host = url_host(url).unwrap();
        store
            .insert_or_get_snapshot(&NewSnapshot {
                url: url.to_string(),
                timestamp: "19970601000000".to_string(),
                url_key: url_key(url).unwrap(),
                host: host.clone(),
                domain: registered_domain(&host),
                parent_id: None,
                depth: 0,
                is_media: false,
                media_extension: None,
            })
            .unwrap()
    }

    /// Injects a scripted run of busy failures in front of a real store.
    struct FlakyStore {
        inner: SqliteDatastore,
        claim_failures: u32,
        claim_calls: u32,
    }

    impl Storage for FlakyStore {
        fn claim_snapshot(
            &mut self,
            snapshot_id: i64,
            expected: SnapshotState,
        ) -> StorageResult<bool> {
            self.claim_calls += 1;
            if self.claim_failures > 0 {
                self.claim_failures -= 1;
                return Err(busy());
            }
            self.inner.claim_snapshot(snapshot_id, expected)
        }

        fn create_run(&mut self, config_hash: &str) -> StorageResult<(i64, Option<String>)> {
            self.inner.create_run(config_hash)
        }

        fn complete_run(&mut self, run_id: i64) -> StorageResult<()> {
            self.inner.complete_run(run_id)
        }

        fn insert_or_get_snapshot(&mut self, snapshot: &NewSnapshot) -> StorageResult<i64> {
            self.inner.insert_or_get_snapshot(snapshot)
        }

        fn get_snapshot(&self, snapshot_id: i64) -> StorageResult<SnapshotRecord> {
            self.inner.get_snapshot(snapshot_id)
        }

        fn get_snapshot_by_url(
            &self,
            url: &str,
            timestamp: &str,
        ) -> StorageResult<Option<SnapshotRecord>> {
            self.inner.get_snapshot_by_url(url, timestamp)
        }

        fn release_claim(&mut self, snapshot_id: i64) -> StorageResult<()> {
            self.inner.release_claim(snapshot_id)
        }

        fn release_stale_claims(&mut self, max_age_secs: i64) -> StorageResult<usize> {
            self.inner.release_stale_claims(max_age_secs)
        }

        fn transition_snapshot(&mut self, snapshot_id: i64, to: SnapshotState) -> StorageResult<()> {
            self.inner.transition_snapshot(snapshot_id, to)
        }

        fn store_scout_result(
            &mut self,
            snapshot_id: i64,
            result: &ScoutResult,
        ) -> StorageResult<()> {
            self.inner.store_scout_result(snapshot_id, result)
        }

        fn set_error(&mut self, snapshot_id: i64, message: &str) -> StorageResult<()> {
            self.inner.set_error(snapshot_id, message)
        }

        fn set_options(
            &mut self,
            snapshot_id: i64,
            options: &SnapshotOptions,
        ) -> StorageResult<()> {
            self.inner.set_options(snapshot_id, options)
        }

        fn enqueue_snapshot(&mut self, snapshot_id: i64, stage: Stage) -> StorageResult<()> {
            self.inner.enqueue_snapshot(snapshot_id, stage)
        }

        fn delete_snapshot(&mut self, snapshot_id: i64) -> StorageResult<()> {
            self.inner.delete_snapshot(snapshot_id)
        }

        fn scout_candidates(&self, limit: u32) -> StorageResult<Vec<CandidateRow>> {
            self.inner.scout_candidates(limit)
        }

        fn record_candidates(&self, limit: u32) -> StorageResult<Vec<CandidateRow>> {
            self.inner.record_candidates(limit)
        }

        fn publish_candidates(
            &self,
            min_publish_days: i64,
            limit: u32,
        ) -> StorageResult<Vec<CandidateRow>> {
            self.inner.publish_candidates(min_publish_days, limit)
        }

        fn visited_counts_by_host(&self) -> StorageResult<HashMap<String, u32>> {
            self.inner.visited_counts_by_host()
        }

        fn recording_counts_by_host(&self) -> StorageResult<HashMap<String, u32>> {
            self.inner.recording_counts_by_host()
        }

        fn insert_link(&mut self, from_id: i64, to_id: i64) -> StorageResult<()> {
            self.inner.insert_link(from_id, to_id)
        }

        fn set_snapshot_words(
            &mut self,
            snapshot_id: i64,
            tallies: &[WordTally],
        ) -> StorageResult<()> {
            self.inner.set_snapshot_words(snapshot_id, tallies)
        }

        fn get_snapshot_words(&self, snapshot_id: i64) -> StorageResult<Vec<WordTally>> {
            self.inner.get_snapshot_words(snapshot_id)
        }

        fn insert_recording(
            &mut self,
            snapshot_id: i64,
            path: &str,
            has_audio: bool,
        ) -> StorageResult<i64> {
            self.inner.insert_recording(snapshot_id, path, has_audio)
        }

        fn get_recording(&self, recording_id: i64) -> StorageResult<RecordingRecord> {
            self.inner.get_recording(recording_id)
        }

        fn recording_for(&self, snapshot_id: i64) -> StorageResult<Option<RecordingRecord>> {
            self.inner.recording_for(snapshot_id)
        }

        fn approve_recording(&mut self, recording_id: i64) -> StorageResult<()> {
            self.inner.approve_recording(recording_id)
        }

        fn mark_published(
            &mut self,
            recording_id: i64,
            publish_url: Option<&str>,
        ) -> StorageResult<()> {
            self.inner.mark_published(recording_id, publish_url)
        }

        fn was_saved(&self, url: &str) -> StorageResult<bool> {
            self.inner.was_saved(url)
        }

        fn mark_saved(&mut self, url: &str) -> StorageResult<()> {
            self.inner.mark_saved(url)
        }

        fn stats(&self) -> StorageResult<StatsRecord> {
            self.inner.stats()
        }

        fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
            self.inner.latest_run()
        }
    }

    #[test]
    fn test_transient_claim_failures_are_waited_out() {
        let mut inner = SqliteDatastore::new_in_memory().unwrap();
        let id = pending_snapshot(&mut inner, "http://a.com/");

        let flaky = FlakyStore {
            inner,
            claim_failures: 2,
            claim_calls: 0,
        };
        let mut store = RetryingStore::new(flaky, fast_config());

        assert!(store.claim_snapshot(id, SnapshotState::Pending).unwrap());
        assert_eq!(store.into_inner().claim_calls, 3);
    }

    #[test]
    fn test_gives_up_when_busy_outlasts_retries() {
        let mut inner = SqliteDatastore::new_in_memory().unwrap();
        let id = pending_snapshot(&mut inner, "http://a.com/");

        let flaky = FlakyStore {
            inner,
            claim_failures: u32::MAX,
            claim_calls: 0,
        };
        let mut store = RetryingStore::new(flaky, fast_config());

        assert!(store.claim_snapshot(id, SnapshotState::Pending).is_err());
        // One initial try plus max_error_retries.
        assert_eq!(store.into_inner().claim_calls, 6);
    }

    #[test]
    fn test_non_transient_errors_pass_through() {
        let inner = SqliteDatastore::new_in_memory().unwrap();
        let store = RetryingStore::new(inner, fast_config());

        assert!(matches!(
            store.get_snapshot(9999),
            Err(StorageError::SnapshotNotFound(9999))
        ));
    }
}
