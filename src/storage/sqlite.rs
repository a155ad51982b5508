//! SQLite datastore implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::config::SnapshotOptions;
use crate::scoring::WordTally;
use crate::state::{SnapshotState, Stage, NO_PRIORITY};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    CandidateRow, NewSnapshot, RecordingRecord, RunRecord, ScoutResult, SnapshotRecord,
    StatsRecord,
};
use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

const SNAPSHOT_COLUMNS: &str = "id, url, timestamp, url_key, host, domain, parent_id, state, \
     depth, priority, is_media, media_extension, is_sensitive, points, title, page_language, \
     uses_plugins, oldest_year, last_modified, options, error_message, discovered_at, \
     scouted_at, claimed_at";

/// SQLite datastore backend
pub struct SqliteDatastore {
    conn: Connection,
}

impl SqliteDatastore {
    /// Creates a new SqliteDatastore instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Sibling workflow processes share the file; waiting inside SQLite
        // absorbs most lock contention before it surfaces as SQLITE_BUSY.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn row_to_snapshot(row: &Row<'_>) -> rusqlite::Result<(SnapshotRecord, i64)> {
        let state_code: i64 = row.get(7)?;
        let record = SnapshotRecord {
            id: row.get(0)?,
            url: row.get(1)?,
            timestamp: row.get(2)?,
            url_key: row.get(3)?,
            host: row.get(4)?,
            domain: row.get(5)?,
            parent_id: row.get(6)?,
            // Placeholder until the code is checked outside rusqlite's Result
            state: SnapshotState::Pending,
            depth: row.get(8)?,
            priority: row.get(9)?,
            is_media: row.get::<_, i64>(10)? != 0,
            media_extension: row.get(11)?,
            is_sensitive: row.get::<_, Option<i64>>(12)?.map(|v| v != 0),
            points: row.get(13)?,
            title: row.get(14)?,
            page_language: row.get(15)?,
            uses_plugins: row.get::<_, i64>(16)? != 0,
            oldest_year: row.get(17)?,
            last_modified: row.get(18)?,
            options: row.get(19)?,
            error_message: row.get(20)?,
            discovered_at: row.get(21)?,
            scouted_at: row.get(22)?,
            claimed_at: row.get(23)?,
        };
        Ok((record, state_code))
    }

    fn decode_snapshot(pair: (SnapshotRecord, i64)) -> StorageResult<SnapshotRecord> {
        let (mut record, code) = pair;
        record.state = SnapshotState::from_code(code)
            .ok_or(StorageError::UnknownStateCode(record.id, code))?;
        Ok(record)
    }

    fn candidates_where(
        &self,
        condition: &str,
        params: &[&dyn rusqlite::ToSql],
        limit: u32,
    ) -> StorageResult<Vec<CandidateRow>> {
        let sql = format!(
            "SELECT id, points, priority, depth, host FROM snapshots \
             WHERE claimed_at IS NULL AND {} ORDER BY id LIMIT {}",
            condition, limit
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok(CandidateRow {
                id: row.get(0)?,
                points: row.get(1)?,
                priority: row.get(2)?,
                depth: row.get(3)?,
                host: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn counts_by_host(&self, sql: &str) -> StorageResult<HashMap<String, u32>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<HashMap<_, _>>>()?)
    }
}

impl Storage for SqliteDatastore {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<(i64, Option<String>)> {
        let previous: Option<String> = self
            .conn
            .query_row(
                "SELECT config_hash FROM runs ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash) VALUES (?1, ?2)",
            params![now, config_hash],
        )?;
        Ok((self.conn.last_insert_rowid(), previous))
    }

    fn complete_run(&mut self, run_id: i64) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE runs SET finished_at = ?1 WHERE id = ?2",
            params![now, run_id],
        )?;
        Ok(())
    }

    // ===== Snapshot Management =====

    fn insert_or_get_snapshot(&mut self, snapshot: &NewSnapshot) -> StorageResult<i64> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM snapshots WHERE url = ?1 AND timestamp = ?2",
                params![snapshot.url, snapshot.timestamp],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            return Ok(id);
        }

        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO snapshots (url, timestamp, url_key, host, domain, parent_id, state, \
             depth, is_media, media_extension, discovered_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                snapshot.url,
                snapshot.timestamp,
                snapshot.url_key,
                snapshot.host,
                snapshot.domain,
                snapshot.parent_id,
                SnapshotState::Pending.to_code(),
                snapshot.depth,
                snapshot.is_media as i64,
                snapshot.media_extension,
                now
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    fn get_snapshot(&self, snapshot_id: i64) -> StorageResult<SnapshotRecord> {
        let sql = format!("SELECT {} FROM snapshots WHERE id = ?1", SNAPSHOT_COLUMNS);
        let pair = self
            .conn
            .query_row(&sql, params![snapshot_id], Self::row_to_snapshot)
            .optional()?
            .ok_or(StorageError::SnapshotNotFound(snapshot_id))?;
        Self::decode_snapshot(pair)
    }

    fn get_snapshot_by_url(
        &self,
        url: &str,
        timestamp: &str,
    ) -> StorageResult<Option<SnapshotRecord>> {
        let sql = format!(
            "SELECT {} FROM snapshots WHERE url = ?1 AND timestamp = ?2",
            SNAPSHOT_COLUMNS
        );
        let pair = self
            .conn
            .query_row(&sql, params![url, timestamp], Self::row_to_snapshot)
            .optional()?;
        pair.map(Self::decode_snapshot).transpose()
    }

    fn claim_snapshot(
        &mut self,
        snapshot_id: i64,
        expected: SnapshotState,
    ) -> StorageResult<bool> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE snapshots SET claimed_at = ?1 \
             WHERE id = ?2 AND state = ?3 AND claimed_at IS NULL",
            params![now, snapshot_id, expected.to_code()],
        )?;
        Ok(changed == 1)
    }

    fn release_claim(&mut self, snapshot_id: i64) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE snapshots SET claimed_at = NULL WHERE id = ?1",
            params![snapshot_id],
        )?;
        Ok(())
    }

    fn release_stale_claims(&mut self, max_age_secs: i64) -> StorageResult<usize> {
        let cutoff = (Utc::now() - Duration::seconds(max_age_secs)).to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE snapshots SET claimed_at = NULL \
             WHERE claimed_at IS NOT NULL AND claimed_at < ?1",
            params![cutoff],
        )?;
        Ok(changed)
    }

    fn transition_snapshot(&mut self, snapshot_id: i64, to: SnapshotState) -> StorageResult<()> {
        let current = self.get_snapshot(snapshot_id)?;

        if current.claimed_at.is_none() {
            return Err(StorageError::ClaimRequired(snapshot_id));
        }
        if !current.state.can_transition_to(to) {
            return Err(StorageError::InvalidTransition {
                from: current.state,
                to,
            });
        }

        // A manual priority expires once the stage it was raised for is done.
        let new_priority = match Stage::from_priority(current.priority) {
            Some(stage) if !stage.satisfied_by(to) => current.priority,
            _ => NO_PRIORITY,
        };

        // CAS on the old state; a concurrent transition loses cleanly.
        let changed = self.conn.execute(
            "UPDATE snapshots SET state = ?1, priority = ?2, claimed_at = NULL \
             WHERE id = ?3 AND state = ?4 AND claimed_at IS NOT NULL",
            params![to.to_code(), new_priority, snapshot_id, current.state.to_code()],
        )?;
        if changed != 1 {
            return Err(StorageError::InvalidTransition {
                from: current.state,
                to,
            });
        }
        Ok(())
    }

    fn store_scout_result(
        &mut self,
        snapshot_id: i64,
        result: &ScoutResult,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE snapshots SET title = ?1, points = ?2, is_sensitive = ?3, \
             page_language = ?4, uses_plugins = ?5, oldest_year = ?6, last_modified = ?7, \
             scouted_at = ?8, error_message = NULL WHERE id = ?9",
            params![
                result.title,
                result.points,
                result.is_sensitive as i64,
                result.page_language,
                result.uses_plugins as i64,
                result.oldest_year,
                result.last_modified,
                now,
                snapshot_id
            ],
        )?;
        if changed != 1 {
            return Err(StorageError::SnapshotNotFound(snapshot_id));
        }
        Ok(())
    }

    fn set_error(&mut self, snapshot_id: i64, message: &str) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE snapshots SET error_message = ?1 WHERE id = ?2",
            params![message, snapshot_id],
        )?;
        Ok(())
    }

    fn set_options(&mut self, snapshot_id: i64, options: &SnapshotOptions) -> StorageResult<()> {
        let json = options
            .to_json()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let changed = self.conn.execute(
            "UPDATE snapshots SET options = ?1 WHERE id = ?2",
            params![json, snapshot_id],
        )?;
        if changed != 1 {
            return Err(StorageError::SnapshotNotFound(snapshot_id));
        }
        Ok(())
    }

    fn enqueue_snapshot(&mut self, snapshot_id: i64, stage: Stage) -> StorageResult<()> {
        let current = self.get_snapshot(snapshot_id)?;

        // An enqueue never moves a row forward: a row short of the stage
        // keeps its state and the priority carries it through the stages in
        // between. Rows past the stage step back to its entry state, and a
        // rejected row rejoins at the start of the lifecycle.
        let new_state = match (stage, current.state) {
            (Stage::Scout, _) => SnapshotState::Pending,
            (_, SnapshotState::Rejected) => SnapshotState::Pending,
            (
                Stage::Record,
                SnapshotState::Recorded | SnapshotState::Published | SnapshotState::Compiled,
            ) => SnapshotState::Scouted,
            (Stage::Publish, SnapshotState::Published | SnapshotState::Compiled) => {
                SnapshotState::Recorded
            }
            (_, state) => state,
        };

        self.conn.execute(
            "UPDATE snapshots SET state = ?1, priority = ?2, claimed_at = NULL, \
             error_message = NULL WHERE id = ?3",
            params![new_state.to_code(), stage.priority(), snapshot_id],
        )?;
        Ok(())
    }

    fn delete_snapshot(&mut self, snapshot_id: i64) -> StorageResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM snapshots WHERE id = ?1", params![snapshot_id])?;
        if changed != 1 {
            return Err(StorageError::SnapshotNotFound(snapshot_id));
        }
        Ok(())
    }

    // ===== Candidate Queries =====

    fn scout_candidates(&self, limit: u32) -> StorageResult<Vec<CandidateRow>> {
        // An unvisited row inherits its best parent's points; self-links
        // never feed a snapshot's score back into itself.
        let sql = format!(
            "SELECT s.id, \
                    (SELECT MAX(p.points) FROM topology t \
                     JOIN snapshots p ON p.id = t.from_snapshot_id \
                     WHERE t.to_snapshot_id = s.id AND t.from_snapshot_id != s.id), \
                    s.priority, s.depth, s.host \
             FROM snapshots s \
             WHERE s.claimed_at IS NULL AND s.state = ?1 ORDER BY s.id LIMIT {}",
            limit
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![SnapshotState::Pending.to_code()], |row| {
            Ok(CandidateRow {
                id: row.get(0)?,
                points: row.get(1)?,
                priority: row.get(2)?,
                depth: row.get(3)?,
                host: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn record_candidates(&self, limit: u32) -> StorageResult<Vec<CandidateRow>> {
        self.candidates_where(
            "state IN (?1, ?2)",
            &[
                &SnapshotState::Scouted.to_code(),
                &SnapshotState::RecordFailed.to_code(),
            ],
            limit,
        )
    }

    fn publish_candidates(
        &self,
        min_publish_days: i64,
        limit: u32,
    ) -> StorageResult<Vec<CandidateRow>> {
        // A UrlKey published recently is off the table regardless of
        // timestamp, so variants of one page don't flood the feed.
        self.candidates_where(
            "state = ?1 AND url_key NOT IN ( \
                SELECT s2.url_key FROM snapshots s2 \
                JOIN recordings r ON r.snapshot_id = s2.id \
                WHERE r.published_at IS NOT NULL \
                AND julianday('now') - julianday(r.published_at) < ?2)",
            &[&SnapshotState::Recorded.to_code(), &min_publish_days],
            limit,
        )
    }

    fn visited_counts_by_host(&self) -> StorageResult<HashMap<String, u32>> {
        let sql = format!(
            "SELECT host, COUNT(*) FROM snapshots WHERE state >= {} GROUP BY host",
            SnapshotState::Scouted.to_code()
        );
        self.counts_by_host(&sql)
    }

    fn recording_counts_by_host(&self) -> StorageResult<HashMap<String, u32>> {
        self.counts_by_host(
            "SELECT s.host, COUNT(*) FROM recordings r \
             JOIN snapshots s ON s.id = r.snapshot_id GROUP BY s.host",
        )
    }

    // ===== Topology =====

    fn insert_link(&mut self, from_id: i64, to_id: i64) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO topology (from_snapshot_id, to_snapshot_id) VALUES (?1, ?2)",
            params![from_id, to_id],
        )?;
        Ok(())
    }

    // ===== Words =====

    fn set_snapshot_words(
        &mut self,
        snapshot_id: i64,
        tallies: &[WordTally],
    ) -> StorageResult<()> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "DELETE FROM snapshot_words WHERE snapshot_id = ?1",
            params![snapshot_id],
        )?;

        for tally in tallies {
            tx.execute(
                "INSERT OR IGNORE INTO words (word, is_tag) VALUES (?1, ?2)",
                params![tally.word, tally.is_tag as i64],
            )?;
            let word_id: i64 = tx.query_row(
                "SELECT id FROM words WHERE word = ?1 AND is_tag = ?2",
                params![tally.word, tally.is_tag as i64],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO snapshot_words (snapshot_id, word_id, count) VALUES (?1, ?2, ?3)",
                params![snapshot_id, word_id, tally.count],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn get_snapshot_words(&self, snapshot_id: i64) -> StorageResult<Vec<WordTally>> {
        let mut stmt = self.conn.prepare(
            "SELECT w.word, w.is_tag, sw.count FROM snapshot_words sw \
             JOIN words w ON w.id = sw.word_id WHERE sw.snapshot_id = ?1 \
             ORDER BY w.is_tag, w.word",
        )?;
        let rows = stmt.query_map(params![snapshot_id], |row| {
            Ok(WordTally {
                word: row.get(0)?,
                is_tag: row.get::<_, i64>(1)? != 0,
                count: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ===== Recordings =====

    fn insert_recording(
        &mut self,
        snapshot_id: i64,
        path: &str,
        has_audio: bool,
    ) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO recordings (snapshot_id, path, has_audio, created_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(snapshot_id) DO UPDATE SET \
                path = excluded.path, has_audio = excluded.has_audio, \
                created_at = excluded.created_at, approved = 0, \
                published_at = NULL, publish_url = NULL",
            params![snapshot_id, path, has_audio as i64, now],
        )?;
        let id: i64 = self.conn.query_row(
            "SELECT id FROM recordings WHERE snapshot_id = ?1",
            params![snapshot_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn get_recording(&self, recording_id: i64) -> StorageResult<RecordingRecord> {
        self.conn
            .query_row(
                "SELECT id, snapshot_id, path, has_audio, created_at, approved, published_at, \
                 publish_url FROM recordings WHERE id = ?1",
                params![recording_id],
                row_to_recording,
            )
            .optional()?
            .ok_or(StorageError::RecordingNotFound(recording_id))
    }

    fn recording_for(&self, snapshot_id: i64) -> StorageResult<Option<RecordingRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, snapshot_id, path, has_audio, created_at, approved, published_at, \
                 publish_url FROM recordings WHERE snapshot_id = ?1",
                params![snapshot_id],
                row_to_recording,
            )
            .optional()?)
    }

    fn approve_recording(&mut self, recording_id: i64) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE recordings SET approved = 1 WHERE id = ?1",
            params![recording_id],
        )?;
        if changed != 1 {
            return Err(StorageError::RecordingNotFound(recording_id));
        }
        Ok(())
    }

    fn mark_published(
        &mut self,
        recording_id: i64,
        publish_url: Option<&str>,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE recordings SET published_at = ?1, publish_url = ?2 WHERE id = ?3",
            params![now, publish_url, recording_id],
        )?;
        if changed != 1 {
            return Err(StorageError::RecordingNotFound(recording_id));
        }
        Ok(())
    }

    // ===== Save-on-demand bookkeeping =====

    fn was_saved(&self, url: &str) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM saved_urls WHERE url = ?1",
                params![url],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn mark_saved(&mut self, url: &str) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT OR IGNORE INTO saved_urls (url, saved_at) VALUES (?1, ?2)",
            params![url, now],
        )?;
        Ok(())
    }

    // ===== Reporting =====

    fn stats(&self) -> StorageResult<StatsRecord> {
        let mut by_state = Vec::new();
        let mut total = 0;
        for state in SnapshotState::all_states() {
            let count: u32 = self.conn.query_row(
                "SELECT COUNT(*) FROM snapshots WHERE state = ?1",
                params![state.to_code()],
                |row| row.get(0),
            )?;
            total += count;
            by_state.push((state, count));
        }

        let total_recordings: u32 =
            self.conn
                .query_row("SELECT COUNT(*) FROM recordings", [], |row| row.get(0))?;
        let unpublished_recordings: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM recordings WHERE published_at IS NULL",
            [],
            |row| row.get(0),
        )?;

        Ok(StatsRecord {
            by_state,
            total_snapshots: total,
            total_recordings,
            unpublished_recordings,
        })
    }

    fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash FROM runs \
                 ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok(RunRecord {
                        id: row.get(0)?,
                        started_at: row.get(1)?,
                        finished_at: row.get(2)?,
                        config_hash: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }
}

fn row_to_recording(row: &Row<'_>) -> rusqlite::Result<RecordingRecord> {
    Ok(RecordingRecord {
        id: row.get(0)?,
        snapshot_id: row.get(1)?,
        path: row.get(2)?,
        has_audio: row.get::<_, i64>(3)? != 0,
        created_at: row.get(4)?,
        approved: row.get::<_, i64>(5)? != 0,
        published_at: row.get(6)?,
        publish_url: row.get(7)?,
    })
}
