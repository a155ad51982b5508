//! Record workflow
//!
//! Drives the external renderer over scouted snapshots: loads the playback
//! page under the traffic monitor, waits for settle, captures, and stores
//! the recording. Missing assets observed during the load get a recovery
//! pass afterwards so the next attempt finds them archived.

use crate::config::{Config, SnapshotOptions};
use crate::gateway::ArchiveGateway;
use crate::monitor::{AssetRecovery, HttpProbe, TrafficMonitor};
use crate::ranking::order_batch;
use crate::state::SnapshotState;
use crate::storage::{SnapshotRecord, Storage};
use crate::tasks::{candidate_pool, cooled_candidates, BatchReport, Renderer};
use crate::url::{FRAME_MODIFIER, MEDIA_MODIFIER};
use crate::{Result, WaymarkError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

enum RecordOutcome {
    Recorded,
    Rejected,
}

pub struct RecordTask<'a, S: Storage, R: Renderer> {
    store: &'a mut S,
    gateway: &'a ArchiveGateway,
    renderer: &'a mut R,
    probe: HttpProbe,
    config: &'a Config,
}

impl<'a, S: Storage, R: Renderer> RecordTask<'a, S, R> {
    pub fn new(
        store: &'a mut S,
        gateway: &'a ArchiveGateway,
        renderer: &'a mut R,
        config: &'a Config,
    ) -> Result<Self> {
        let probe = HttpProbe::new(&config.gateway.user_agent)?;
        Ok(Self {
            store,
            gateway,
            renderer,
            probe,
            config,
        })
    }

    /// Runs one record batch. `limit` overrides the configured batch size.
    pub async fn run(&mut self, limit: Option<u32>) -> Result<BatchReport> {
        let batch_size = limit.unwrap_or(self.config.record.batch_size) as usize;

        let rows = self.store.record_candidates(candidate_pool(batch_size))?;
        let host_counts = self.store.recording_counts_by_host()?;
        let candidates = cooled_candidates(
            rows,
            &host_counts,
            self.config.ranking.min_recordings_for_same_host,
        );

        let mut rng = StdRng::from_entropy();
        let batch = order_batch(candidates, &self.config.ranking, batch_size, &mut rng);

        let mut report = BatchReport::default();
        for candidate in batch {
            let snapshot = self.store.get_snapshot(candidate.id)?;
            if !snapshot.state.is_recordable()
                || !self.store.claim_snapshot(snapshot.id, snapshot.state)?
            {
                report.skipped += 1;
                continue;
            }
            report.processed += 1;

            match self.record_one(&snapshot).await {
                Ok(RecordOutcome::Recorded) => report.succeeded += 1,
                Ok(RecordOutcome::Rejected) => report.rejected += 1,
                Err(WaymarkError::Capture(err)) => {
                    report.failed += 1;
                    warn!(snapshot_id = snapshot.id, error = %err, "capture failed");
                    self.store.set_error(snapshot.id, &err.to_string())?;
                    if snapshot.state == SnapshotState::Scouted {
                        self.store
                            .transition_snapshot(snapshot.id, SnapshotState::RecordFailed)?;
                    } else {
                        // Already in the retry state; leave it there.
                        self.store.release_claim(snapshot.id)?;
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(snapshot_id = snapshot.id, error = %err, "recording failed");
                    self.store.set_error(snapshot.id, &err.to_string())?;
                    self.store.release_claim(snapshot.id)?;
                }
            }
        }

        info!(%report, "record batch finished");
        Ok(report)
    }

    async fn record_one(&mut self, snapshot: &SnapshotRecord) -> Result<RecordOutcome> {
        let options = SnapshotOptions::from_json(snapshot.options.as_deref())?;

        let sensitive = options.sensitive.or(snapshot.is_sensitive).unwrap_or(false);
        if sensitive && !self.config.record.record_sensitive {
            self.store
                .set_error(snapshot.id, "sensitive content, recording disabled")?;
            self.store
                .transition_snapshot(snapshot.id, SnapshotState::Rejected)?;
            return Ok(RecordOutcome::Rejected);
        }

        let monitor_config = options.apply_to_monitor(&self.config.monitor);
        let monitor = TrafficMonitor::new(&monitor_config);

        let modifier = if snapshot.is_media {
            MEDIA_MODIFIER
        } else {
            FRAME_MODIFIER
        };
        let playback = self
            .gateway
            .playback_url(&snapshot.timestamp, modifier, &snapshot.url);

        debug!(snapshot_id = snapshot.id, url = playback, "loading for capture");
        self.renderer.load(&playback, &monitor).await?;

        let reason = monitor.wait_for_settle().await;
        debug!(snapshot_id = snapshot.id, ?reason, "page settled");

        let capture = self.renderer.capture().await?;
        self.store
            .insert_recording(snapshot.id, &capture.path, capture.has_audio)?;
        self.store
            .transition_snapshot(snapshot.id, SnapshotState::Recorded)?;
        info!(
            snapshot_id = snapshot.id,
            path = capture.path,
            "recording stored"
        );

        // The recording is safe; recovery is best-effort work for future
        // attempts at other snapshots of this page.
        let missing = monitor.missing_assets();
        if !missing.is_empty()
            && (monitor_config.find_missing_assets || monitor_config.save_live_assets)
        {
            let recovery = AssetRecovery::new(self.gateway, &monitor_config);
            recovery
                .recover_all(self.store, &self.probe, &missing, &snapshot.timestamp)
                .await;
        }

        Ok(RecordOutcome::Recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::storage::{NewSnapshot, ScoutResult, SqliteDatastore};
    use crate::tasks::{Capture, CaptureError};
    use crate::url::{registered_domain, url_host, url_key};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// A renderer that follows a script of capture results.
    struct FakeRenderer {
        loads: Mutex<Vec<String>>,
        results: Mutex<Vec<std::result::Result<Capture, CaptureError>>>,
    }

    impl FakeRenderer {
        fn new(results: Vec<std::result::Result<Capture, CaptureError>>) -> Self {
            Self {
                loads: Mutex::new(Vec::new()),
                results: Mutex::new(results),
            }
        }

        fn succeeding() -> Self {
            Self::new(vec![Ok(Capture {
                path: "/tmp/out.mp4".to_string(),
                has_audio: true,
            })])
        }

        fn loads(&self) -> Vec<String> {
            self.loads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn load(
            &mut self,
            url: &str,
            monitor: &TrafficMonitor,
        ) -> std::result::Result<(), CaptureError> {
            self.loads.lock().unwrap().push(url.to_string());
            // One asset request that resolves, so the page settles idle.
            monitor.observe_request(url);
            monitor.observe_response(url, true);
            Ok(())
        }

        async fn capture(&mut self) -> std::result::Result<Capture, CaptureError> {
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                Ok(Capture {
                    path: "/tmp/out.mp4".to_string(),
                    has_audio: false,
                })
            } else {
                results.remove(0)
            }
        }
    }

    fn fast_config() -> Config {
        let mut config = test_config();
        config.monitor.queue_timeout_secs = 0.01;
        config.monitor.total_timeout_secs = 1.0;
        config.monitor.poll_interval_ms = 2;
        config.monitor.save_live_assets = false;
        config.monitor.find_missing_assets = false;
        config
    }

    fn insert_scouted(
        store: &mut SqliteDatastore,
        url: &str,
        sensitive: bool,
    ) -> i64 {
        let host = url_host(url).unwrap();
        let id = store
            .insert_or_get_snapshot(&NewSnapshot {
                url: url.to_string(),
                timestamp: "19970101000000".to_string(),
                url_key: url_key(url).unwrap(),
                host: host.clone(),
                domain: registered_domain(&host),
                parent_id: None,
                depth: 0,
                is_media: false,
                media_extension: None,
            })
            .unwrap();
        store.claim_snapshot(id, SnapshotState::Pending).unwrap();
        store
            .store_scout_result(
                id,
                &ScoutResult {
                    title: Some("A Page".to_string()),
                    points: 100,
                    is_sensitive: sensitive,
                    oldest_year: Some(1997),
                    ..Default::default()
                },
            )
            .unwrap();
        store.transition_snapshot(id, SnapshotState::Scouted).unwrap();
        id
    }

    #[tokio::test]
    async fn test_record_success() {
        let config = fast_config();
        let gateway = ArchiveGateway::new(config.gateway.clone()).unwrap();
        let mut store = SqliteDatastore::new_in_memory().unwrap();
        let id = insert_scouted(&mut store, "http://www.mysite.com/", false);

        let mut renderer = FakeRenderer::succeeding();
        let mut task = RecordTask::new(&mut store, &gateway, &mut renderer, &config).unwrap();
        let report = task.run(None).await.unwrap();
        assert_eq!(report.succeeded, 1);

        let snapshot = store.get_snapshot(id).unwrap();
        assert_eq!(snapshot.state, SnapshotState::Recorded);

        let recording = store.recording_for(id).unwrap().unwrap();
        assert_eq!(recording.path, "/tmp/out.mp4");
        assert!(recording.has_audio);

        // The renderer was handed the frame playback URL.
        let loads = renderer.loads();
        assert_eq!(loads.len(), 1);
        assert!(loads[0].contains("19970101000000if_/http://www.mysite.com/"));
    }

    #[tokio::test]
    async fn test_capture_failure_then_retry() {
        let config = fast_config();
        let gateway = ArchiveGateway::new(config.gateway.clone()).unwrap();
        let mut store = SqliteDatastore::new_in_memory().unwrap();
        let id = insert_scouted(&mut store, "http://www.mysite.com/", false);

        let mut renderer = FakeRenderer::new(vec![Err(CaptureError::PluginCrash)]);
        {
            let mut task =
                RecordTask::new(&mut store, &gateway, &mut renderer, &config).unwrap();
            let report = task.run(None).await.unwrap();
            assert_eq!(report.failed, 1);
        }

        let snapshot = store.get_snapshot(id).unwrap();
        assert_eq!(snapshot.state, SnapshotState::RecordFailed);
        assert!(snapshot.error_message.unwrap().contains("plugin crashed"));

        // Failed rows stay eligible; the next batch retries and succeeds.
        let mut renderer = FakeRenderer::succeeding();
        {
            let mut task =
                RecordTask::new(&mut store, &gateway, &mut renderer, &config).unwrap();
            let report = task.run(None).await.unwrap();
            assert_eq!(report.succeeded, 1);
        }
        assert_eq!(
            store.get_snapshot(id).unwrap().state,
            SnapshotState::Recorded
        );
    }

    #[tokio::test]
    async fn test_sensitive_rejected_when_recording_disabled() {
        let mut config = fast_config();
        config.record.record_sensitive = false;
        let gateway = ArchiveGateway::new(config.gateway.clone()).unwrap();
        let mut store = SqliteDatastore::new_in_memory().unwrap();
        let id = insert_scouted(&mut store, "http://www.mysite.com/", true);

        let mut renderer = FakeRenderer::succeeding();
        let mut task = RecordTask::new(&mut store, &gateway, &mut renderer, &config).unwrap();
        let report = task.run(None).await.unwrap();
        assert_eq!(report.rejected, 1);
        assert!(renderer.loads().is_empty());
        assert_eq!(
            store.get_snapshot(id).unwrap().state,
            SnapshotState::Rejected
        );
    }

    #[tokio::test]
    async fn test_media_snapshot_uses_raw_modifier() {
        let config = fast_config();
        let gateway = ArchiveGateway::new(config.gateway.clone()).unwrap();
        let mut store = SqliteDatastore::new_in_memory().unwrap();

        let id = store
            .insert_or_get_snapshot(&NewSnapshot {
                url: "http://www.mysite.com/game.swf".to_string(),
                timestamp: "19970101000000".to_string(),
                url_key: url_key("http://www.mysite.com/game.swf").unwrap(),
                host: "www.mysite.com".to_string(),
                domain: "mysite.com".to_string(),
                parent_id: None,
                depth: 0,
                is_media: true,
                media_extension: Some("swf".to_string()),
            })
            .unwrap();
        store.claim_snapshot(id, SnapshotState::Pending).unwrap();
        store
            .store_scout_result(id, &ScoutResult::default())
            .unwrap();
        store.transition_snapshot(id, SnapshotState::Scouted).unwrap();

        let mut renderer = FakeRenderer::succeeding();
        let mut task = RecordTask::new(&mut store, &gateway, &mut renderer, &config).unwrap();
        task.run(None).await.unwrap();

        let loads = renderer.loads();
        assert!(loads[0].contains("19970101000000oe_/"));
    }

    #[tokio::test]
    async fn test_option_override_forces_sensitivity() {
        let mut config = fast_config();
        config.record.record_sensitive = false;
        let gateway = ArchiveGateway::new(config.gateway.clone()).unwrap();
        let mut store = SqliteDatastore::new_in_memory().unwrap();

        // Scout found nothing sensitive, but an operator flagged the row.
        let id = insert_scouted(&mut store, "http://www.mysite.com/", false);
        store
            .set_options(
                id,
                &SnapshotOptions {
                    sensitive: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();

        let mut renderer = FakeRenderer::succeeding();
        let mut task = RecordTask::new(&mut store, &gateway, &mut renderer, &config).unwrap();
        let report = task.run(None).await.unwrap();
        assert_eq!(report.rejected, 1);
    }
}
