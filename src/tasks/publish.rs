//! Publish workflow
//!
//! Posts recorded snapshots through the external publish target, honoring
//! the approval gate and retrying transient target failures with the same
//! backoff schedule the gateway uses.

use crate::config::{Config, SnapshotOptions};
use crate::gateway::RetryPolicy;
use crate::ranking::order_batch;
use crate::state::SnapshotState;
use crate::storage::{RecordingRecord, SnapshotRecord, Storage};
use crate::tasks::{candidate_pool, cooled_candidates, BatchReport, PublishError, PublishTarget};
use crate::{Result, WaymarkError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use tracing::{info, warn};

enum PublishOutcome {
    Published,
    AwaitingApproval,
    Rejected,
}

pub struct PublishTask<'a, S: Storage, P: PublishTarget> {
    store: &'a mut S,
    target: &'a mut P,
    retry: RetryPolicy,
    config: &'a Config,
}

impl<'a, S: Storage, P: PublishTarget> PublishTask<'a, S, P> {
    pub fn new(store: &'a mut S, target: &'a mut P, config: &'a Config) -> Self {
        Self {
            store,
            target,
            retry: RetryPolicy::from_config(&config.gateway),
            config,
        }
    }

    /// Runs one publish batch. `limit` overrides the configured batch size.
    pub async fn run(&mut self, limit: Option<u32>) -> Result<BatchReport> {
        let batch_size = limit.unwrap_or(self.config.publish.batch_size) as usize;

        let rows = self.store.publish_candidates(
            self.config.ranking.min_publish_days_for_same_url,
            candidate_pool(batch_size),
        )?;
        // No host cool-down for publishing; recency on UrlKey already keeps
        // the feed varied.
        let candidates = cooled_candidates(rows, &HashMap::new(), 0);

        let mut rng = StdRng::from_entropy();
        let batch = order_batch(candidates, &self.config.ranking, batch_size, &mut rng);

        let mut report = BatchReport::default();
        for candidate in batch {
            if !self
                .store
                .claim_snapshot(candidate.id, SnapshotState::Recorded)?
            {
                report.skipped += 1;
                continue;
            }
            report.processed += 1;

            let snapshot = self.store.get_snapshot(candidate.id)?;
            match self.publish_one(&snapshot).await {
                Ok(PublishOutcome::Published) => report.succeeded += 1,
                Ok(PublishOutcome::AwaitingApproval) => {
                    report.skipped += 1;
                    self.store.release_claim(snapshot.id)?;
                }
                Ok(PublishOutcome::Rejected) => {
                    report.rejected += 1;
                    self.store.release_claim(snapshot.id)?;
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(snapshot_id = snapshot.id, error = %err, "publish failed");
                    self.store.set_error(snapshot.id, &err.to_string())?;
                    self.store.release_claim(snapshot.id)?;
                    if matches!(err, WaymarkError::Publish(ref p) if p.is_transient()) {
                        // The target is down; the rest of the batch can wait.
                        break;
                    }
                }
            }
        }

        info!(%report, "publish batch finished");
        Ok(report)
    }

    async fn publish_one(&mut self, snapshot: &SnapshotRecord) -> Result<PublishOutcome> {
        let Some(recording) = self.store.recording_for(snapshot.id)? else {
            self.store
                .set_error(snapshot.id, "recorded snapshot has no recording row")?;
            return Ok(PublishOutcome::Rejected);
        };

        if self.config.publish.require_approval && !recording.approved {
            return Ok(PublishOutcome::AwaitingApproval);
        }

        let options = SnapshotOptions::from_json(snapshot.options.as_deref())?;
        let caption = compose_caption(snapshot, &options);
        let sensitive = self.config.publish.flag_sensitive
            && options.sensitive.or(snapshot.is_sensitive).unwrap_or(false);

        let post_url = match self.post_with_retry(&recording, &caption, sensitive).await {
            Ok(post_url) => post_url,
            Err(PublishError::Rejected(reason)) => {
                // The target refused the content; leave the row recorded
                // with the reason for an operator to look at.
                self.store.set_error(snapshot.id, &reason)?;
                return Ok(PublishOutcome::Rejected);
            }
            Err(err) => return Err(WaymarkError::Publish(err)),
        };

        self.store
            .mark_published(recording.id, post_url.as_deref())?;
        self.store
            .transition_snapshot(snapshot.id, SnapshotState::Published)?;
        info!(
            snapshot_id = snapshot.id,
            post_url = post_url.as_deref().unwrap_or("-"),
            "published"
        );
        Ok(PublishOutcome::Published)
    }

    async fn post_with_retry(
        &mut self,
        recording: &RecordingRecord,
        caption: &str,
        sensitive: bool,
    ) -> std::result::Result<Option<String>, PublishError> {
        let mut attempt = 0;
        loop {
            match self.target.publish(recording, caption, sensitive).await {
                Ok(post_url) => return Ok(post_url),
                Err(err) if err.is_transient() && self.retry.should_retry(attempt) => {
                    let wait = self.retry.wait_for(attempt);
                    warn!(
                        attempt,
                        wait_secs = wait.as_secs_f64(),
                        error = %err,
                        "transient publish failure, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// The post caption: the operator's title override, the scouted title, or
/// the bare URL, with the page's oldest known year when there is one.
fn compose_caption(snapshot: &SnapshotRecord, options: &SnapshotOptions) -> String {
    let title = options
        .title
        .clone()
        .or_else(|| snapshot.title.clone())
        .unwrap_or_else(|| snapshot.url.clone());

    match snapshot.oldest_year {
        Some(year) => format!("{} ({})\n{}", title, year, snapshot.url),
        None => format!("{}\n{}", title, snapshot.url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::storage::{NewSnapshot, ScoutResult, SqliteDatastore};
    use crate::url::{registered_domain, url_host, url_key};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakePublishTarget {
        /// Failures to serve before succeeding
        failures: Mutex<Vec<PublishError>>,
        posts: Mutex<Vec<(String, bool)>>,
    }

    impl FakePublishTarget {
        fn new(failures: Vec<PublishError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                posts: Mutex::new(Vec::new()),
            }
        }

        fn posts(&self) -> Vec<(String, bool)> {
            self.posts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PublishTarget for FakePublishTarget {
        async fn publish(
            &mut self,
            _recording: &RecordingRecord,
            caption: &str,
            sensitive: bool,
        ) -> std::result::Result<Option<String>, PublishError> {
            let mut failures = self.failures.lock().unwrap();
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
            self.posts
                .lock()
                .unwrap()
                .push((caption.to_string(), sensitive));
            Ok(Some("http://posts.example.org/1".to_string()))
        }
    }

    fn fast_config() -> Config {
        let mut config = test_config();
        config.gateway.retry_backoff_secs = 0.01;
        config.gateway.max_attempts = Some(3);
        config
    }

    fn insert_recorded(store: &mut SqliteDatastore, url: &str, sensitive: bool) -> i64 {
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
                    title: Some("My Cool Page".to_string()),
                    points: 100,
                    is_sensitive: sensitive,
                    oldest_year: Some(1997),
                    ..Default::default()
                },
            )
            .unwrap();
        store.transition_snapshot(id, SnapshotState::Scouted).unwrap();
        store.claim_snapshot(id, SnapshotState::Scouted).unwrap();
        store.insert_recording(id, "/tmp/out.mp4", true).unwrap();
        store.transition_snapshot(id, SnapshotState::Recorded).unwrap();
        id
    }

    #[tokio::test]
    async fn test_publish_success() {
        let config = fast_config();
        let mut store = SqliteDatastore::new_in_memory().unwrap();
        let id = insert_recorded(&mut store, "http://www.mysite.com/", false);

        let mut target = FakePublishTarget::new(vec![]);
        let mut task = PublishTask::new(&mut store, &mut target, &config);
        let report = task.run(None).await.unwrap();
        assert_eq!(report.succeeded, 1);

        assert_eq!(
            store.get_snapshot(id).unwrap().state,
            SnapshotState::Published
        );
        let recording = store.recording_for(id).unwrap().unwrap();
        assert!(recording.published_at.is_some());
        assert_eq!(
            recording.publish_url.as_deref(),
            Some("http://posts.example.org/1")
        );

        let posts = target.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "My Cool Page (1997)\nhttp://www.mysite.com/");
        assert!(!posts[0].1);
    }

    #[tokio::test]
    async fn test_approval_gate() {
        let mut config = fast_config();
        config.publish.require_approval = true;
        let mut store = SqliteDatastore::new_in_memory().unwrap();
        let id = insert_recorded(&mut store, "http://www.mysite.com/", false);

        let mut target = FakePublishTarget::new(vec![]);
        {
            let mut task = PublishTask::new(&mut store, &mut target, &config);
            let report = task.run(None).await.unwrap();
            assert_eq!(report.skipped, 1);
            assert_eq!(report.succeeded, 0);
        }
        assert_eq!(
            store.get_snapshot(id).unwrap().state,
            SnapshotState::Recorded
        );

        // Approving the recording unblocks the next batch.
        let recording = store.recording_for(id).unwrap().unwrap();
        store.approve_recording(recording.id).unwrap();
        {
            let mut task = PublishTask::new(&mut store, &mut target, &config);
            let report = task.run(None).await.unwrap();
            assert_eq!(report.succeeded, 1);
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let config = fast_config();
        let mut store = SqliteDatastore::new_in_memory().unwrap();
        let id = insert_recorded(&mut store, "http://www.mysite.com/", false);

        let mut target = FakePublishTarget::new(vec![
            PublishError::RateLimited,
            PublishError::Transient("502".to_string()),
        ]);
        let mut task = PublishTask::new(&mut store, &mut target, &config);
        let report = task.run(None).await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(
            store.get_snapshot(id).unwrap().state,
            SnapshotState::Published
        );
    }

    #[tokio::test]
    async fn test_rejected_post_stays_recorded() {
        let config = fast_config();
        let mut store = SqliteDatastore::new_in_memory().unwrap();
        let id = insert_recorded(&mut store, "http://www.mysite.com/", false);

        let mut target =
            FakePublishTarget::new(vec![PublishError::Rejected("content policy".to_string())]);
        let mut task = PublishTask::new(&mut store, &mut target, &config);
        let report = task.run(None).await.unwrap();
        assert_eq!(report.rejected, 1);

        let snapshot = store.get_snapshot(id).unwrap();
        assert_eq!(snapshot.state, SnapshotState::Recorded);
        assert!(snapshot.error_message.unwrap().contains("content policy"));
    }

    #[tokio::test]
    async fn test_sensitive_flag_passed_to_target() {
        let config = fast_config();
        let mut store = SqliteDatastore::new_in_memory().unwrap();
        insert_recorded(&mut store, "http://www.mysite.com/", true);

        let mut target = FakePublishTarget::new(vec![]);
        let mut task = PublishTask::new(&mut store, &mut target, &config);
        task.run(None).await.unwrap();

        assert!(target.posts()[0].1);
    }

    #[test]
    fn test_caption_prefers_operator_title() {
        let mut store = SqliteDatastore::new_in_memory().unwrap();
        let id = insert_recorded(&mut store, "http://www.mysite.com/", false);
        let snapshot = store.get_snapshot(id).unwrap();

        let options = SnapshotOptions {
            title: Some("Better Title".to_string()),
            ..Default::default()
        };
        assert_eq!(
            compose_caption(&snapshot, &options),
            "Better Title (1997)\nhttp://www.mysite.com/"
        );
        assert_eq!(
            compose_caption(&snapshot, &SnapshotOptions::default()),
            "My Cool Page (1997)\nhttp://www.mysite.com/"
        );
    }
}
