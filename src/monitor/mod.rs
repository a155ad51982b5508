//! Traffic monitor
//!
//! Observes every request and response made while a page loads in the
//! external renderer, decides when the page has settled, and collects
//! missing assets for the recovery pass (see the recovery submodule).
//!
//! The settle decision runs on its own timer: a hung render never blocks
//! timeout enforcement, and the workflow polls `wait_for_settle` rather
//! than coupling to the monitor's internals.

mod recovery;

pub use recovery::{AssetRecovery, HttpProbe, LiveProbe, RecoveryOutcome};

use crate::config::MonitorConfig;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Why a page load was declared finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleReason {
    /// No network activity for the idle window
    Idle,
    /// The hard ceiling on total load time elapsed
    TotalTimeout,
}

/// The clock-free settle decision, testable without waiting.
#[derive(Debug)]
pub struct IdleDetector {
    queue_timeout: Duration,
    total_timeout: Duration,
    started: Instant,
    last_activity: Instant,
    in_flight: usize,
}

impl IdleDetector {
    pub fn new(queue_timeout: Duration, total_timeout: Duration, now: Instant) -> Self {
        Self {
            queue_timeout,
            total_timeout,
            started: now,
            last_activity: now,
            in_flight: 0,
        }
    }

    pub fn request_started(&mut self, now: Instant) {
        self.in_flight += 1;
        self.last_activity = now;
    }

    pub fn response_received(&mut self, now: Instant) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.last_activity = now;
    }

    /// Checks whether the page has settled as of `now`.
    ///
    /// The total ceiling wins over idleness: a page that polls forever is
    /// cut off at exactly `total_timeout` no matter how busy it is, while a
    /// quiet page with nothing in flight settles at the first gap of
    /// `queue_timeout`.
    pub fn poll(&self, now: Instant) -> Option<SettleReason> {
        if now.duration_since(self.started) >= self.total_timeout {
            return Some(SettleReason::TotalTimeout);
        }
        if self.in_flight == 0 && now.duration_since(self.last_activity) >= self.queue_timeout {
            return Some(SettleReason::Idle);
        }
        None
    }
}

/// One observer of a single page load.
///
/// Created fresh per load; the not-found cache and missing-asset list are
/// scoped to that one page on purpose.
pub struct TrafficMonitor {
    detector: Mutex<IdleDetector>,
    poll_interval: Duration,
    cache_not_found: bool,
    not_found: Mutex<HashSet<String>>,
    missing: Mutex<Vec<String>>,
}

impl TrafficMonitor {
    pub fn new(config: &MonitorConfig) -> Self {
        let now = Instant::now();
        Self {
            detector: Mutex::new(IdleDetector::new(
                Duration::from_secs_f64(config.queue_timeout_secs),
                Duration::from_secs_f64(config.total_timeout_secs),
                now,
            )),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            cache_not_found: config.cache_not_found,
            not_found: Mutex::new(HashSet::new()),
            missing: Mutex::new(Vec::new()),
        }
    }

    /// Notes that the renderer asked for a URL.
    pub fn observe_request(&self, url: &str) {
        debug!(url, "request observed");
        let mut detector = self.detector.lock().unwrap_or_else(|e| e.into_inner());
        detector.request_started(Instant::now());
    }

    /// Notes that a response arrived. `found` is false when the archive had
    /// no capture for the URL; such URLs are collected for recovery.
    pub fn observe_response(&self, url: &str, found: bool) {
        {
            let mut detector = self.detector.lock().unwrap_or_else(|e| e.into_inner());
            detector.response_received(Instant::now());
        }

        if found {
            return;
        }

        if self.cache_not_found {
            let mut cache = self.not_found.lock().unwrap_or_else(|e| e.into_inner());
            // Old plugin runtimes retry missing assets aggressively; only
            // the first miss per load is worth an index query.
            if !cache.insert(url.to_string()) {
                return;
            }
        }

        let mut missing = self.missing.lock().unwrap_or_else(|e| e.into_inner());
        missing.push(url.to_string());
    }

    /// Whether a URL already came back not-found during this load.
    pub fn is_known_missing(&self, url: &str) -> bool {
        let cache = self.not_found.lock().unwrap_or_else(|e| e.into_inner());
        cache.contains(url)
    }

    /// The missing assets observed so far, in first-seen order.
    pub fn missing_assets(&self) -> Vec<String> {
        let missing = self.missing.lock().unwrap_or_else(|e| e.into_inner());
        missing.clone()
    }

    /// Blocks until the page settles, polling the detector on its own timer.
    pub async fn wait_for_settle(&self) -> SettleReason {
        loop {
            let settled = {
                let detector = self.detector.lock().unwrap_or_else(|e| e.into_inner());
                detector.poll(Instant::now())
            };
            if let Some(reason) = settled {
                return reason;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    fn detector(queue_secs: u64, total_secs: u64, now: Instant) -> IdleDetector {
        IdleDetector::new(
            Duration::from_secs(queue_secs),
            Duration::from_secs(total_secs),
            now,
        )
    }

    #[test]
    fn test_settles_idle_at_first_quiet_gap() {
        let start = Instant::now();
        let mut d = detector(30, 300, start);

        d.request_started(start);
        d.response_received(start + Duration::from_secs(2));

        assert_eq!(d.poll(start + Duration::from_secs(31)), None);
        // 30s of silence after the last response.
        assert_eq!(
            d.poll(start + Duration::from_secs(32)),
            Some(SettleReason::Idle)
        );
    }

    #[test]
    fn test_in_flight_request_blocks_idle() {
        let start = Instant::now();
        let mut d = detector(30, 300, start);

        d.request_started(start);
        // The response never arrives; idle never fires, only the ceiling.
        assert_eq!(d.poll(start + Duration::from_secs(100)), None);
        assert_eq!(
            d.poll(start + Duration::from_secs(300)),
            Some(SettleReason::TotalTimeout)
        );
    }

    #[test]
    fn test_busy_stream_settles_at_total_timeout() {
        let start = Instant::now();
        let mut d = detector(30, 300, start);

        // Requests keep arriving with gaps below the idle window.
        for i in 0..30 {
            let t = start + Duration::from_secs(i * 10);
            d.request_started(t);
            d.response_received(t + Duration::from_secs(1));
            assert_eq!(d.poll(t + Duration::from_secs(2)), None);
        }

        assert_eq!(
            d.poll(start + Duration::from_secs(300)),
            Some(SettleReason::TotalTimeout)
        );
    }

    #[test]
    fn test_total_timeout_wins_over_idle() {
        let start = Instant::now();
        let d = detector(30, 300, start);
        // Way past both bounds: the ceiling is reported, not idleness.
        assert_eq!(
            d.poll(start + Duration::from_secs(400)),
            Some(SettleReason::TotalTimeout)
        );
    }

    #[test]
    fn test_monitor_collects_missing_once() {
        let monitor = TrafficMonitor::new(&test_config().monitor);

        monitor.observe_request("http://a.com/lost.gif");
        monitor.observe_response("http://a.com/lost.gif", false);
        // A plugin retry loop hammers the same asset.
        monitor.observe_request("http://a.com/lost.gif");
        monitor.observe_response("http://a.com/lost.gif", false);
        monitor.observe_request("http://a.com/fine.gif");
        monitor.observe_response("http://a.com/fine.gif", true);

        assert_eq!(monitor.missing_assets(), vec!["http://a.com/lost.gif"]);
        assert!(monitor.is_known_missing("http://a.com/lost.gif"));
        assert!(!monitor.is_known_missing("http://a.com/fine.gif"));
    }

    #[test]
    fn test_monitor_without_cache_records_every_miss() {
        let mut config = test_config().monitor;
        config.cache_not_found = false;
        let monitor = TrafficMonitor::new(&config);

        monitor.observe_response("http://a.com/lost.gif", false);
        monitor.observe_response("http://a.com/lost.gif", false);
        assert_eq!(monitor.missing_assets().len(), 2);
    }

    #[tokio::test]
    async fn test_wait_for_settle_returns_idle() {
        let mut config = test_config().monitor;
        config.queue_timeout_secs = 0.05;
        config.total_timeout_secs = 10.0;
        config.poll_interval_ms = 5;

        let monitor = TrafficMonitor::new(&config);
        let reason = monitor.wait_for_settle().await;
        assert_eq!(reason, SettleReason::Idle);
    }

    #[tokio::test]
    async fn test_wait_for_settle_hits_ceiling_while_busy() {
        let mut config = test_config().monitor;
        config.queue_timeout_secs = 10.0;
        config.total_timeout_secs = 0.05;
        config.poll_interval_ms = 5;

        let monitor = TrafficMonitor::new(&config);
        monitor.observe_request("http://a.com/stream");
        let reason = monitor.wait_for_settle().await;
        assert_eq!(reason, SettleReason::TotalTimeout);
    }
}
