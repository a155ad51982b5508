//! Archive gateway
//!
//! All traffic to the archive's services goes through here: the
//! nearest-capture lookup, the capture index search, and save-on-demand.
//! Each service sits behind its own moving-window rate limiter, and
//! transient failures are retried with exponential backoff.

mod rate;

pub use rate::{RateLimiter, WindowState};

use crate::config::GatewayConfig;
use crate::{Result, WaymarkError};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// One capture known to the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRef {
    pub url: String,
    pub timestamp: String,
    pub status: Option<u16>,
}

/// How an index search matches the query URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchScope {
    /// Exactly the given URL
    Exact,
    /// The URL and everything under its path
    Prefix,
    /// Every host under the URL's registered domain
    Domain,
}

impl MatchScope {
    fn as_param(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Prefix => "prefix",
            Self::Domain => "domain",
        }
    }
}

/// A capture index query.
#[derive(Debug, Clone)]
pub struct IndexQuery {
    pub url: String,
    pub scope: MatchScope,
    pub limit: Option<u32>,
    /// Only captures that returned 200
    pub only_ok: bool,
}

impl IndexQuery {
    pub fn exact(url: &str) -> Self {
        Self {
            url: url.to_string(),
            scope: MatchScope::Exact,
            limit: None,
            only_ok: true,
        }
    }

    pub fn prefix(url: &str) -> Self {
        Self {
            scope: MatchScope::Prefix,
            ..Self::exact(url)
        }
    }

    pub fn domain(url: &str) -> Self {
        Self {
            scope: MatchScope::Domain,
            ..Self::exact(url)
        }
    }
}

/// Exponential backoff schedule for transient failures.
///
/// Without a configured `max-attempts` the schedule never gives up: an
/// archive outage is expected to pass, and the wait between tries stops
/// growing once it reaches the ceiling.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    backoff_secs: f64,
    max_wait_secs: Option<f64>,
    max_attempts: Option<u32>,
}

/// Wait ceiling used when no `retry-max-wait-secs` is configured.
const DEFAULT_MAX_WAIT_SECS: f64 = 3600.0;

impl RetryPolicy {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            backoff_secs: config.retry_backoff_secs,
            max_wait_secs: config.retry_max_wait_secs,
            max_attempts: config.max_attempts,
        }
    }

    /// Whether another try is allowed after `attempt` failures (zero-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt + 1 < max)
    }

    /// The wait before retry number `attempt` (zero-based). Doubles each
    /// time up to the ceiling, so an unbounded schedule saturates instead of
    /// overflowing.
    pub fn wait_for(&self, attempt: u32) -> Duration {
        let wait = self.backoff_secs * 2f64.powi(attempt.min(64) as i32);
        let ceiling = self.max_wait_secs.unwrap_or(DEFAULT_MAX_WAIT_SECS);
        Duration::from_secs_f64(wait.min(ceiling))
    }
}

#[derive(Debug, Deserialize)]
struct AvailabilityResponse {
    #[serde(default)]
    archived_snapshots: ArchivedSnapshots,
}

#[derive(Debug, Default, Deserialize)]
struct ArchivedSnapshots {
    closest: Option<ClosestCapture>,
}

#[derive(Debug, Deserialize)]
struct ClosestCapture {
    #[serde(default)]
    available: bool,
    url: String,
    timestamp: String,
    #[serde(default)]
    status: String,
}

/// A document fetched from playback.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub html: String,

    /// The origin server's Last-Modified header, when the archive preserved it
    pub last_modified: Option<String>,
}

/// Client for the archive's remote services.
pub struct ArchiveGateway {
    http: Client,
    config: GatewayConfig,
    retry: RetryPolicy,
    lookup_limiter: RateLimiter,
    index_limiter: RateLimiter,
    save_limiter: RateLimiter,
}

impl ArchiveGateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()?;

        let poll = Duration::from_millis(config.poll_frequency_ms);
        Ok(Self {
            retry: RetryPolicy::from_config(&config),
            lookup_limiter: RateLimiter::new(&config.lookup_limit, poll),
            index_limiter: RateLimiter::new(&config.index_limit, poll),
            save_limiter: RateLimiter::new(&config.save_limit, poll),
            http,
            config,
        })
    }

    /// The playback URL for a capture, without toolbar chrome.
    pub fn playback_url(&self, timestamp: &str, modifier: &str, url: &str) -> String {
        format!(
            "{}/{}{}/{}",
            self.config.playback_url.trim_end_matches('/'),
            timestamp,
            modifier,
            url
        )
    }

    /// Pre-flight check before a batch: one un-retried request against the
    /// lookup service. Skipping a batch outright beats burning quota and
    /// backoff waits on every snapshot when the archive is confirmed down.
    pub async fn is_available(&self) -> bool {
        self.lookup_limiter.acquire().await;
        match self
            .http
            .get(&self.config.lookup_url)
            .query(&[("url", "http://example.com/")])
            .send()
            .await
        {
            Ok(response) => !response.status().is_server_error(),
            Err(_) => false,
        }
    }

    /// Finds the capture nearest to `timestamp` for a URL, if the archive
    /// holds one at all.
    pub async fn lookup(&self, url: &str, timestamp: &str) -> Result<Option<CaptureRef>> {
        let response = self
            .request_with_retry(&self.lookup_limiter, || {
                self.http
                    .get(&self.config.lookup_url)
                    .query(&[("url", url), ("timestamp", timestamp)])
            })
            .await?;

        let body: AvailabilityResponse = response.json().await.map_err(|source| {
            WaymarkError::Http {
                url: url.to_string(),
                source,
            }
        })?;

        Ok(body.archived_snapshots.closest.and_then(|closest| {
            if !closest.available {
                return None;
            }
            Some(CaptureRef {
                url: closest.url,
                timestamp: closest.timestamp,
                status: closest.status.parse().ok(),
            })
        }))
    }

    /// Fetches a capture's raw document from playback, without toolbar
    /// chrome. Playback is not one of the three quota'd services, so no rate
    /// limiter applies, but transient failures get the same backoff.
    pub async fn fetch_page(&self, timestamp: &str, url: &str) -> Result<FetchedPage> {
        let playback = self.playback_url(timestamp, crate::url::FRAME_MODIFIER, url);
        let mut attempt = 0;
        loop {
            let failure = match self.http.get(&playback).send().await {
                Ok(response) if response.status().is_success() => {
                    let last_modified = response
                        .headers()
                        .get(reqwest::header::LAST_MODIFIED)
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);
                    let html = response.text().await.map_err(|source| WaymarkError::Http {
                        url: url.to_string(),
                        source,
                    })?;
                    return Ok(FetchedPage {
                        html,
                        last_modified,
                    });
                }
                Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                    return Err(WaymarkError::NoCapture {
                        url: url.to_string(),
                        timestamp: timestamp.to_string(),
                    });
                }
                Ok(response) => classify_status(response.status()),
                Err(err) if err.is_timeout() || err.is_connect() => Transient::Yes,
                Err(err) => return Err(WaymarkError::Reqwest(err)),
            };

            match failure {
                Transient::Yes if self.retry.should_retry(attempt) => {
                    let wait = self.retry.wait_for(attempt);
                    warn!(url, wait_secs = wait.as_secs_f64(), "playback fetch failed, backing off");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Transient::Yes => {
                    return Err(WaymarkError::ServiceUnavailable(format!(
                        "playback gave up after {} attempts",
                        attempt + 1
                    )));
                }
                Transient::No(status) => {
                    return Err(WaymarkError::ServiceUnavailable(format!(
                        "playback answered {}",
                        status
                    )));
                }
            }
        }
    }

    /// Searches the capture index. Returns one entry per matching capture,
    /// newest ordering left to the service.
    pub async fn index_search(&self, query: &IndexQuery) -> Result<Vec<CaptureRef>> {
        let response = self
            .request_with_retry(&self.index_limiter, || {
                let mut request = self
                    .http
                    .get(&self.config.index_url)
                    .query(&[("url", query.url.as_str())])
                    .query(&[("matchType", query.scope.as_param())]);
                if let Some(limit) = query.limit {
                    request = request.query(&[("limit", limit.to_string())]);
                }
                if query.only_ok {
                    request = request.query(&[("filter", "statuscode:200")]);
                }
                request
            })
            .await?;

        let body = response.text().await.map_err(|source| WaymarkError::Http {
            url: query.url.clone(),
            source,
        })?;

        Ok(parse_index_lines(&body))
    }

    /// Asks the archive to capture a live URL now. The datastore remembers
    /// submissions separately so a URL is only ever saved once.
    pub async fn save(&self, url: &str) -> Result<()> {
        let save_url = format!(
            "{}/{}",
            self.config.save_url.trim_end_matches('/'),
            url
        );
        let response = self
            .request_with_retry(&self.save_limiter, || self.http.get(&save_url))
            .await?;
        debug!(url, status = %response.status(), "save-on-demand submitted");
        Ok(())
    }

    /// Sends a request, waiting on the service's rate limiter first and
    /// retrying transient failures on the backoff schedule.
    async fn request_with_retry(
        &self,
        limiter: &RateLimiter,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<Response> {
        let mut attempt = 0;
        loop {
            limiter.acquire().await;

            let failure = match build().send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => classify_status(response.status()),
                Err(err) if err.is_timeout() || err.is_connect() => Transient::Yes,
                Err(err) => return Err(WaymarkError::Reqwest(err)),
            };

            match failure {
                Transient::Yes if self.retry.should_retry(attempt) => {
                    let wait = self.retry.wait_for(attempt);
                    warn!(
                        attempt,
                        wait_secs = wait.as_secs_f64(),
                        "transient gateway failure, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Transient::Yes => {
                    return Err(WaymarkError::ServiceUnavailable(format!(
                        "gave up after {} attempts",
                        attempt + 1
                    )));
                }
                Transient::No(status) => {
                    return Err(WaymarkError::ServiceUnavailable(format!(
                        "service answered {}",
                        status
                    )));
                }
            }
        }
    }
}

enum Transient {
    Yes,
    No(StatusCode),
}

fn classify_status(status: StatusCode) -> Transient {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Transient::Yes
    } else {
        Transient::No(status)
    }
}

/// Parses the index service's space-separated line format:
/// `urlkey timestamp original mimetype statuscode digest length`.
fn parse_index_lines(body: &str) -> Vec<CaptureRef> {
    body.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                return None;
            }
            Some(CaptureRef {
                url: fields[2].to_string(),
                timestamp: fields[1].to_string(),
                status: fields[4].parse().ok(),
            })
        })
        .collect()
}
