//! Missing-asset recovery
//!
//! When a page load asks for an asset the archive doesn't hold, three
//! escalating options are tried: another capture of the exact URL, a capture
//! of the same path on a sibling subdomain, and finally saving the live
//! resource for the future. None of them can rescue the current load; they
//! exist so the next recording of this page finds the asset in place.

use crate::config::MonitorConfig;
use crate::gateway::{ArchiveGateway, CaptureRef, IndexQuery};
use crate::storage::Storage;
use crate::url::{registered_domain, url_host};
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Checks whether a URL still resolves on the live web.
///
/// Behind a trait so recovery logic can be tested without touching the
/// network; the probe result is only ever treated as a hint.
#[async_trait]
pub trait LiveProbe: Send + Sync {
    async fn resolves(&self, url: &str) -> bool;
}

/// Live probe over plain HTTP HEAD requests.
pub struct HttpProbe {
    http: reqwest::Client,
}

impl HttpProbe {
    pub fn new(user_agent: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl LiveProbe for HttpProbe {
    async fn resolves(&self, url: &str) -> bool {
        match self.http.head(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// What became of one missing asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The archive holds a capture after all, at another timestamp or on a
    /// sibling subdomain
    Archived(CaptureRef),
    /// Nothing archived, but the live resource was submitted for saving
    SavedLive,
    /// Nothing archived and nothing live; the asset is gone
    Lost,
}

/// Runs the recovery pipeline for the missing assets of one page load.
pub struct AssetRecovery<'a> {
    gateway: &'a ArchiveGateway,
    config: &'a MonitorConfig,
}

impl<'a> AssetRecovery<'a> {
    pub fn new(gateway: &'a ArchiveGateway, config: &'a MonitorConfig) -> Self {
        Self { gateway, config }
    }

    /// Recovers every asset independently. One broken asset never aborts
    /// the rest: errors are logged against that asset and recovery moves on.
    pub async fn recover_all<S: Storage, P: LiveProbe>(
        &self,
        store: &mut S,
        probe: &P,
        missing: &[String],
        target_timestamp: &str,
    ) -> Vec<(String, RecoveryOutcome)> {
        let mut outcomes = Vec::with_capacity(missing.len());
        for url in missing {
            match self.recover_one(store, probe, url, target_timestamp).await {
                Ok(outcome) => outcomes.push((url.clone(), outcome)),
                Err(err) => {
                    warn!(url, error = %err, "asset recovery failed, skipping");
                    outcomes.push((url.clone(), RecoveryOutcome::Lost));
                }
            }
        }
        outcomes
    }

    async fn recover_one<S: Storage, P: LiveProbe>(
        &self,
        store: &mut S,
        probe: &P,
        url: &str,
        target_timestamp: &str,
    ) -> Result<RecoveryOutcome> {
        if self.config.find_missing_assets {
            // Any other capture of the exact URL.
            let captures = self.gateway.index_search(&IndexQuery::exact(url)).await?;
            if let Some(capture) = nearest_in_time(captures, target_timestamp) {
                info!(url, found = %capture.url, "missing asset found at another timestamp");
                return Ok(RecoveryOutcome::Archived(capture));
            }

            // The same path may live on a sibling subdomain after a site
            // reorganization.
            if let Some(capture) = self.search_sibling_subdomains(url, target_timestamp).await? {
                info!(url, found = %capture.url, "missing asset found on sibling subdomain");
                return Ok(RecoveryOutcome::Archived(capture));
            }
        }

        if self.config.save_live_assets && self.save_if_live(store, probe, url).await? {
            self.probe_numbered_siblings(store, probe, url).await;
            return Ok(RecoveryOutcome::SavedLive);
        }

        debug!(url, "asset unrecoverable");
        Ok(RecoveryOutcome::Lost)
    }

    /// Searches every archived host of the asset's registered domain for
    /// the same path, truncated to its last `max-path-components` segments.
    async fn search_sibling_subdomains(
        &self,
        url: &str,
        target_timestamp: &str,
    ) -> Result<Option<CaptureRef>> {
        let Some(max_components) = self.config.max_path_components else {
            return Ok(None);
        };

        let host = url_host(url)?;
        let domain = registered_domain(&host);
        let Some(suffix) = trailing_path(url, max_components) else {
            return Ok(None);
        };

        let mut query = IndexQuery::domain(&format!("http://{}/", domain));
        query.limit = Some(10_000);
        let captures = self.gateway.index_search(&query).await?;

        let matching: Vec<CaptureRef> = captures
            .into_iter()
            .filter(|capture| {
                Url::parse(&capture.url)
                    .map(|u| u.path().ends_with(&suffix))
                    .unwrap_or(false)
            })
            .collect();

        Ok(nearest_in_time(matching, target_timestamp))
    }

    /// Submits a still-live URL to save-on-demand, at most once ever.
    async fn save_if_live<S: Storage, P: LiveProbe>(
        &self,
        store: &mut S,
        probe: &P,
        url: &str,
    ) -> Result<bool> {
        if store.was_saved(url)? {
            debug!(url, "already submitted to save-on-demand");
            return Ok(false);
        }
        if !probe.resolves(url).await {
            return Ok(false);
        }

        self.gateway.save(url).await?;
        store.mark_saved(url)?;
        Ok(true)
    }

    /// Walks numbered filename siblings (`img01.gif`, `img02.gif`, ...) and
    /// saves each one that still resolves live.
    ///
    /// Both caps are load-bearing: a parked or wildcard-DNS domain answers
    /// every probe with a valid response, so consecutive failures alone
    /// would never stop.
    async fn probe_numbered_siblings<S: Storage, P: LiveProbe>(
        &self,
        store: &mut S,
        probe: &P,
        url: &str,
    ) {
        let Some(pattern) = NumberedName::parse(url) else {
            return;
        };

        let mut consecutive_failures = 0;
        let mut total_tries = 0;
        let mut number = pattern.number + 1;

        while consecutive_failures < self.config.max_consecutive_probe_failures
            && total_tries < self.config.max_total_probe_tries
        {
            let candidate = pattern.with_number(number);
            total_tries += 1;
            number += 1;

            if probe.resolves(&candidate).await {
                consecutive_failures = 0;
                if let Err(err) = self.save_sibling(store, &candidate).await {
                    warn!(url = candidate, error = %err, "sibling save failed");
                }
            } else {
                consecutive_failures += 1;
            }
        }
    }

    async fn save_sibling<S: Storage>(&self, store: &mut S, url: &str) -> Result<()> {
        if store.was_saved(url)? {
            return Ok(());
        }
        self.gateway.save(url).await?;
        store.mark_saved(url)?;
        Ok(())
    }
}

/// Picks the capture closest in time to the target timestamp.
fn nearest_in_time(captures: Vec<CaptureRef>, target: &str) -> Option<CaptureRef> {
    let target: u64 = target.parse().ok()?;
    captures
        .into_iter()
        .filter_map(|capture| {
            let ts: u64 = capture.timestamp.parse().ok()?;
            Some((ts.abs_diff(target), capture))
        })
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, capture)| capture)
}

/// The last `n` components of a URL's path, joined with slashes.
fn trailing_path(url: &str, n: u32) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let components: Vec<&str> = parsed
        .path()
        .split('/')
        .filter(|c| !c.is_empty())
        .collect();
    if components.is_empty() {
        return None;
    }
    let keep = (n as usize).min(components.len());
    Some(components[components.len() - keep..].join("/"))
}

/// A URL whose filename ends in a number, e.g. `http://a.com/img07.gif`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct NumberedName {
    /// Everything before the digits
    prefix: String,
    /// The current number
    number: u64,
    /// Digit count, preserved so `img07` steps to `img08` not `img8`
    width: usize,
    /// The extension including the dot, or empty
    suffix: String,
}

impl NumberedName {
    fn parse(url: &str) -> Option<Self> {
        let (base, filename) = url.rsplit_once('/')?;
        let (stem, suffix) = match filename.rsplit_once('.') {
            Some((stem, ext)) => (stem, format!(".{}", ext)),
            None => (filename, String::new()),
        };

        let digits_start = stem
            .rfind(|c: char| !c.is_ascii_digit())
            .map(|i| i + 1)
            .unwrap_or(0);
        let digits = &stem[digits_start..];
        if digits.is_empty() {
            return None;
        }

        Some(Self {
            prefix: format!("{}/{}", base, &stem[..digits_start]),
            number: digits.parse().ok()?,
            width: digits.len(),
            suffix,
        })
    }

    fn with_number(&self, number: u64) -> String {
        format!(
            "{}{:0width$}{}",
            self.prefix,
            number,
            self.suffix,
            width = self.width
        )
    }
}
