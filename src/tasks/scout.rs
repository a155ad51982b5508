//! Scout workflow
//!
//! Visits pending snapshots: fetches the archived page through the gateway,
//! scores its words and tags, extracts links into new pending rows, and
//! advances the row to scouted or rejected.

use crate::config::Config;
use crate::gateway::ArchiveGateway;
use crate::ranking::order_batch;
use crate::scoring::{page_tallies, PageAnalysis, ScoreTable};
use crate::state::SnapshotState;
use crate::storage::{NewSnapshot, ScoutResult, SnapshotRecord, Storage};
use crate::tasks::{candidate_pool, cooled_candidates, BatchReport};
use crate::url::{
    media_extension, registered_domain, timestamp_year, url_host, url_key, SnapshotUrl,
};
use crate::{Result, WaymarkError};
use chrono::Datelike;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};
use url::Url;

enum ScoutOutcome {
    Scouted,
    Rejected,
}

pub struct ScoutTask<'a, S: Storage> {
    store: &'a mut S,
    gateway: &'a ArchiveGateway,
    table: ScoreTable,
    config: &'a Config,
}

impl<'a, S: Storage> ScoutTask<'a, S> {
    pub fn new(store: &'a mut S, gateway: &'a ArchiveGateway, config: &'a Config) -> Result<Self> {
        let table = ScoreTable::new(&config.scoring, &config.ranking)?;
        Ok(Self {
            store,
            gateway,
            table,
            config,
        })
    }

    /// Runs one scout batch. `limit` overrides the configured batch size.
    pub async fn run(&mut self, limit: Option<u32>) -> Result<BatchReport> {
        let batch_size = limit.unwrap_or(self.config.scout.batch_size) as usize;

        if !self.gateway.is_available().await {
            warn!("archive lookup service is down, skipping scout batch");
            return Ok(BatchReport::default());
        }

        let rows = self.store.scout_candidates(candidate_pool(batch_size))?;
        let host_counts = self.store.visited_counts_by_host()?;
        let candidates = cooled_candidates(
            rows,
            &host_counts,
            self.config.ranking.min_snapshots_for_same_host,
        );

        let mut rng = StdRng::from_entropy();
        let batch = order_batch(candidates, &self.config.ranking, batch_size, &mut rng);

        let mut report = BatchReport::default();
        for candidate in batch {
            if !self
                .store
                .claim_snapshot(candidate.id, SnapshotState::Pending)?
            {
                report.skipped += 1;
                continue;
            }
            report.processed += 1;

            match self.scout_one(candidate.id).await {
                Ok(ScoutOutcome::Scouted) => report.succeeded += 1,
                Ok(ScoutOutcome::Rejected) => report.rejected += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(snapshot_id = candidate.id, error = %err, "scout failed");
                    self.store.set_error(candidate.id, &err.to_string())?;
                    self.store.release_claim(candidate.id)?;
                    if matches!(err, WaymarkError::ServiceUnavailable(_)) {
                        // The archive went away mid-batch; the rest can wait
                        // for the next run.
                        break;
                    }
                }
            }
        }

        info!(%report, "scout batch finished");
        Ok(report)
    }

    async fn scout_one(&mut self, snapshot_id: i64) -> Result<ScoutOutcome> {
        let snapshot = self.store.get_snapshot(snapshot_id)?;
        debug!(snapshot_id, url = snapshot.url, "scouting");

        if let Some(reason) = self.policy_rejection(&snapshot) {
            return self.reject(snapshot_id, &reason);
        }

        // Standalone media is never parsed; it earns the flat media value and
        // inherits the rest of its standing from its parents.
        if snapshot.is_media {
            let result = ScoutResult {
                points: self.table.points(&[], true),
                oldest_year: timestamp_year(&snapshot.timestamp),
                ..Default::default()
            };
            self.store.store_scout_result(snapshot_id, &result)?;
            self.store
                .transition_snapshot(snapshot_id, SnapshotState::Scouted)?;
            return Ok(ScoutOutcome::Scouted);
        }

        let Some(capture) = self
            .gateway
            .lookup(&snapshot.url, &snapshot.timestamp)
            .await?
        else {
            return self.reject(snapshot_id, "no archived capture");
        };

        let fetched = match self.gateway.fetch_page(&capture.timestamp, &snapshot.url).await {
            Ok(fetched) => fetched,
            Err(err @ WaymarkError::ServiceUnavailable(_)) => return Err(err),
            Err(err) => return self.reject(snapshot_id, &err.to_string()),
        };

        let page = PageAnalysis::from_html(&fetched.html);
        let score = self.table.score_page(&page, false);

        self.discover_links(&snapshot, &page)?;

        let mut tallies = page_tallies(&page);
        if !self.config.scout.store_all_words {
            tallies.retain(|t| self.table.is_scored(&t.word, t.is_tag));
        }
        self.store.set_snapshot_words(snapshot_id, &tallies)?;

        let result = ScoutResult {
            title: page.title.clone(),
            points: score.points,
            is_sensitive: score.sensitive,
            page_language: page.language.clone(),
            uses_plugins: page.uses_plugins(),
            oldest_year: oldest_year(&capture.timestamp, fetched.last_modified.as_deref()),
            last_modified: fetched.last_modified,
        };
        self.store.store_scout_result(snapshot_id, &result)?;
        self.store
            .transition_snapshot(snapshot_id, SnapshotState::Scouted)?;

        Ok(ScoutOutcome::Scouted)
    }

    fn reject(&mut self, snapshot_id: i64, reason: &str) -> Result<ScoutOutcome> {
        debug!(snapshot_id, reason, "rejected");
        self.store.set_error(snapshot_id, reason)?;
        self.store
            .transition_snapshot(snapshot_id, SnapshotState::Rejected)?;
        Ok(ScoutOutcome::Rejected)
    }

    /// Checks the domain and capture-year policy before spending any quota.
    fn policy_rejection(&self, snapshot: &SnapshotRecord) -> Option<String> {
        let scout = &self.config.scout;

        if domain_matches(&scout.blocked_domains, &snapshot.host) {
            return Some(format!("blocked domain {}", snapshot.host));
        }
        if domain_matches(&scout.unfiltered_domains, &snapshot.host) {
            return None;
        }

        let Some(year) = timestamp_year(&snapshot.timestamp) else {
            return Some(format!("malformed timestamp {}", snapshot.timestamp));
        };
        if let Some(min) = scout.min_year {
            if year < min {
                return Some(format!("capture year {} before {}", year, min));
            }
        }
        if let Some(max) = scout.max_year {
            if year > max {
                return Some(format!("capture year {} after {}", year, max));
            }
        }

        None
    }

    /// Turns every anchor on the page into a pending child snapshot plus a
    /// topology edge. Unparseable or non-http links are skipped quietly.
    fn discover_links(&mut self, parent: &SnapshotRecord, page: &PageAnalysis) -> Result<()> {
        let base = Url::parse(&parent.url)?;

        for href in &page.links {
            let Some((child_url, child_timestamp)) =
                self.resolve_link(&base, &parent.timestamp, href)
            else {
                continue;
            };

            let Ok(key) = url_key(&child_url) else {
                continue;
            };
            let Ok(host) = url_host(&child_url) else {
                continue;
            };
            let domain = registered_domain(&host);

            let extension = media_extension(&child_url);
            let is_media = extension
                .as_deref()
                .map(|ext| {
                    self.config
                        .scout
                        .media_extensions
                        .iter()
                        .any(|allowed| allowed.eq_ignore_ascii_case(ext))
                })
                .unwrap_or(false);

            let child_id = self.store.insert_or_get_snapshot(&NewSnapshot {
                url: child_url,
                timestamp: child_timestamp,
                url_key: key,
                host,
                domain,
                parent_id: Some(parent.id),
                depth: parent.depth + 1,
                is_media,
                media_extension: if is_media { extension } else { None },
            })?;
            self.store.insert_link(parent.id, child_id)?;
        }

        Ok(())
    }

    /// Resolves one href against its page. Links that point back into the
    /// archive carry their own capture timestamp; everything else is assumed
    /// captured near the parent's timestamp.
    fn resolve_link(
        &self,
        base: &Url,
        parent_timestamp: &str,
        href: &str,
    ) -> Option<(String, String)> {
        let absolute = base.join(href).ok()?;
        if absolute.scheme() != "http" && absolute.scheme() != "https" {
            return None;
        }

        if let Ok(parts) = SnapshotUrl::parse(&self.config.gateway.playback_url, absolute.as_str())
        {
            return Some((parts.url, parts.timestamp));
        }

        let mut absolute = absolute;
        absolute.set_fragment(None);
        Some((absolute.to_string(), parent_timestamp.to_string()))
    }
}

/// The earliest plausible year for a page: its capture year, or the year of
/// its Last-Modified header when that predates the capture. Years before the
/// web existed are header garbage and ignored.
fn oldest_year(timestamp: &str, last_modified: Option<&str>) -> Option<i32> {
    let capture = timestamp_year(timestamp);
    let modified = last_modified
        .and_then(modified_year)
        .filter(|year| *year >= 1991);

    match (capture, modified) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// The year of an RFC 2822 `Last-Modified` value. Servers of the era
/// routinely stamp a weekday that does not match the date, which strict
/// parsing rejects, so a second pass reads the date fields alone.
fn modified_year(value: &str) -> Option<i32> {
    if let Ok(parsed) = chrono::DateTime::parse_from_rfc2822(value) {
        return Some(parsed.year());
    }
    let rest = value.split_once(',').map_or(value, |(_, rest)| rest);
    let date = rest.split_whitespace().take(3).collect::<Vec<_>>().join(" ");
    chrono::NaiveDate::parse_from_str(&date, "%d %b %Y")
        .ok()
        .map(|date| date.year())
}

fn domain_matches(patterns: &[String], host: &str) -> bool {
    patterns.iter().any(|pattern| {
        let pattern = pattern.to_lowercase();
        if let Some(suffix) = pattern.strip_prefix("*.") {
            host == suffix || host.ends_with(&format!(".{}", suffix))
        } else {
            host == pattern || registered_domain(host) == pattern
        }
    })
}
