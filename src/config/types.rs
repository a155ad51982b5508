use serde::Deserialize;
use std::collections::HashMap;

/// Main configuration structure for Waymark
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub datastore: DatastoreConfig,
    pub gateway: GatewayConfig,
    pub ranking: RankingConfig,
    pub scoring: ScoringConfig,
    pub scout: ScoutConfig,
    pub record: RecordConfig,
    pub publish: PublishConfig,
    pub monitor: MonitorConfig,
}

/// Datastore configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatastoreConfig {
    /// Path to the SQLite database file
    pub path: String,

    /// Seconds to wait before retrying a failed database operation
    #[serde(rename = "error-wait-secs", default = "default_error_wait_secs")]
    pub error_wait_secs: u64,

    /// Maximum retries for a failed database operation before giving up
    #[serde(rename = "max-error-retries", default = "default_max_error_retries")]
    pub max_error_retries: u32,
}

fn default_error_wait_secs() -> u64 {
    30
}

fn default_max_error_retries() -> u32 {
    10
}

/// Archive gateway configuration
///
/// Each remote service gets its own rate limit so a burst of index searches
/// can't starve snapshot lookups.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Base URL for snapshot playback (e.g. "https://web.archive.org/web")
    #[serde(rename = "playback-url")]
    pub playback_url: String,

    /// Endpoint for the nearest-capture lookup service
    #[serde(rename = "lookup-url")]
    pub lookup_url: String,

    /// Endpoint for the capture index search service
    #[serde(rename = "index-url")]
    pub index_url: String,

    /// Endpoint for the save-on-demand service
    #[serde(rename = "save-url")]
    pub save_url: String,

    /// User agent sent with every request
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// How often a blocked caller re-checks its rate limiter (milliseconds)
    #[serde(rename = "poll-frequency-ms", default = "default_poll_frequency_ms")]
    pub poll_frequency_ms: u64,

    /// Base wait for exponential retry backoff (seconds)
    #[serde(rename = "retry-backoff-secs", default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: f64,

    /// Optional ceiling on the backoff wait (seconds). Absent means the
    /// built-in one-hour ceiling.
    #[serde(rename = "retry-max-wait-secs")]
    pub retry_max_wait_secs: Option<f64>,

    /// Maximum retry attempts per request. Absent means retry forever.
    #[serde(rename = "max-attempts")]
    pub max_attempts: Option<u32>,

    /// Request timeout (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Rate limit for the lookup service
    #[serde(rename = "lookup-limit")]
    pub lookup_limit: RateLimitConfig,

    /// Rate limit for the index search service
    #[serde(rename = "index-limit")]
    pub index_limit: RateLimitConfig,

    /// Rate limit for the save-on-demand service
    #[serde(rename = "save-limit")]
    pub save_limit: RateLimitConfig,
}

fn default_poll_frequency_ms() -> u64 {
    250
}

fn default_retry_backoff_secs() -> f64 {
    1.0
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// A moving-window rate limit: at most `amount` acquisitions per `window-secs`
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub amount: u32,

    #[serde(rename = "window-secs")]
    pub window_secs: f64,
}

/// Candidate ranking configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RankingConfig {
    /// Flattens the weighted-random draw toward uniform. None disables
    /// score weighting entirely and every candidate gets a plain draw.
    pub offset: Option<f64>,

    /// Ceiling applied to a snapshot's points before ranking. None means no clamp.
    #[serde(rename = "max-points")]
    pub max_points: Option<i64>,

    /// Snapshots deeper than this never rank. None means unlimited depth.
    #[serde(rename = "max-depth")]
    pub max_depth: Option<i64>,

    /// Depth at or below which snapshots always rank ahead of deeper ones.
    /// None disables the partition.
    #[serde(rename = "max-required-depth")]
    pub max_required_depth: Option<i64>,

    /// A host with at least this many scouted snapshots gets deprioritized
    /// in scout batches
    #[serde(rename = "min-snapshots-for-same-host", default = "default_host_threshold")]
    pub min_snapshots_for_same_host: u32,

    /// A host with at least this many recordings gets deprioritized in
    /// record batches
    #[serde(rename = "min-recordings-for-same-host", default = "default_host_threshold")]
    pub min_recordings_for_same_host: u32,

    /// Days a published UrlKey stays excluded from publish candidacy
    #[serde(rename = "min-publish-days-for-same-url", default = "default_publish_days")]
    pub min_publish_days_for_same_url: i64,
}

fn default_host_threshold() -> u32 {
    3
}

fn default_publish_days() -> i64 {
    30
}

/// Page scoring configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// Points awarded to a snapshot whose URL carries a recognized media extension
    #[serde(rename = "media-points", default)]
    pub media_points: i64,

    /// Points per interesting word. Each word counts at most once per page.
    #[serde(rename = "word-points", default)]
    pub word_points: HashMap<String, i64>,

    /// Points per interesting markup tag. Tags count once per occurrence.
    #[serde(rename = "tag-points", default)]
    pub tag_points: HashMap<String, i64>,

    /// Base64-encoded sensitive terms. Decoded once at load time; a page
    /// containing any of them is flagged sensitive.
    #[serde(default)]
    pub denylist: Vec<String>,
}

impl ScoringConfig {
    /// Decodes the denylist entries into plain lowercase terms.
    ///
    /// Entries are stored base64-encoded so the config file itself stays
    /// readable in public. Invalid entries fail loudly rather than silently
    /// weakening the sensitivity check.
    pub fn decoded_denylist(&self) -> crate::ConfigResult<Vec<String>> {
        use base64::Engine;

        let engine = base64::engine::general_purpose::STANDARD;
        self.denylist
            .iter()
            .map(|entry| {
                let bytes = engine
                    .decode(entry)
                    .map_err(|_| crate::ConfigError::InvalidDenylistEntry(entry.clone()))?;
                let term = String::from_utf8(bytes)
                    .map_err(|_| crate::ConfigError::InvalidDenylistEntry(entry.clone()))?;
                Ok(term.to_lowercase())
            })
            .collect()
    }
}

/// Scout workflow configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScoutConfig {
    /// How many snapshots one scout pass processes
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: u32,

    /// Oldest acceptable capture year. None disables the lower bound.
    #[serde(rename = "min-year")]
    pub min_year: Option<i32>,

    /// Newest acceptable capture year. None disables the upper bound.
    #[serde(rename = "max-year")]
    pub max_year: Option<i32>,

    /// Domain patterns exempt from the year bounds
    #[serde(rename = "unfiltered-domains", default)]
    pub unfiltered_domains: Vec<String>,

    /// Domain patterns that are always rejected
    #[serde(rename = "blocked-domains", default)]
    pub blocked_domains: Vec<String>,

    /// File extensions treated as standalone media snapshots
    #[serde(rename = "media-extensions", default)]
    pub media_extensions: Vec<String>,

    /// Store every word encountered, not just the scored ones
    #[serde(rename = "store-all-words", default)]
    pub store_all_words: bool,
}

/// Record workflow configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RecordConfig {
    /// How many snapshots one record pass processes
    #[serde(rename = "batch-size", default = "default_record_batch_size")]
    pub batch_size: u32,

    /// Whether sensitive snapshots are recorded at all
    #[serde(rename = "record-sensitive", default = "default_true")]
    pub record_sensitive: bool,

    /// External capture program, invoked as
    /// `<capture-command> <playback-url> <output-path>`. The record
    /// subcommand refuses to run without one.
    #[serde(rename = "capture-command")]
    pub capture_command: Option<String>,

    /// Directory recordings are written into
    #[serde(rename = "output-dir", default = "default_output_dir")]
    pub output_dir: String,
}

fn default_output_dir() -> String {
    "./recordings".to_string()
}

/// Publish workflow configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    /// How many recordings one publish pass posts
    #[serde(rename = "batch-size", default = "default_publish_batch_size")]
    pub batch_size: u32,

    /// Only publish recordings that were manually approved
    #[serde(rename = "require-approval", default)]
    pub require_approval: bool,

    /// Mark posts of sensitive snapshots as such at the publish target
    #[serde(rename = "flag-sensitive", default = "default_true")]
    pub flag_sensitive: bool,

    /// External posting program, invoked as
    /// `<publish-command> <recording-path> <caption> [--sensitive]`. Its
    /// first line of output, if any, is taken as the post URL. The publish
    /// subcommand refuses to run without one.
    #[serde(rename = "publish-command")]
    pub publish_command: Option<String>,
}

fn default_batch_size() -> u32 {
    100
}

fn default_record_batch_size() -> u32 {
    10
}

fn default_publish_batch_size() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// Traffic monitor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Seconds of request/response silence before a page counts as settled
    #[serde(rename = "queue-timeout-secs", default = "default_queue_timeout")]
    pub queue_timeout_secs: f64,

    /// Hard ceiling on how long one page may load (seconds)
    #[serde(rename = "total-timeout-secs", default = "default_total_timeout")]
    pub total_timeout_secs: f64,

    /// How often the settle waiter re-checks the detector (milliseconds)
    #[serde(rename = "poll-interval-ms", default = "default_monitor_poll_ms")]
    pub poll_interval_ms: u64,

    /// Search the capture index for assets the archive is missing
    #[serde(rename = "find-missing-assets", default = "default_true")]
    pub find_missing_assets: bool,

    /// Truncate recovery searches to this many path components. None searches
    /// the full path only.
    #[serde(rename = "max-path-components")]
    pub max_path_components: Option<u32>,

    /// Ask the save-on-demand service to archive assets the index doesn't have
    #[serde(rename = "save-live-assets", default)]
    pub save_live_assets: bool,

    /// Stop probing numbered filename siblings after this many consecutive misses
    #[serde(rename = "max-consecutive-probe-failures", default = "default_consecutive_probes")]
    pub max_consecutive_probe_failures: u32,

    /// Stop probing numbered filename siblings after this many attempts in total
    #[serde(rename = "max-total-probe-tries", default = "default_total_probes")]
    pub max_total_probe_tries: u32,

    /// Remember not-found assets for the rest of the page load
    #[serde(rename = "cache-not-found", default = "default_true")]
    pub cache_not_found: bool,
}

fn default_queue_timeout() -> f64 {
    30.0
}

fn default_total_timeout() -> f64 {
    300.0
}

fn default_monitor_poll_ms() -> u64 {
    500
}

fn default_consecutive_probes() -> u32 {
    5
}

fn default_total_probes() -> u32 {
    30
}
