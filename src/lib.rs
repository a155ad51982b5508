//! Waymark: a perpetual crawler for an archived web
//!
//! This crate walks the link graph of a web archive, scoring and ranking
//! snapshots to decide what gets visited, recorded, and published next.
//! Rendering, screen capture, and social posting are external collaborators
//! behind narrow traits; everything here is the scheduling core.

pub mod config;
pub mod gateway;
pub mod monitor;
pub mod ranking;
pub mod scoring;
pub mod state;
pub mod storage;
pub mod tasks;
pub mod url;

use thiserror::Error;

/// Main error type for Waymark operations
#[derive(Debug, Error)]
pub enum WaymarkError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Archive service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("No archived capture found for {url} near {timestamp}")]
    NoCapture { url: String, timestamp: String },

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::SnapshotState,
        to: state::SnapshotState,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Capture failed: {0}")]
    Capture(#[from] tasks::CaptureError),

    #[error("Publish failed: {0}")]
    Publish(#[from] tasks::PublishError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid denylist entry (not base64): {0}")]
    InvalidDenylistEntry(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Not an archive snapshot URL: {0}")]
    NotSnapshotUrl(String),
}

/// Result type alias for Waymark operations
pub type Result<T> = std::result::Result<T, WaymarkError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use state::SnapshotState;
pub use url::{registered_domain, url_host, url_key};
