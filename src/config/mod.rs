//! Configuration module for Waymark
//!
//! This module handles loading, parsing, and validating TOML configuration
//! files, plus the per-snapshot option overrides stored as JSON in the
//! datastore.
//!
//! # Example
//!
//! ```no_run
//! use waymark::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Scout batch size: {}", config.scout.batch_size);
//! ```

mod options;
mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, DatastoreConfig, GatewayConfig, MonitorConfig, PublishConfig, RankingConfig,
    RateLimitConfig, RecordConfig, ScoringConfig, ScoutConfig,
};

pub use options::SnapshotOptions;

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};

/// A fully-populated configuration for tests.
#[cfg(test)]
pub(crate) fn test_config() -> Config {
    use std::collections::HashMap;

    let toml_str = r#"
[datastore]
path = ":memory:"

[gateway]
playback-url = "https://archive.example.org/web"
lookup-url = "https://archive.example.org/available"
index-url = "https://archive.example.org/cdx"
save-url = "https://archive.example.org/save"
user-agent = "waymark-test/1.0"
lookup-limit = { amount = 15, window-secs = 60.0 }
index-limit = { amount = 1, window-secs = 5.0 }
save-limit = { amount = 4, window-secs = 60.0 }

[ranking]
offset = 100.0
max-points = 10000

[scoring]
media-points = 1000

[scout]

[record]

[publish]

[monitor]
"#;

    let mut config: Config = toml::from_str(toml_str).unwrap();
    config.scoring.word_points = HashMap::from([("flash".to_string(), 20)]);
    config.scoring.tag_points = HashMap::from([("object".to_string(), 1000)]);
    config
}
