use crate::config::types::{Config, GatewayConfig, MonitorConfig, RankingConfig, RateLimitConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_datastore(&config.datastore)?;
    validate_gateway(&config.gateway)?;
    validate_ranking(&config.ranking)?;
    validate_scoring(config)?;
    validate_batch_sizes(config)?;
    validate_monitor(&config.monitor)?;
    Ok(())
}

fn validate_datastore(config: &crate::config::types::DatastoreConfig) -> Result<(), ConfigError> {
    if config.path.is_empty() {
        return Err(ConfigError::Validation(
            "datastore path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates gateway endpoints and rate limits
fn validate_gateway(config: &GatewayConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("playback-url", &config.playback_url),
        ("lookup-url", &config.lookup_url),
        ("index-url", &config.index_url),
        ("save-url", &config.save_url),
    ] {
        Url::parse(value)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {}: {}", name, e)))?;
    }

    if config.user_agent.is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.poll_frequency_ms == 0 {
        return Err(ConfigError::Validation(
            "poll-frequency-ms must be >= 1".to_string(),
        ));
    }

    if config.retry_backoff_secs <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "retry-backoff-secs must be positive, got {}",
            config.retry_backoff_secs
        )));
    }

    if let Some(max_wait) = config.retry_max_wait_secs {
        if max_wait < config.retry_backoff_secs {
            return Err(ConfigError::Validation(format!(
                "retry-max-wait-secs ({}) must be >= retry-backoff-secs ({})",
                max_wait, config.retry_backoff_secs
            )));
        }
    }

    if config.max_attempts == Some(0) {
        return Err(ConfigError::Validation(
            "max-attempts must be >= 1 when set".to_string(),
        ));
    }

    for (name, limit) in [
        ("lookup-limit", &config.lookup_limit),
        ("index-limit", &config.index_limit),
        ("save-limit", &config.save_limit),
    ] {
        validate_rate_limit(name, limit)?;
    }

    Ok(())
}

fn validate_rate_limit(name: &str, limit: &RateLimitConfig) -> Result<(), ConfigError> {
    if limit.amount < 1 {
        return Err(ConfigError::Validation(format!(
            "{} amount must be >= 1, got {}",
            name, limit.amount
        )));
    }
    if limit.window_secs <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "{} window-secs must be positive, got {}",
            name, limit.window_secs
        )));
    }
    Ok(())
}

/// Validates ranking parameters
fn validate_ranking(config: &RankingConfig) -> Result<(), ConfigError> {
    if let Some(offset) = config.offset {
        if offset < 0.0 {
            return Err(ConfigError::Validation(format!(
                "ranking offset must be >= 0, got {}",
                offset
            )));
        }
    }

    if let Some(max_points) = config.max_points {
        if max_points < 1 {
            return Err(ConfigError::Validation(format!(
                "max-points must be >= 1, got {}",
                max_points
            )));
        }
    }

    if let (Some(required), Some(max)) = (config.max_required_depth, config.max_depth) {
        if required > max {
            return Err(ConfigError::Validation(format!(
                "max-required-depth ({}) cannot exceed max-depth ({})",
                required, max
            )));
        }
    }

    if config.min_publish_days_for_same_url < 0 {
        return Err(ConfigError::Validation(format!(
            "min-publish-days-for-same-url must be >= 0, got {}",
            config.min_publish_days_for_same_url
        )));
    }

    Ok(())
}

/// Validates that every denylist entry decodes
fn validate_scoring(config: &Config) -> Result<(), ConfigError> {
    config.scoring.decoded_denylist()?;
    Ok(())
}

fn validate_batch_sizes(config: &Config) -> Result<(), ConfigError> {
    for (name, size) in [
        ("scout batch-size", config.scout.batch_size),
        ("record batch-size", config.record.batch_size),
        ("publish batch-size", config.publish.batch_size),
    ] {
        if size < 1 {
            return Err(ConfigError::Validation(format!(
                "{} must be >= 1, got {}",
                name, size
            )));
        }
    }
    Ok(())
}

/// Validates monitor timeouts and probe caps
fn validate_monitor(config: &MonitorConfig) -> Result<(), ConfigError> {
    if config.queue_timeout_secs <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "queue-timeout-secs must be positive, got {}",
            config.queue_timeout_secs
        )));
    }

    if config.total_timeout_secs < config.queue_timeout_secs {
        return Err(ConfigError::Validation(format!(
            "total-timeout-secs ({}) must be >= queue-timeout-secs ({})",
            config.total_timeout_secs, config.queue_timeout_secs
        )));
    }

    if config.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "poll-interval-ms must be >= 1".to_string(),
        ));
    }

    if config.max_consecutive_probe_failures < 1 || config.max_total_probe_tries < 1 {
        return Err(ConfigError::Validation(
            "probe caps must be >= 1".to_string(),
        ));
    }

    if config.max_total_probe_tries < config.max_consecutive_probe_failures {
        return Err(ConfigError::Validation(format!(
            "max-total-probe-tries ({}) must be >= max-consecutive-probe-failures ({})",
            config.max_total_probe_tries, config.max_consecutive_probe_failures
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    #[test]
    fn test_valid_config_passes() {
        let config = test_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_bad_endpoint_fails() {
        let mut config = test_config();
        config.gateway.index_url = "not a url".to_string();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_zero_rate_limit_fails() {
        let mut config = test_config();
        config.gateway.save_limit.amount = 0;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_zero_max_attempts_fails() {
        let mut config = test_config();
        config.gateway.max_attempts = Some(0);
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));

        // Absent means retry forever and is valid.
        config.gateway.max_attempts = None;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_negative_offset_fails() {
        let mut config = test_config();
        config.ranking.offset = Some(-1.0);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_required_depth_beyond_max_depth_fails() {
        let mut config = test_config();
        config.ranking.max_depth = Some(4);
        config.ranking.max_required_depth = Some(6);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_invalid_denylist_entry_fails() {
        let mut config = test_config();
        config.scoring.denylist = vec!["!!! not base64 !!!".to_string()];
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidDenylistEntry(_))
        ));
    }

    #[test]
    fn test_total_timeout_below_queue_timeout_fails() {
        let mut config = test_config();
        config.monitor.queue_timeout_secs = 60.0;
        config.monitor.total_timeout_secs = 30.0;
        assert!(validate(&config).is_err());
    }
}
