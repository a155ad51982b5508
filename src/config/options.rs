use crate::config::types::MonitorConfig;
use serde::{Deserialize, Serialize};

/// Per-snapshot overrides, stored as a JSON column on the snapshot row.
///
/// Operators set these by hand for pages that need special handling: a slow
/// chat applet that needs a longer settle window, a title the scout got
/// wrong, or a sensitivity flag the denylist missed. Absent fields fall
/// through to the global configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotOptions {
    /// Overrides the monitor's idle window for this page
    #[serde(rename = "queue-timeout-secs", skip_serializing_if = "Option::is_none")]
    pub queue_timeout_secs: Option<f64>,

    /// Overrides the monitor's total load ceiling for this page
    #[serde(rename = "total-timeout-secs", skip_serializing_if = "Option::is_none")]
    pub total_timeout_secs: Option<f64>,

    /// Overrides whether missing-asset recovery runs for this page
    #[serde(rename = "find-missing-assets", skip_serializing_if = "Option::is_none")]
    pub find_missing_assets: Option<bool>,

    /// Overrides whether save-on-demand runs for this page
    #[serde(rename = "save-live-assets", skip_serializing_if = "Option::is_none")]
    pub save_live_assets: Option<bool>,

    /// Replaces the scouted title in the published caption
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Forces the sensitivity flag regardless of what scoring decided
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensitive: Option<bool>,

    /// Free-form operator notes, never interpreted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl SnapshotOptions {
    /// Parses options from their JSON column value. An absent column means
    /// no overrides.
    pub fn from_json(json: Option<&str>) -> serde_json::Result<Self> {
        match json {
            Some(s) if !s.trim().is_empty() => serde_json::from_str(s),
            _ => Ok(Self::default()),
        }
    }

    /// Serializes the options for storage. Returns None when every field is
    /// unset, so untouched rows keep a NULL column.
    pub fn to_json(&self) -> serde_json::Result<Option<String>> {
        if *self == Self::default() {
            Ok(None)
        } else {
            Ok(Some(serde_json::to_string(self)?))
        }
    }

    /// Applies any monitor overrides onto a copy of the global monitor config.
    pub fn apply_to_monitor(&self, base: &MonitorConfig) -> MonitorConfig {
        let mut merged = base.clone();
        if let Some(secs) = self.queue_timeout_secs {
            merged.queue_timeout_secs = secs;
        }
        if let Some(secs) = self.total_timeout_secs {
            merged.total_timeout_secs = secs;
        }
        if let Some(find) = self.find_missing_assets {
            merged.find_missing_assets = find;
        }
        if let Some(save) = self.save_live_assets {
            merged.save_live_assets = save;
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    #[test]
    fn test_absent_json_means_defaults() {
        assert_eq!(
            SnapshotOptions::from_json(None).unwrap(),
            SnapshotOptions::default()
        );
        assert_eq!(
            SnapshotOptions::from_json(Some("")).unwrap(),
            SnapshotOptions::default()
        );
    }

    #[test]
    fn test_roundtrip() {
        let options = SnapshotOptions {
            queue_timeout_secs: Some(90.0),
            title: Some("Welcome To My Homepage".to_string()),
            ..Default::default()
        };

        let json = options.to_json().unwrap().unwrap();
        assert_eq!(SnapshotOptions::from_json(Some(&json)).unwrap(), options);
    }

    #[test]
    fn test_default_serializes_to_nothing() {
        assert_eq!(SnapshotOptions::default().to_json().unwrap(), None);
    }

    #[test]
    fn test_apply_to_monitor() {
        let config = test_config();
        let options = SnapshotOptions {
            queue_timeout_secs: Some(120.0),
            save_live_assets: Some(true),
            ..Default::default()
        };

        let merged = options.apply_to_monitor(&config.monitor);
        assert_eq!(merged.queue_timeout_secs, 120.0);
        assert!(merged.save_live_assets);
        // Untouched fields keep their global values.
        assert_eq!(merged.total_timeout_secs, config.monitor.total_timeout_secs);
    }

    #[test]
    fn test_misspelled_field_is_rejected() {
        // A typo'd override should fail instead of silently doing nothing.
        let result = SnapshotOptions::from_json(Some(r#"{"qeue-timeout-secs": 5}"#));
        assert!(result.is_err());
    }
}
