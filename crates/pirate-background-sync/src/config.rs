//! Background sync configuration

use crate::work::SyncMode;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff between failed attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay before the first retry (seconds)
    pub initial_delay_secs: u64,
    /// Upper bound for any delay (seconds)
    pub max_delay_secs: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay_secs: 30,
            max_delay_secs: 5 * 60 * 60,
        }
    }
}

impl BackoffPolicy {
    /// Delay after the failed attempt numbered `attempt` (0-based):
    /// `initial * 2^attempt`, capped at the maximum
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let secs = self
            .initial_delay_secs
            .saturating_mul(factor)
            .min(self.max_delay_secs);
        Duration::from_secs(secs)
    }
}

/// Background sync configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundSyncConfig {
    /// Compact sync interval (minutes)
    pub compact_interval_mins: u32,
    /// Compact sync flex window (minutes)
    pub compact_flex_mins: u32,
    /// Compact run duration budget (seconds)
    pub compact_max_duration_secs: u64,
    /// Compact run block budget
    pub compact_max_blocks: u64,
    /// Deep sync interval (hours)
    pub deep_interval_hours: u32,
    /// Deep sync flex window (hours)
    pub deep_flex_hours: u32,
    /// Deep run duration budget (seconds)
    pub deep_max_duration_secs: u64,
    /// Deep run block budget
    pub deep_max_blocks: u64,
    /// User-triggered compact run duration budget (seconds)
    pub immediate_max_duration_secs: u64,
    /// User-triggered deep run duration budget (seconds)
    pub immediate_deep_max_duration_secs: u64,
    /// Budgets above this many seconds run as foreground work
    pub foreground_threshold_secs: u64,
    /// Notify when a run finds new transactions
    pub notify_on_receive: bool,
    /// Retry backoff
    pub backoff: BackoffPolicy,
}

impl Default for BackgroundSyncConfig {
    fn default() -> Self {
        Self {
            compact_interval_mins: 15,
            compact_flex_mins: 5,
            compact_max_duration_secs: 60,
            compact_max_blocks: 5_000,
            deep_interval_hours: 24,
            deep_flex_hours: 2,
            deep_max_duration_secs: 300,
            deep_max_blocks: 50_000,
            immediate_max_duration_secs: 120,
            immediate_deep_max_duration_secs: 300,
            foreground_threshold_secs: 60,
            notify_on_receive: true,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl BackgroundSyncConfig {
    /// Load from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject zero intervals or budgets and flex windows wider than their interval
    pub fn validate(&self) -> Result<()> {
        if self.compact_interval_mins == 0 || self.deep_interval_hours == 0 {
            return Err(Error::Config("sync intervals must be non-zero".to_string()));
        }
        if self.compact_flex_mins > self.compact_interval_mins {
            return Err(Error::Config(format!(
                "compact flex {}m exceeds interval {}m",
                self.compact_flex_mins, self.compact_interval_mins
            )));
        }
        if self.deep_flex_hours > self.deep_interval_hours {
            return Err(Error::Config(format!(
                "deep flex {}h exceeds interval {}h",
                self.deep_flex_hours, self.deep_interval_hours
            )));
        }
        let budgets = [
            self.compact_max_duration_secs,
            self.compact_max_blocks,
            self.deep_max_duration_secs,
            self.deep_max_blocks,
            self.immediate_max_duration_secs,
            self.immediate_deep_max_duration_secs,
        ];
        if budgets.contains(&0) {
            return Err(Error::Config("sync budgets must be non-zero".to_string()));
        }
        if self.backoff.initial_delay_secs == 0
            || self.backoff.max_delay_secs < self.backoff.initial_delay_secs
        {
            return Err(Error::Config(format!(
                "invalid backoff {}s..{}s",
                self.backoff.initial_delay_secs, self.backoff.max_delay_secs
            )));
        }
        Ok(())
    }

    /// Deep once the deep interval has elapsed since the last deep sync
    pub fn recommend_sync_mode(&self, minutes_since_last_deep: u32) -> SyncMode {
        if minutes_since_last_deep >= self.deep_interval_hours.saturating_mul(60) {
            SyncMode::Deep
        } else {
            SyncMode::Compact
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_sync_config_defaults() {
        let config = BackgroundSyncConfig::default();
        assert_eq!(config.compact_interval_mins, 15);
        assert_eq!(config.compact_max_duration_secs, 60);
        assert_eq!(config.compact_max_blocks, 5_000);
        assert_eq!(config.deep_interval_hours, 24);
        assert_eq!(config.deep_max_blocks, 50_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = BackoffPolicy::default();
        assert_eq!(backoff.delay_for(0), Duration::from_secs(30));
        assert_eq!(backoff.delay_for(1), Duration::from_secs(60));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(120));
        assert_eq!(backoff.delay_for(20), Duration::from_secs(5 * 60 * 60));
        assert_eq!(backoff.delay_for(200), Duration::from_secs(5 * 60 * 60));
    }

    #[test]
    fn test_recommend_sync_mode() {
        let config = BackgroundSyncConfig::default();
        assert_eq!(config.recommend_sync_mode(10), SyncMode::Compact);
        assert_eq!(config.recommend_sync_mode(24 * 60), SyncMode::Deep);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = BackgroundSyncConfig::from_json(r#"{"compact_interval_mins": 30}"#).unwrap();
        assert_eq!(config.compact_interval_mins, 30);
        assert_eq!(config.deep_interval_hours, 24);
    }

    #[test]
    fn test_validate_rejects_wide_flex() {
        let config = BackgroundSyncConfig {
            compact_flex_mins: 20,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert!(BackgroundSyncConfig::from_json(r#"{"deep_max_blocks": 0}"#).is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_backoff_is_monotonic_and_capped(attempt in 0u32..64) {
            let backoff = BackoffPolicy::default();
            let delay = backoff.delay_for(attempt);
            proptest::prop_assert!(delay <= Duration::from_secs(backoff.max_delay_secs));
            proptest::prop_assert!(backoff.delay_for(attempt + 1) >= delay);
        }
    }
}
