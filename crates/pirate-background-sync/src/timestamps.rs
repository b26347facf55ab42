//! Last successful sync per mode, stored as Unix seconds

use crate::config::BackgroundSyncConfig;
use crate::work::SyncMode;
use crate::Result;
use chrono::{DateTime, TimeZone, Utc};
use pirate_keystore::{keys, PreferenceStore};
use std::sync::Arc;

/// Last-sync bookkeeping over the preference store
#[derive(Clone)]
pub struct SyncTimestamps {
    prefs: Arc<dyn PreferenceStore>,
}

impl SyncTimestamps {
    /// Create over the preference store
    pub fn new(prefs: Arc<dyn PreferenceStore>) -> Self {
        Self { prefs }
    }

    fn key(mode: SyncMode) -> &'static str {
        match mode {
            SyncMode::Compact => keys::LAST_COMPACT_SYNC,
            SyncMode::Deep => keys::LAST_DEEP_SYNC,
        }
    }

    /// Record a successful run
    pub fn record_success(&self, mode: SyncMode, at: DateTime<Utc>) -> Result<()> {
        self.prefs.set_i64(Self::key(mode), at.timestamp())?;
        Ok(())
    }

    /// Time of the last successful run
    pub fn last_sync(&self, mode: SyncMode) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .prefs
            .get_i64(Self::key(mode))?
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()))
    }

    /// Whole minutes since the last successful run; `None` if never synced
    pub fn minutes_since_last_sync(
        &self,
        mode: SyncMode,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>> {
        Ok(self.last_sync(mode)?.map(|last| {
            let minutes = (now - last).num_minutes().max(0);
            u32::try_from(minutes).unwrap_or(u32::MAX)
        }))
    }

    /// Deep if never deep-synced or the deep interval has elapsed
    pub fn recommend_mode(
        &self,
        config: &BackgroundSyncConfig,
        now: DateTime<Utc>,
    ) -> Result<SyncMode> {
        Ok(match self.minutes_since_last_sync(SyncMode::Deep, now)? {
            Some(minutes) => config.recommend_sync_mode(minutes),
            None => SyncMode::Deep,
        })
    }
}
