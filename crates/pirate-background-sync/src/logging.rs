//! Structured logging for background sync observability

#![allow(missing_docs)]

use crate::classifier::ErrorCategory;
use crate::notify::NotificationChannel;
use crate::tunnel::TunnelMode;
use crate::work::SyncMode;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Background sync event type
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BackgroundSyncEvent {
    /// Attempt started
    Started {
        mode: SyncMode,
        wallet_id: Option<String>,
        attempt: u32,
        timestamp: String,
    },
    /// Tunnel snapshot taken
    TunnelResolved {
        tunnel: TunnelMode,
        is_privacy_preserving: bool,
    },
    /// Attempt succeeded
    Completed {
        blocks_synced: u64,
        duration_secs: u64,
        new_transactions: u32,
    },
    /// Attempt failed, another will follow
    RetryScheduled {
        category: ErrorCategory,
        attempt: u32,
    },
    /// Attempt failed for good
    Failed {
        category: ErrorCategory,
        message: String,
        attempt: u32,
    },
    /// Attempt cancelled mid-run
    Cancelled { attempt: u32 },
    /// Notification shown
    NotificationShown {
        channel: NotificationChannel,
        transaction_count: u32,
    },
}

/// Events kept in the journal; older ones are dropped first
pub const MAX_JOURNAL_EVENTS: usize = 256;

/// In-memory journal of the most recent sync events, mirrored to `tracing`
#[derive(Debug, Default)]
pub struct BackgroundSyncLogger {
    events: VecDeque<BackgroundSyncEvent>,
}

impl BackgroundSyncLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_started(&mut self, mode: SyncMode, wallet_id: Option<&str>, attempt: u32) {
        let timestamp = chrono::Utc::now().to_rfc3339();
        info!(
            event = "background_sync_started",
            mode = %mode,
            wallet_id = wallet_id.unwrap_or("<engine>"),
            attempt,
            timestamp = %timestamp,
            "Background sync started"
        );
        self.record(BackgroundSyncEvent::Started {
            mode,
            wallet_id: wallet_id.map(str::to_string),
            attempt,
            timestamp,
        });
    }

    pub fn log_tunnel(&mut self, tunnel: TunnelMode, is_privacy_preserving: bool) {
        info!(
            event = "background_sync_tunnel_resolved",
            tunnel = %tunnel,
            is_privacy_preserving,
            "Network tunnel resolved for background sync"
        );
        self.record(BackgroundSyncEvent::TunnelResolved {
            tunnel,
            is_privacy_preserving,
        });
    }

    pub fn log_completed(&mut self, blocks_synced: u64, duration_secs: u64, new_transactions: u32) {
        info!(
            event = "background_sync_completed",
            blocks_synced,
            duration_secs,
            new_transactions,
            "Background sync completed successfully"
        );
        self.record(BackgroundSyncEvent::Completed {
            blocks_synced,
            duration_secs,
            new_transactions,
        });
    }

    pub fn log_retry(&mut self, category: ErrorCategory, attempt: u32) {
        warn!(
            event = "background_sync_retry",
            category = %category,
            attempt,
            "Background sync failed, retry scheduled"
        );
        self.record(BackgroundSyncEvent::RetryScheduled { category, attempt });
    }

    pub fn log_failed(&mut self, category: ErrorCategory, message: &str, attempt: u32) {
        error!(
            event = "background_sync_failed",
            category = %category,
            error = %message,
            attempt,
            "Background sync failed"
        );
        self.record(BackgroundSyncEvent::Failed {
            category,
            message: message.to_string(),
            attempt,
        });
    }

    pub fn log_cancelled(&mut self, attempt: u32) {
        info!(event = "background_sync_cancelled", attempt, "Background sync cancelled");
        self.record(BackgroundSyncEvent::Cancelled { attempt });
    }

    pub fn log_notification(&mut self, channel: NotificationChannel, transaction_count: u32) {
        info!(
            event = "background_sync_notification",
            channel = channel.id(),
            transaction_count,
            "Background sync notification shown"
        );
        self.record(BackgroundSyncEvent::NotificationShown {
            channel,
            transaction_count,
        });
    }

    fn record(&mut self, event: BackgroundSyncEvent) {
        if self.events.len() == MAX_JOURNAL_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Journal contents, oldest first
    pub fn events(&self) -> Vec<BackgroundSyncEvent> {
        self.events.iter().cloned().collect()
    }

    /// Events as a JSON array for diagnostics export
    pub fn export_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(&self.events)?)
    }

    pub fn clear(&mut self) {
        self.events.clear();
        debug!("Background sync log cleared");
    }
}

/// Install a JSON `tracing` subscriber for background runs.
///
/// Honors `RUST_LOG`, defaulting to `info`. Does nothing if a global
/// subscriber is already installed.
pub fn init_background_sync_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .json()
        .try_init()
        .is_ok();

    if installed {
        info!("Background sync logging initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_sync_logger() {
        let mut logger = BackgroundSyncLogger::new();
        logger.log_started(SyncMode::Compact, Some("wallet-123"), 0);
        logger.log_tunnel(TunnelMode::Tor, true);
        logger.log_completed(1000, 30, 5);
        assert_eq!(logger.events().len(), 3);

        logger.clear();
        assert!(logger.events().is_empty());
    }

    #[test]
    fn test_journal_keeps_most_recent_events() {
        let mut logger = BackgroundSyncLogger::new();
        for attempt in 0..(MAX_JOURNAL_EVENTS as u32 + 44) {
            logger.log_cancelled(attempt);
        }

        let events = logger.events();
        assert_eq!(events.len(), MAX_JOURNAL_EVENTS);
        assert_eq!(events[0], BackgroundSyncEvent::Cancelled { attempt: 44 });
        assert_eq!(
            events.last(),
            Some(&BackgroundSyncEvent::Cancelled {
                attempt: MAX_JOURNAL_EVENTS as u32 + 43
            })
        );
    }

    #[test]
    fn test_export_is_tagged_json() {
        let mut logger = BackgroundSyncLogger::new();
        logger.log_failed(ErrorCategory::ProxyFailure, "PROXY_CONNECTION_FAILED", 2);

        let json: serde_json::Value = serde_json::from_str(&logger.export_json().unwrap()).unwrap();
        assert_eq!(json[0]["event"], "failed");
        assert_eq!(json[0]["category"], "proxy_failure");
        assert_eq!(json[0]["attempt"], 2);
    }

    #[test]
    fn test_init_is_idempotent() {
        init_background_sync_logging();
        init_background_sync_logging();
    }
}
