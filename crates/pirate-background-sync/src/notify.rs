//! User-facing notifications
//!
//! Three channels: sync status (low priority, silent, ongoing), transaction
//! received (default priority), and security/connectivity alerts.

use crate::classifier::ErrorCategory;
use crate::work::SyncMode;
use crate::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Arrrtoshis per ARRR
const ARRRTOSHIS_PER_ARRR: u64 = 100_000_000;

/// Notification channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    /// Ongoing sync progress
    SyncStatus,
    /// Incoming funds
    TransactionReceived,
    /// Tunnel and connectivity problems
    SecurityAlert,
}

impl NotificationChannel {
    /// Platform channel id
    pub fn id(&self) -> &'static str {
        match self {
            NotificationChannel::SyncStatus => "pirate_sync_status",
            NotificationChannel::TransactionReceived => "pirate_transactions",
            NotificationChannel::SecurityAlert => "pirate_security",
        }
    }

    /// Channel importance
    pub fn importance(&self) -> Importance {
        match self {
            NotificationChannel::SyncStatus => Importance::Low,
            NotificationChannel::TransactionReceived => Importance::Default,
            NotificationChannel::SecurityAlert => Importance::High,
        }
    }
}

/// Notification importance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Importance {
    /// No sound, collapsed
    Low,
    /// Normal
    Default,
    /// Heads-up
    High,
}

/// A notification ready for the platform surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Channel
    pub channel: NotificationChannel,
    /// Title
    pub title: String,
    /// Body
    pub body: String,
    /// Suppress sound and vibration
    pub silent: bool,
    /// Cannot be swiped away while work runs
    pub ongoing: bool,
    /// Opens the app's settings when tapped
    pub actionable: bool,
}

impl Notification {
    /// Ongoing sync progress, used for foreground promotion
    pub fn sync_in_progress(mode: SyncMode) -> Self {
        let body = match mode {
            SyncMode::Compact => "Checking for new transactions",
            SyncMode::Deep => "Updating wallet data",
        };
        Self {
            channel: NotificationChannel::SyncStatus,
            title: "Syncing Pirate Wallet".to_string(),
            body: body.to_string(),
            silent: true,
            ongoing: true,
            actionable: false,
        }
    }

    /// New transactions with the resulting balance
    pub fn transactions_received(count: u32, new_balance: Option<u64>) -> Self {
        let title = if count == 1 {
            "1 new transaction".to_string()
        } else {
            format!("{} new transactions", count)
        };
        let body = match new_balance {
            Some(balance) => format!("Balance: {}", format_arrr(balance)),
            None => "Open Pirate Wallet to view".to_string(),
        };
        Self {
            channel: NotificationChannel::TransactionReceived,
            title,
            body,
            silent: false,
            ongoing: false,
            actionable: false,
        }
    }

    /// Terminal sync failure for `category`
    pub fn sync_failed(category: ErrorCategory) -> Self {
        Self {
            channel: NotificationChannel::SecurityAlert,
            title: category.notification_title().to_string(),
            body: category.notification_text().to_string(),
            silent: false,
            ongoing: false,
            actionable: category == ErrorCategory::AnonymityNetworkFailure,
        }
    }
}

/// Format arrrtoshis as ARRR with eight decimals
pub fn format_arrr(arrrtoshis: u64) -> String {
    format!(
        "{}.{:08} ARRR",
        arrrtoshis / ARRRTOSHIS_PER_ARRR,
        arrrtoshis % ARRRTOSHIS_PER_ARRR
    )
}

/// Notification surface
pub trait Notifier: Send + Sync {
    /// Post a notification
    fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Notifier that keeps everything it is asked to show
#[derive(Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    /// Create empty
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications so far
    pub fn notifications(&self) -> Vec<Notification> {
        self.shown.lock().clone()
    }

    /// Notifications posted on `channel`
    pub fn on_channel(&self, channel: NotificationChannel) -> Vec<Notification> {
        self.shown
            .lock()
            .iter()
            .filter(|n| n.channel == channel)
            .cloned()
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        self.shown.lock().push(notification.clone());
        Ok(())
    }
}
