//! Long-running work promotion
//!
//! Platforms may reclaim background work after a short budget. Promotion asks
//! the platform to keep the work alive behind a visible ongoing notification.
//! A denied promotion is not an error; the attempt continues as normal work.

use crate::notify::Notification;
use crate::work::SyncMode;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Promotion refused by the platform
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("foreground promotion denied: {0}")]
pub struct PromotionDenied(pub String);

/// Keeps work alive past normal background limits
pub trait ForegroundPromoter: Send + Sync {
    /// Promote the current work behind `notification`
    fn promote(&self, notification: &Notification) -> Result<(), PromotionDenied>;
}

/// Whether an attempt needs promotion before calling the engine
pub fn needs_promotion(
    max_duration_secs: u64,
    attempt: u32,
    mode: SyncMode,
    threshold_secs: u64,
) -> bool {
    max_duration_secs > threshold_secs || attempt > 0 || mode == SyncMode::Deep
}

/// Platforms without foreground work (desktop)
pub struct NoForeground;

impl ForegroundPromoter for NoForeground {
    fn promote(&self, _notification: &Notification) -> Result<(), PromotionDenied> {
        Err(PromotionDenied("not supported on this platform".to_string()))
    }
}

/// Promoter that records requests and can be told to deny them
pub struct RecordingPromoter {
    allow: AtomicBool,
    promotions: Mutex<Vec<Notification>>,
}

impl RecordingPromoter {
    /// Promoter that grants every request
    pub fn granting() -> Self {
        Self {
            allow: AtomicBool::new(true),
            promotions: Mutex::new(Vec::new()),
        }
    }

    /// Grant or deny subsequent requests
    pub fn set_allowed(&self, allow: bool) {
        self.allow.store(allow, Ordering::Release);
    }

    /// Number of promotion requests received
    pub fn promotion_count(&self) -> usize {
        self.promotions.lock().len()
    }
}

impl ForegroundPromoter for RecordingPromoter {
    fn promote(&self, notification: &Notification) -> Result<(), PromotionDenied> {
        self.promotions.lock().push(notification.clone());
        if self.allow.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(PromotionDenied("quota exhausted".to_string()))
        }
    }
}
