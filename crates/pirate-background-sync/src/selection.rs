//! Wallet selection for background sync
//!
//! A pinned active wallet always wins. Without one, wallets are picked
//! round-robin with warm-wallet priority:
//!
//! 1. wallets already syncing are skipped
//! 2. warm wallets (used within the last 7 days) come first, most recently
//!    used first
//! 3. cool wallets follow, least recently synced first
//! 4. ties break on wallet id so the order is stable across runs
//! 5. the order is rotated to start after the persisted cursor wallet

use crate::{Error, Result};
use parking_lot::RwLock;
use pirate_keystore::{keys, PreferenceStore};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Wallets used within this window are warm
pub const WARM_WALLET_WINDOW_SECS: i64 = 7 * 24 * 60 * 60;

/// Activity record of a known wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletActivity {
    /// Wallet id
    pub id: String,
    /// Unix seconds of last foreground use
    pub last_used_at: Option<i64>,
    /// Unix seconds of last completed sync
    pub last_synced_at: Option<i64>,
}

/// Registry of known wallets
pub trait WalletDirectory: Send + Sync {
    /// All known wallets
    fn wallets(&self) -> Result<Vec<WalletActivity>>;

    /// Whether a sync is already running for `wallet_id`
    fn is_syncing(&self, wallet_id: &str) -> bool;
}

/// In-memory wallet registry
#[derive(Default)]
pub struct MemoryWalletDirectory {
    wallets: RwLock<Vec<WalletActivity>>,
    syncing: RwLock<HashSet<String>>,
}

impl MemoryWalletDirectory {
    /// Create empty
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a wallet
    pub fn upsert(&self, activity: WalletActivity) {
        let mut wallets = self.wallets.write();
        wallets.retain(|w| w.id != activity.id);
        wallets.push(activity);
    }

    /// Mark a wallet as syncing (or idle)
    pub fn set_syncing(&self, wallet_id: &str, syncing: bool) {
        let mut set = self.syncing.write();
        if syncing {
            set.insert(wallet_id.to_string());
        } else {
            set.remove(wallet_id);
        }
    }
}

impl WalletDirectory for MemoryWalletDirectory {
    fn wallets(&self) -> Result<Vec<WalletActivity>> {
        Ok(self.wallets.read().clone())
    }

    fn is_syncing(&self, wallet_id: &str) -> bool {
        self.syncing.read().contains(wallet_id)
    }
}

/// Which wallet an attempt syncs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletTarget {
    /// User-pinned active wallet
    Pinned(String),
    /// Picked by round-robin
    RoundRobin(String),
    /// Registry empty or unreadable; the engine picks
    Delegated,
}

impl WalletTarget {
    /// Wallet id handed to the engine
    pub fn wallet_id(&self) -> Option<&str> {
        match self {
            WalletTarget::Pinned(id) | WalletTarget::RoundRobin(id) => Some(id),
            WalletTarget::Delegated => None,
        }
    }

    /// Whether the choice came from the round-robin path
    pub fn is_round_robin(&self) -> bool {
        !matches!(self, WalletTarget::Pinned(_))
    }
}

/// Chooses the wallet for each attempt
#[derive(Clone)]
pub struct WalletSelector {
    prefs: Arc<dyn PreferenceStore>,
    directory: Arc<dyn WalletDirectory>,
}

impl WalletSelector {
    /// Create over the preference store and wallet registry
    pub fn new(prefs: Arc<dyn PreferenceStore>, directory: Arc<dyn WalletDirectory>) -> Self {
        Self { prefs, directory }
    }

    /// Pinned wallet if set, otherwise the next round-robin candidate
    pub fn select(&self, now: i64) -> Result<WalletTarget> {
        match self.prefs.get_string(keys::ACTIVE_WALLET_ID) {
            Ok(Some(id)) if !id.trim().is_empty() => return Ok(WalletTarget::Pinned(id)),
            Ok(_) => {}
            Err(e) => warn!("Active wallet id unreadable ({}), using round-robin", e),
        }

        let wallets = match self.directory.wallets() {
            Ok(wallets) => wallets,
            Err(e) => {
                warn!("Wallet registry unreadable ({}), delegating selection", e);
                return Ok(WalletTarget::Delegated);
            }
        };
        if wallets.is_empty() {
            return Ok(WalletTarget::Delegated);
        }

        let ordered = self.round_robin_order(wallets, now);
        let next = ordered.into_iter().next().ok_or(Error::NoWallets)?;
        debug!("Round-robin selected wallet {}", next.id);
        Ok(WalletTarget::RoundRobin(next.id))
    }

    /// Candidates in pick order, cursor rotation applied
    pub fn round_robin_order(&self, wallets: Vec<WalletActivity>, now: i64) -> Vec<WalletActivity> {
        let (mut warm, mut cool): (Vec<_>, Vec<_>) = wallets
            .into_iter()
            .filter(|w| !self.directory.is_syncing(&w.id))
            .partition(|w| {
                w.last_used_at
                    .map(|ts| now - ts <= WARM_WALLET_WINDOW_SECS)
                    .unwrap_or(false)
            });

        warm.sort_by(|a, b| {
            Reverse(a.last_used_at.unwrap_or(0))
                .cmp(&Reverse(b.last_used_at.unwrap_or(0)))
                .then_with(|| a.id.cmp(&b.id))
        });
        cool.sort_by(|a, b| by_last_synced(a, b).then_with(|| a.id.cmp(&b.id)));

        let mut ordered = warm;
        ordered.extend(cool);

        match self.prefs.get_string(keys::BG_SYNC_CURSOR) {
            Ok(Some(cursor)) => {
                if let Some(pos) = ordered.iter().position(|w| w.id == cursor) {
                    let len = ordered.len();
                    ordered.rotate_left((pos + 1) % len);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Background sync cursor unreadable: {}", e),
        }
        ordered
    }

    /// Move the cursor to the wallet just attempted
    pub fn advance(&self, wallet_id: &str) {
        if let Err(e) = self.prefs.set_string(keys::BG_SYNC_CURSOR, wallet_id) {
            warn!("Failed to update background sync cursor for {}: {}", wallet_id, e);
        }
    }
}

fn by_last_synced(a: &WalletActivity, b: &WalletActivity) -> Ordering {
    a.last_synced_at.unwrap_or(0).cmp(&b.last_synced_at.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pirate_keystore::MemoryPreferenceStore;

    const NOW: i64 = 1_700_000_000;
    const DAY: i64 = 24 * 60 * 60;

    fn wallet(
        id: &str,
        used_days_ago: Option<i64>,
        synced_days_ago: Option<i64>,
    ) -> WalletActivity {
        WalletActivity {
            id: id.to_string(),
            last_used_at: used_days_ago.map(|d| NOW - d * DAY),
            last_synced_at: synced_days_ago.map(|d| NOW - d * DAY),
        }
    }

    fn selector() -> (WalletSelector, Arc<MemoryPreferenceStore>, Arc<MemoryWalletDirectory>) {
        let prefs = Arc::new(MemoryPreferenceStore::new());
        let directory = Arc::new(MemoryWalletDirectory::new());
        (
            WalletSelector::new(prefs.clone(), directory.clone()),
            prefs,
            directory,
        )
    }

    #[test]
    fn test_warm_before_cool() {
        let (selector, _, _) = selector();
        let order = selector.round_robin_order(
            vec![
                wallet("cool-recent", Some(30), Some(1)),
                wallet("warm-older", Some(3), None),
                wallet("cool-stale", None, Some(10)),
                wallet("warm-newest", Some(0), None),
            ],
            NOW,
        );
        let ids: Vec<_> = order.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["warm-newest", "warm-older", "cool-stale", "cool-recent"]);
    }

    #[test]
    fn test_pinned_wallet_wins() {
        let (selector, prefs, directory) = selector();
        directory.upsert(wallet("a", Some(0), None));
        prefs.set_string(keys::ACTIVE_WALLET_ID, "pinned").unwrap();
        assert_eq!(
            selector.select(NOW).unwrap(),
            WalletTarget::Pinned("pinned".to_string())
        );
    }

    #[test]
    fn test_cursor_rotates_and_skips_syncing() {
        let (selector, _, directory) = selector();
        directory.upsert(wallet("a", None, Some(3)));
        directory.upsert(wallet("b", None, Some(2)));
        directory.upsert(wallet("c", None, Some(1)));

        let mut picked = Vec::new();
        for _ in 0..4 {
            let target = selector.select(NOW).unwrap();
            let id = target.wallet_id().unwrap().to_string();
            selector.advance(&id);
            picked.push(id);
        }
        assert_eq!(picked, vec!["a", "b", "c", "a"]);

        directory.set_syncing("b", true);
        assert_eq!(
            selector.select(NOW).unwrap(),
            WalletTarget::RoundRobin("c".to_string())
        );
    }

    #[test]
    fn test_empty_and_busy_registries() {
        let (selector, _, directory) = selector();
        assert_eq!(selector.select(NOW).unwrap(), WalletTarget::Delegated);

        directory.upsert(wallet("a", None, None));
        directory.set_syncing("a", true);
        assert!(matches!(selector.select(NOW), Err(Error::NoWallets)));
    }
}
