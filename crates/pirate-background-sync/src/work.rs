//! Work specifications
//!
//! Two durable, uniquely-named specs (`compact`, `deep`) and an ephemeral
//! `immediate` spec for user-initiated refresh.

use crate::config::BackgroundSyncConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Unique name of the recurring compact sync
pub const COMPACT_WORK_NAME: &str = "compact";

/// Unique name of the recurring deep sync
pub const DEEP_WORK_NAME: &str = "deep";

/// Tag carried by every sync work item
pub const SYNC_WORK_TAG: &str = "pirate_sync";

/// Sync mode passed to the wallet engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Quick compact block sync (for frequent updates)
    Compact,
    /// Deep sync with witness updates (for daily maintenance)
    Deep,
}

impl SyncMode {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Compact => "compact",
            SyncMode::Deep => "deep",
        }
    }
}

impl From<&str> for SyncMode {
    /// Anything other than `"deep"` is compact
    fn from(s: &str) -> Self {
        if s.eq_ignore_ascii_case("deep") {
            SyncMode::Deep
        } else {
            SyncMode::Compact
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which of the three work kinds a spec describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkKind {
    /// Recurring compact sync
    Compact,
    /// Recurring deep sync
    Deep,
    /// One-off user-triggered sync
    Immediate,
}

/// Network connectivity required to start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkRequirement {
    /// Any connection
    Connected,
    /// Wi-Fi or other unmetered connection
    Unmetered,
}

/// Declarative run constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkConstraints {
    /// Connectivity requirement
    pub network: NetworkRequirement,
    /// Only run while charging
    pub requires_charging: bool,
    /// Skip while the battery is low
    pub requires_battery_not_low: bool,
}

/// When a spec runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Schedule {
    /// Recurring, anywhere inside the last `flex` of each `interval`
    Periodic {
        /// Repeat interval
        interval: Duration,
        /// Flex window
        flex: Duration,
    },
    /// Runs once, as soon as constraints allow
    OneOff {
        /// Ask the platform to run ahead of its normal queue
        expedited: bool,
    },
}

/// Named, constraint-bound description of sync work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSpec {
    /// Unique name for durable work; random for immediate work
    pub name: String,
    /// Work kind
    pub kind: WorkKind,
    /// Mode passed to the engine
    pub sync_mode: SyncMode,
    /// Duration budget (seconds)
    pub max_duration_secs: u64,
    /// Block budget
    pub max_blocks: u64,
    /// Run constraints
    pub constraints: WorkConstraints,
    /// Schedule
    pub schedule: Schedule,
    /// Tag for bulk cancellation
    pub tag: String,
}

impl WorkSpec {
    /// Recurring compact sync: 15m interval, 5m flex, any network, battery not low
    pub fn compact(config: &BackgroundSyncConfig) -> Self {
        Self {
            name: COMPACT_WORK_NAME.to_string(),
            kind: WorkKind::Compact,
            sync_mode: SyncMode::Compact,
            max_duration_secs: config.compact_max_duration_secs,
            max_blocks: config.compact_max_blocks,
            constraints: WorkConstraints {
                network: NetworkRequirement::Connected,
                requires_charging: false,
                requires_battery_not_low: true,
            },
            schedule: Schedule::Periodic {
                interval: Duration::from_secs(u64::from(config.compact_interval_mins) * 60),
                flex: Duration::from_secs(u64::from(config.compact_flex_mins) * 60),
            },
            tag: SYNC_WORK_TAG.to_string(),
        }
    }

    /// Recurring deep sync: 24h interval, 2h flex, unmetered, charging, battery not low
    pub fn deep(config: &BackgroundSyncConfig) -> Self {
        Self {
            name: DEEP_WORK_NAME.to_string(),
            kind: WorkKind::Deep,
            sync_mode: SyncMode::Deep,
            max_duration_secs: config.deep_max_duration_secs,
            max_blocks: config.deep_max_blocks,
            constraints: WorkConstraints {
                network: NetworkRequirement::Unmetered,
                requires_charging: true,
                requires_battery_not_low: true,
            },
            schedule: Schedule::Periodic {
                interval: Duration::from_secs(u64::from(config.deep_interval_hours) * 3600),
                flex: Duration::from_secs(u64::from(config.deep_flex_hours) * 3600),
            },
            tag: SYNC_WORK_TAG.to_string(),
        }
    }

    /// One-off user-triggered sync with the shorter immediate budget
    pub fn immediate(config: &BackgroundSyncConfig, mode: SyncMode, expedited: bool) -> Self {
        let (max_duration_secs, max_blocks) = match mode {
            SyncMode::Compact => (config.immediate_max_duration_secs, config.compact_max_blocks),
            SyncMode::Deep => (config.immediate_deep_max_duration_secs, config.deep_max_blocks),
        };
        Self {
            name: format!("immediate-{}", uuid::Uuid::new_v4()),
            kind: WorkKind::Immediate,
            sync_mode: mode,
            max_duration_secs,
            max_blocks,
            constraints: WorkConstraints {
                network: NetworkRequirement::Connected,
                requires_charging: false,
                requires_battery_not_low: false,
            },
            schedule: Schedule::OneOff { expedited },
            tag: SYNC_WORK_TAG.to_string(),
        }
    }

    /// Unique-by-name recurring work
    pub fn is_durable(&self) -> bool {
        self.kind != WorkKind::Immediate
    }

    /// Same spec without the expedited hint
    pub fn without_expedite(mut self) -> Self {
        if let Schedule::OneOff { expedited } = &mut self.schedule {
            *expedited = false;
        }
        self
    }
}
