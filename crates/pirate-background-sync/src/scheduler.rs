//! Sync scheduling
//!
//! The platform work queue (WorkManager, BGTaskScheduler) is reached through
//! [`WorkPlatform`]. Durable work is unique by name: registering again
//! updates the existing schedule in place. Immediate work is never unique.

use crate::config::BackgroundSyncConfig;
use crate::work::{
    Schedule, SyncMode, WorkConstraints, WorkKind, WorkSpec, COMPACT_WORK_NAME, DEEP_WORK_NAME,
    SYNC_WORK_TAG,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What to do when unique work with the same name exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingWorkPolicy {
    /// Replace the schedule and constraints, keep the identity
    Update,
    /// Leave the existing work untouched
    Keep,
}

/// Work known to the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledWork {
    /// Spec as last registered
    pub spec: WorkSpec,
    /// First registration time
    pub enqueued_at: DateTime<Utc>,
    /// Number of registrations (1 + updates)
    pub registrations: u32,
}

/// Platform work queue
pub trait WorkPlatform: Send + Sync {
    /// Enqueue recurring work unique by `spec.name`
    fn enqueue_unique_periodic(&self, spec: &WorkSpec, policy: ExistingWorkPolicy) -> Result<()>;

    /// Enqueue one-off work
    fn enqueue_one_off(&self, spec: &WorkSpec) -> Result<()>;

    /// Cancel unique work by name
    fn cancel_unique(&self, name: &str) -> Result<()>;

    /// Cancel all work carrying `tag`
    fn cancel_by_tag(&self, tag: &str) -> Result<()>;

    /// Work currently queued
    fn scheduled(&self) -> Vec<ScheduledWork>;
}

/// In-memory work queue
pub struct MemoryWorkPlatform {
    unique: RwLock<BTreeMap<String, ScheduledWork>>,
    one_off: RwLock<Vec<ScheduledWork>>,
    grant_expedited: AtomicBool,
}

impl MemoryWorkPlatform {
    /// Create an empty queue that grants expedited requests
    pub fn new() -> Self {
        Self {
            unique: RwLock::new(BTreeMap::new()),
            one_off: RwLock::new(Vec::new()),
            grant_expedited: AtomicBool::new(true),
        }
    }

    /// Refuse expedited requests (quota exhausted, old OS)
    pub fn set_grant_expedited(&self, grant: bool) {
        self.grant_expedited.store(grant, Ordering::Release);
    }

    /// Registered work named `name`
    pub fn unique_work(&self, name: &str) -> Option<ScheduledWork> {
        self.unique.read().get(name).cloned()
    }

    /// Pending one-off work
    pub fn one_off_work(&self) -> Vec<ScheduledWork> {
        self.one_off.read().clone()
    }
}

impl Default for MemoryWorkPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkPlatform for MemoryWorkPlatform {
    fn enqueue_unique_periodic(&self, spec: &WorkSpec, policy: ExistingWorkPolicy) -> Result<()> {
        let mut unique = self.unique.write();
        match unique.get_mut(&spec.name) {
            Some(existing) => {
                if policy == ExistingWorkPolicy::Update {
                    existing.spec = spec.clone();
                    existing.registrations += 1;
                }
            }
            None => {
                unique.insert(
                    spec.name.clone(),
                    ScheduledWork {
                        spec: spec.clone(),
                        enqueued_at: Utc::now(),
                        registrations: 1,
                    },
                );
            }
        }
        Ok(())
    }

    fn enqueue_one_off(&self, spec: &WorkSpec) -> Result<()> {
        let expedited = matches!(spec.schedule, Schedule::OneOff { expedited: true });
        if expedited && !self.grant_expedited.load(Ordering::Acquire) {
            return Err(Error::Scheduler("expedited work quota exhausted".to_string()));
        }
        self.one_off.write().push(ScheduledWork {
            spec: spec.clone(),
            enqueued_at: Utc::now(),
            registrations: 1,
        });
        Ok(())
    }

    fn cancel_unique(&self, name: &str) -> Result<()> {
        self.unique.write().remove(name);
        Ok(())
    }

    fn cancel_by_tag(&self, tag: &str) -> Result<()> {
        self.unique.write().retain(|_, w| w.spec.tag != tag);
        self.one_off.write().retain(|w| w.spec.tag != tag);
        Ok(())
    }

    fn scheduled(&self) -> Vec<ScheduledWork> {
        let mut all: Vec<_> = self.unique.read().values().cloned().collect();
        all.extend(self.one_off.read().iter().cloned());
        all
    }
}

/// Summary of one registered work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSummary {
    /// Work name
    pub name: String,
    /// Work kind
    pub kind: WorkKind,
    /// Duration budget (seconds)
    pub max_duration_secs: u64,
    /// Block budget
    pub max_blocks: u64,
    /// Interval and flex
    pub schedule: Schedule,
    /// Run constraints
    pub constraints: WorkConstraints,
}

/// Scheduler status for settings screens and diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Durable work currently registered
    pub durable: Vec<WorkSummary>,
    /// Immediate work not yet started
    pub pending_immediate: usize,
}

impl SchedulerStatus {
    /// Whether both durable specs are registered
    pub fn is_fully_registered(&self) -> bool {
        [COMPACT_WORK_NAME, DEEP_WORK_NAME]
            .iter()
            .all(|name| self.durable.iter().any(|w| w.name == *name))
    }
}

/// Registers and cancels sync work
pub struct SyncScheduler {
    platform: Arc<dyn WorkPlatform>,
    config: BackgroundSyncConfig,
}

impl SyncScheduler {
    /// Create scheduler; rejects an invalid config
    pub fn new(platform: Arc<dyn WorkPlatform>, config: BackgroundSyncConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { platform, config })
    }

    /// Active configuration
    pub fn config(&self) -> &BackgroundSyncConfig {
        &self.config
    }

    /// Register (or update) the `compact` and `deep` recurring work
    pub fn register_periodic(&self) -> Result<()> {
        for spec in [WorkSpec::compact(&self.config), WorkSpec::deep(&self.config)] {
            self.platform
                .enqueue_unique_periodic(&spec, ExistingWorkPolicy::Update)?;
            info!(
                "Registered {} sync: budget {}s / {} blocks",
                spec.name, spec.max_duration_secs, spec.max_blocks
            );
        }
        Ok(())
    }

    /// Queue a user-triggered sync.
    ///
    /// Asks for expedited execution; if the platform refuses, the same work is
    /// queued without the hint.
    pub fn trigger_immediate(&self, mode: SyncMode) -> Result<WorkSpec> {
        let spec = WorkSpec::immediate(&self.config, mode, true);
        match self.platform.enqueue_one_off(&spec) {
            Ok(()) => {
                debug!("Queued expedited {} sync {}", mode, spec.name);
                Ok(spec)
            }
            Err(e) => {
                warn!("Expedited sync unavailable ({}), queuing normally", e);
                let spec = spec.without_expedite();
                self.platform.enqueue_one_off(&spec)?;
                Ok(spec)
            }
        }
    }

    /// Remove both durable specs and any queued immediate work
    pub fn cancel_all(&self) -> Result<()> {
        self.platform.cancel_unique(COMPACT_WORK_NAME)?;
        self.platform.cancel_unique(DEEP_WORK_NAME)?;
        self.platform.cancel_by_tag(SYNC_WORK_TAG)?;
        info!("Cancelled all background sync work");
        Ok(())
    }

    /// Registered and pending sync work
    pub fn status(&self) -> SchedulerStatus {
        let mut durable = Vec::new();
        let mut pending_immediate = 0;
        for work in self.platform.scheduled() {
            if work.spec.tag != SYNC_WORK_TAG {
                continue;
            }
            if work.spec.is_durable() {
                durable.push(WorkSummary {
                    name: work.spec.name.clone(),
                    kind: work.spec.kind,
                    max_duration_secs: work.spec.max_duration_secs,
                    max_blocks: work.spec.max_blocks,
                    schedule: work.spec.schedule,
                    constraints: work.spec.constraints,
                });
            } else {
                pending_immediate += 1;
            }
        }
        SchedulerStatus {
            durable,
            pending_immediate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_policy_leaves_existing() {
        let platform = MemoryWorkPlatform::new();
        let config = BackgroundSyncConfig::default();
        let spec = WorkSpec::compact(&config);
        platform
            .enqueue_unique_periodic(&spec, ExistingWorkPolicy::Keep)
            .unwrap();

        let changed = WorkSpec {
            max_blocks: 1,
            ..spec.clone()
        };
        platform
            .enqueue_unique_periodic(&changed, ExistingWorkPolicy::Keep)
            .unwrap();
        let work = platform.unique_work(COMPACT_WORK_NAME).unwrap();
        assert_eq!(work.spec, spec);
        assert_eq!(work.registrations, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = BackgroundSyncConfig {
            compact_interval_mins: 0,
            ..Default::default()
        };
        assert!(SyncScheduler::new(Arc::new(MemoryWorkPlatform::new()), config).is_err());
    }
}
