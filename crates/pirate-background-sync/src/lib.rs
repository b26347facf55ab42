//! Background sync orchestration for Pirate Wallet
//!
//! Schedules wallet sync as OS-managed background work and runs each attempt
//! through the wallet engine over the user's chosen network tunnel.
//!
//! ## Work
//!
//! - **Compact** (`compact`): every 15 minutes, 60s / 5,000 block budget
//! - **Deep** (`deep`): every 24 hours on unmetered networks while charging,
//!   300s / 50,000 block budget
//! - **Immediate**: user-triggered one-off work, expedited when the platform
//!   allows it
//!
//! ## Attempts
//!
//! Each attempt snapshots the tunnel (Tor unless configured otherwise), picks
//! a wallet (pinned, else round-robin with warm-wallet priority), runs one
//! engine session, and classifies failures to decide whether to retry.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cancel;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod foreground;
pub mod logging;
pub mod notify;
pub mod runner;
pub mod scheduler;
pub mod selection;
pub mod timestamps;
pub mod tunnel;
pub mod work;

pub use cancel::CancelToken;
pub use classifier::{classify, classify_engine_error, ClassifiedError, ErrorCategory};
pub use config::{BackgroundSyncConfig, BackoffPolicy};
pub use engine::{
    codes, BoxedSession, EngineError, EngineRequest, EngineResponse, EngineSession,
    ScriptedWalletEngine, WalletEngine,
};
pub use error::{Error, Result};
pub use executor::{
    AttemptOutcome, ExecutorState, FailurePayload, SyncExecutor, SyncRequest, SyncResult,
};
pub use foreground::{
    needs_promotion, ForegroundPromoter, NoForeground, PromotionDenied, RecordingPromoter,
};
pub use logging::{
    init_background_sync_logging, BackgroundSyncEvent, BackgroundSyncLogger, MAX_JOURNAL_EVENTS,
};
pub use notify::{
    format_arrr, Importance, Notification, NotificationChannel, Notifier, RecordingNotifier,
};
pub use runner::SyncRunner;
pub use scheduler::{
    ExistingWorkPolicy, MemoryWorkPlatform, ScheduledWork, SchedulerStatus, SyncScheduler,
    WorkPlatform, WorkSummary,
};
pub use selection::{
    MemoryWalletDirectory, WalletActivity, WalletDirectory, WalletSelector, WalletTarget,
    WARM_WALLET_WINDOW_SECS,
};
pub use timestamps::SyncTimestamps;
pub use tunnel::{redact_proxy_url, TunnelConfig, TunnelConfigResolver, TunnelMode};
pub use work::{
    NetworkRequirement, Schedule, SyncMode, WorkConstraints, WorkKind, WorkSpec,
    COMPACT_WORK_NAME, DEEP_WORK_NAME, SYNC_WORK_TAG,
};
