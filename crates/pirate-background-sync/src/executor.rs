//! Sync executor: one attempt per call
//!
//! `Idle -> Resolving -> Running -> {Succeeded, Retrying, Failed}`
//!
//! Resolving snapshots the tunnel and picks the wallet. Running optionally
//! promotes the work to the foreground, then drives one engine session. The
//! session is released on every path out of Running, cancellation included.
//! If the attempt future itself is dropped mid-run, the release is handed to
//! the runtime.

use crate::cancel::CancelToken;
use crate::classifier::{classify_engine_error, ClassifiedError, ErrorCategory};
use crate::config::BackgroundSyncConfig;
use crate::engine::{BoxedSession, EngineError, EngineRequest, EngineResponse, WalletEngine};
use crate::foreground::{needs_promotion, ForegroundPromoter};
use crate::logging::{BackgroundSyncEvent, BackgroundSyncLogger};
use crate::notify::{Notification, Notifier};
use crate::selection::{WalletDirectory, WalletSelector, WalletTarget};
use crate::timestamps::SyncTimestamps;
use crate::tunnel::{TunnelConfig, TunnelConfigResolver};
use crate::work::{SyncMode, WorkSpec};
use crate::{Error, Result};
use chrono::Utc;
use parking_lot::Mutex;
use pirate_keystore::PreferenceStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Executor state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorState {
    /// No attempt in progress
    Idle,
    /// Taking the tunnel snapshot and picking the wallet
    Resolving,
    /// Engine session running
    Running,
    /// Last attempt succeeded
    Succeeded,
    /// Last attempt failed within its retry budget
    Retrying,
    /// Last attempt failed for good
    Failed,
}

/// One attempt of a work spec
#[derive(Debug, Clone)]
pub struct SyncRequest {
    /// Work being run
    pub spec: WorkSpec,
    /// Attempts already made for this work (0 on the first run)
    pub attempt: u32,
}

impl SyncRequest {
    /// Create request
    pub fn new(spec: WorkSpec, attempt: u32) -> Self {
        Self { spec, attempt }
    }
}

/// Successful attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Wallet synced; `None` when the engine picked
    pub wallet_id: Option<String>,
    /// Sync mode
    pub mode: SyncMode,
    /// Blocks scanned
    pub blocks_synced: u64,
    /// Wall-clock duration (seconds)
    pub duration_secs: u64,
    /// Transactions discovered
    pub new_transactions: u32,
    /// Balance after the run
    pub new_balance: Option<u64>,
    /// Tunnel the engine reported using
    pub tunnel_used: String,
    /// Non-fatal engine errors
    pub errors: Vec<String>,
}

/// Terminal failure recorded as the work result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePayload {
    /// Failure category
    pub error: ErrorCategory,
    /// Raw failure text
    pub message: String,
}

impl FailurePayload {
    /// `{"error": "...", "message": "..."}`
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Retry decision for the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Done
    Succeeded(SyncResult),
    /// Failed within budget; retry after backoff
    Retrying(ClassifiedError),
    /// Failed for good
    Failed(FailurePayload),
}

impl AttemptOutcome {
    /// Final executor state for this outcome
    pub fn state(&self) -> ExecutorState {
        match self {
            AttemptOutcome::Succeeded(_) => ExecutorState::Succeeded,
            AttemptOutcome::Retrying(_) => ExecutorState::Retrying,
            AttemptOutcome::Failed(_) => ExecutorState::Failed,
        }
    }
}

/// Performs sync attempts
pub struct SyncExecutor {
    engine: Arc<dyn WalletEngine>,
    tunnels: TunnelConfigResolver,
    selector: WalletSelector,
    timestamps: SyncTimestamps,
    notifier: Arc<dyn Notifier>,
    promoter: Arc<dyn ForegroundPromoter>,
    config: BackgroundSyncConfig,
    state: Mutex<ExecutorState>,
    logger: Mutex<BackgroundSyncLogger>,
}

impl SyncExecutor {
    /// Create executor
    pub fn new(
        engine: Arc<dyn WalletEngine>,
        prefs: Arc<dyn PreferenceStore>,
        wallets: Arc<dyn WalletDirectory>,
        notifier: Arc<dyn Notifier>,
        promoter: Arc<dyn ForegroundPromoter>,
        config: BackgroundSyncConfig,
    ) -> Self {
        Self {
            engine,
            tunnels: TunnelConfigResolver::new(Arc::clone(&prefs)),
            selector: WalletSelector::new(Arc::clone(&prefs), wallets),
            timestamps: SyncTimestamps::new(prefs),
            notifier,
            promoter,
            config,
            state: Mutex::new(ExecutorState::Idle),
            logger: Mutex::new(BackgroundSyncLogger::new()),
        }
    }

    /// State of the most recent attempt
    pub fn state(&self) -> ExecutorState {
        *self.state.lock()
    }

    /// Event journal
    pub fn events(&self) -> Vec<BackgroundSyncEvent> {
        self.logger.lock().events()
    }

    /// Last-sync bookkeeping
    pub fn timestamps(&self) -> &SyncTimestamps {
        &self.timestamps
    }

    /// Run one attempt.
    ///
    /// Engine failures become [`AttemptOutcome::Retrying`] or
    /// [`AttemptOutcome::Failed`]; `Err` is reserved for cancellation and for
    /// having no wallet to sync.
    pub async fn execute(
        &self,
        request: &SyncRequest,
        cancel: &CancelToken,
    ) -> Result<AttemptOutcome> {
        let spec = &request.spec;
        let mode = spec.sync_mode;

        self.set_state(ExecutorState::Resolving);
        let tunnel = self.tunnels.resolve();
        self.logger
            .lock()
            .log_tunnel(tunnel.mode, tunnel.is_privacy_preserving());

        let target = match self.selector.select(Utc::now().timestamp()) {
            Ok(target) => target,
            Err(e) => {
                self.set_state(ExecutorState::Idle);
                return Err(e);
            }
        };
        self.logger
            .lock()
            .log_started(mode, target.wallet_id(), request.attempt);

        if cancel.is_cancelled() {
            return self.cancelled(request.attempt);
        }

        self.set_state(ExecutorState::Running);
        self.maybe_promote(request);

        let engine_request = Self::engine_request(spec, &target, &tunnel);
        let started = Instant::now();
        let Some(reply) = self.run_engine(&engine_request, cancel).await else {
            return self.cancelled(request.attempt);
        };

        if let WalletTarget::RoundRobin(id) = &target {
            self.selector.advance(id);
        }

        let outcome = match reply {
            Ok(response) => {
                let duration_secs = started.elapsed().as_secs();
                let result = self.on_success(&engine_request, response, duration_secs);
                AttemptOutcome::Succeeded(result)
            }
            Err(error) => self.on_failure(&error, request.attempt),
        };
        self.set_state(outcome.state());
        Ok(outcome)
    }

    fn set_state(&self, state: ExecutorState) {
        *self.state.lock() = state;
    }

    fn engine_request(
        spec: &WorkSpec,
        target: &WalletTarget,
        tunnel: &TunnelConfig,
    ) -> EngineRequest {
        EngineRequest {
            wallet_id: target.wallet_id().map(str::to_string),
            mode: spec.sync_mode,
            max_duration_secs: spec.max_duration_secs,
            max_blocks: spec.max_blocks,
            use_round_robin: target.is_round_robin(),
            tunnel_mode: tunnel.mode,
            proxy_url: tunnel.proxy_url.clone(),
        }
    }

    fn maybe_promote(&self, request: &SyncRequest) {
        let spec = &request.spec;
        if !needs_promotion(
            spec.max_duration_secs,
            request.attempt,
            spec.sync_mode,
            self.config.foreground_threshold_secs,
        ) {
            return;
        }
        match self
            .promoter
            .promote(&Notification::sync_in_progress(spec.sync_mode))
        {
            Ok(()) => debug!("Promoted {} sync to foreground", spec.name),
            Err(e) => warn!("{}; continuing as background work", e),
        }
    }

    /// `None` when cancelled, while opening or while running. The session is
    /// released before returning.
    async fn run_engine(
        &self,
        request: &EngineRequest,
        cancel: &CancelToken,
    ) -> Option<std::result::Result<EngineResponse, EngineError>> {
        let mut session = match cancel
            .run_until_cancelled(self.engine.open_session(request))
            .await?
        {
            Ok(session) => SessionGuard::new(session),
            Err(e) => return Some(Err(e)),
        };
        let reply = cancel.run_until_cancelled(session.run()).await;
        session.release().await;
        reply
    }

    fn on_success(
        &self,
        request: &EngineRequest,
        response: EngineResponse,
        duration_secs: u64,
    ) -> SyncResult {
        for error in &response.errors {
            warn!("Background sync non-fatal error: {}", error);
        }
        if let Err(e) = self.timestamps.record_success(request.mode, Utc::now()) {
            warn!("Failed to record last {} sync: {}", request.mode, e);
        }
        self.logger.lock().log_completed(
            response.blocks_synced,
            duration_secs,
            response.new_transactions,
        );

        if response.new_transactions > 0 && self.config.notify_on_receive {
            let notification = Notification::transactions_received(
                response.new_transactions,
                response.new_balance,
            );
            self.post(&notification, response.new_transactions);
        }

        SyncResult {
            wallet_id: request.wallet_id.clone(),
            mode: request.mode,
            blocks_synced: response.blocks_synced,
            duration_secs,
            new_transactions: response.new_transactions,
            new_balance: response.new_balance,
            tunnel_used: response.tunnel_used,
            errors: response.errors,
        }
    }

    fn on_failure(&self, error: &EngineError, attempt: u32) -> AttemptOutcome {
        let classified = classify_engine_error(error);
        let category = classified.category;

        if category.allows_retry(attempt) {
            self.logger.lock().log_retry(category, attempt);
            return AttemptOutcome::Retrying(classified);
        }

        self.logger
            .lock()
            .log_failed(category, &classified.message, attempt);
        self.post(&Notification::sync_failed(category), 0);
        AttemptOutcome::Failed(FailurePayload {
            error: category,
            message: classified.message,
        })
    }

    fn post(&self, notification: &Notification, transaction_count: u32) {
        match self.notifier.notify(notification) {
            Ok(()) => self
                .logger
                .lock()
                .log_notification(notification.channel, transaction_count),
            Err(e) => warn!("Failed to show notification: {}", e),
        }
    }

    fn cancelled(&self, attempt: u32) -> Result<AttemptOutcome> {
        info!("Background sync attempt {} cancelled", attempt);
        self.logger.lock().log_cancelled(attempt);
        self.set_state(ExecutorState::Idle);
        Err(Error::Cancelled)
    }
}

/// Engine session that is released even if the attempt future is dropped
struct SessionGuard {
    session: Option<BoxedSession>,
}

impl SessionGuard {
    fn new(session: BoxedSession) -> Self {
        Self {
            session: Some(session),
        }
    }

    async fn run(&mut self) -> std::result::Result<EngineResponse, EngineError> {
        match self.session.as_mut() {
            Some(session) => session.run().await,
            None => Err(EngineError::new("SESSION_RELEASED", "session already released")),
        }
    }

    async fn release(mut self) {
        if let Some(session) = self.session.take() {
            session.release().await;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Attempt dropped mid-run; releasing engine session in the background");
                handle.spawn(async move { session.release().await });
            }
            Err(_) => warn!("Engine session dropped outside a runtime; not released"),
        }
    }
}
