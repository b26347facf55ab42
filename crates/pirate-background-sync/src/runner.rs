//! Retry loop around the executor
//!
//! Runs one work spec to a terminal outcome, sleeping between failed
//! attempts according to the backoff policy. Cancellation is honored both
//! inside an attempt and while waiting for the next one.

use crate::cancel::CancelToken;
use crate::config::BackoffPolicy;
use crate::executor::{AttemptOutcome, SyncExecutor, SyncRequest};
use crate::work::WorkSpec;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::info;

/// Drives a work spec through its attempts
pub struct SyncRunner {
    executor: Arc<SyncExecutor>,
    backoff: BackoffPolicy,
}

impl SyncRunner {
    /// Create runner
    pub fn new(executor: Arc<SyncExecutor>, backoff: BackoffPolicy) -> Self {
        Self { executor, backoff }
    }

    /// Executor used for each attempt
    pub fn executor(&self) -> &Arc<SyncExecutor> {
        &self.executor
    }

    /// Run `spec` until it succeeds or fails for good
    pub async fn run(&self, spec: WorkSpec, cancel: &CancelToken) -> Result<AttemptOutcome> {
        let mut attempt = 0;
        loop {
            let request = SyncRequest::new(spec.clone(), attempt);
            match self.executor.execute(&request, cancel).await? {
                AttemptOutcome::Retrying(failure) => {
                    let delay = self.backoff.delay_for(attempt);
                    info!(
                        "{} sync attempt {} failed ({}), retrying in {}s",
                        spec.name,
                        attempt,
                        failure.category,
                        delay.as_secs()
                    );
                    cancel
                        .run_until_cancelled(tokio::time::sleep(delay))
                        .await
                        .ok_or(Error::Cancelled)?;
                    attempt += 1;
                }
                outcome => return Ok(outcome),
            }
        }
    }
}
