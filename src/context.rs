//! Per-operation context: caller cancellation and the retry budgets.
//!
//! The retry counts and delays here are correctness-relevant constants,
//! not tuning knobs: the conflict backoff bounds how long two writers can
//! starve each other on the shared GCP policy, and the visibility polls
//! bound how long an eventually-consistent principal may lag before a
//! dependent call is attempted.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Initial sleep after a GCP policy save conflict; doubled per retry.
pub const POLICY_CONFLICT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Abort once cumulative conflict backoff would exceed this.
pub const POLICY_CONFLICT_BACKOFF_CEILING: Duration = Duration::from_secs(30);

/// Visibility poll after creating a GCP service account.
pub const SERVICE_ACCOUNT_POLL_ATTEMPTS: u32 = 10;
pub const SERVICE_ACCOUNT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Azure role assignments: fixed-delay retry while the principal
/// propagates through the authorization subsystem.
pub const ROLE_ASSIGNMENT_ATTEMPTS: u32 = 30;
pub const ROLE_ASSIGNMENT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Azure service-principal visibility poll before generating a password
/// credential (application shape).
pub const SERVICE_PRINCIPAL_POLL_ATTEMPTS: u32 = 10;
pub const SERVICE_PRINCIPAL_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Carried through every lifecycle operation. There is no timeout of its
/// own; the caller cancels, and every retry loop observes it both before
/// each re-fetch and during its sleeps.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancel: CancellationToken,
}

impl OpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Fail fast if the caller has already cancelled.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `delay`, returning `Error::Cancelled` early if the
    /// caller cancels mid-sleep.
    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
