//! # Dashboard Gateway
//!
//! Facade over [`DashboardClient`]: every call obtains a usable session
//! first, runs under a timeout, and follows one retry policy.
//!
//! ## Retry Policy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Failure                      Action                                    │
//! │  ───────────────────────────  ────────────────────────────────────────  │
//! │  Unauthenticated / 401        force refresh, retry exactly once         │
//! │  Unreachable / timeout        backoff 1s, 2s, ... (3 attempts total)    │
//! │  RateLimited / 429            backoff (3 attempts total)                │
//! │  5xx                          backoff (3 attempts total)                │
//! │  4xx / Malformed              surface immediately, never retried        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Mutations always carry the full desired value, and minute values are
//! clamped to the grid here, so a retried or replayed write is harmless.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Weekday;
use curfew_core::{
    AuthArtifactBundle, ChildProfile, DailySchedule, MinuteGrid, RemoteMutation, RemoteState,
};
use tracing::{debug, warn};

use crate::client::{ClientResult, DashboardClient};
use crate::config::BridgeConfig;
use crate::error::{SyncError, SyncResult};
use crate::session::SessionManager;

// =============================================================================
// Retry Policy
// =============================================================================

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts for transient failures, first try included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            max_attempts: config.sync.max_attempts,
            initial_backoff: Duration::from_millis(config.sync.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.sync.max_backoff_ms),
            call_timeout: config.call_timeout(),
        }
    }

    /// Base-2 exponential backoff without jitter or elapsed-time cap; the
    /// attempt cap is counted by the caller.
    fn create_backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.max_backoff,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }
}

// =============================================================================
// Gateway
// =============================================================================

pub struct DashboardGateway {
    client: Arc<dyn DashboardClient>,
    session: Arc<SessionManager>,
    policy: RetryPolicy,
    grid: MinuteGrid,
}

impl DashboardGateway {
    pub fn new(
        client: Arc<dyn DashboardClient>,
        session: Arc<SessionManager>,
        policy: RetryPolicy,
        grid: MinuteGrid,
    ) -> Self {
        Self {
            client,
            session,
            policy,
            grid,
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn grid(&self) -> &MinuteGrid {
        &self.grid
    }

    /// Runs one client operation under the retry policy.
    pub async fn call<T, F, Fut>(&self, operation: &'static str, op: F) -> SyncResult<T>
    where
        F: Fn(Arc<AuthArtifactBundle>) -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let mut backoff = self.policy.create_backoff();
        let mut session = self.session.ensure_usable().await?;
        let mut transient_failures = 0u32;
        let mut auth_retried = false;

        loop {
            let result = match tokio::time::timeout(self.policy.call_timeout, op(session.bundle.clone()))
                .await
            {
                Ok(result) => result.map_err(SyncError::from),
                Err(_) => Err(SyncError::Unreachable(format!(
                    "{operation} timed out after {}s",
                    self.policy.call_timeout.as_secs()
                ))),
            };

            let err = match result {
                Ok(value) => {
                    if transient_failures > 0 || auth_retried {
                        debug!(operation, transient_failures, auth_retried, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.is_auth_error() {
                if auth_retried {
                    warn!(operation, "Session rejected again after refresh");
                    return Err(err);
                }
                auth_retried = true;
                warn!(operation, "Dashboard rejected session, forcing refresh");
                session = self.session.force_refresh(session.version).await?;
                continue;
            }

            if err.is_retryable() {
                transient_failures += 1;
                if transient_failures < self.policy.max_attempts {
                    let delay = backoff.next_backoff().unwrap_or(self.policy.max_backoff);
                    warn!(
                        operation,
                        attempt = transient_failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Dashboard call failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    session = self.session.ensure_usable().await?;
                    continue;
                }
                warn!(operation, attempts = transient_failures, error = %err, "Giving up on dashboard call");
            }

            return Err(err);
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    pub async fn list_children(&self) -> SyncResult<Vec<ChildProfile>> {
        self.call("list_children", |s| self.client.list_children(s))
            .await
    }

    pub async fn fetch_state(&self, child_id: &str) -> SyncResult<RemoteState> {
        self.call("fetch_state", |s| self.client.fetch_state(s, child_id))
            .await
    }

    /// Clamps `minutes` to the grid and sends the full value. Returns what
    /// was sent.
    pub async fn set_daily_limit(
        &self,
        child_id: &str,
        day: Weekday,
        minutes: i64,
        enabled: bool,
    ) -> SyncResult<u32> {
        let sent = self.grid.clamp(minutes);
        if i64::from(sent) != minutes {
            debug!(?day, requested = minutes, sent, "Clamped daily limit to grid");
        }
        self.call("set_daily_limit", |s| {
            self.client.set_daily_limit(s, child_id, day, sent, enabled)
        })
        .await?;
        Ok(sent)
    }

    pub async fn set_schedule(
        &self,
        child_id: &str,
        day: Weekday,
        schedule: DailySchedule,
    ) -> SyncResult<()> {
        self.call("set_schedule", |s| {
            self.client.set_schedule(s, child_id, day, schedule)
        })
        .await
    }

    pub async fn set_block(&self, child_id: &str, duration_secs: Option<u32>) -> SyncResult<()> {
        self.call("set_block", |s| {
            self.client.set_block(s, child_id, duration_secs)
        })
        .await
    }

    /// Dispatches a planned mutation.
    pub async fn apply(&self, child_id: &str, mutation: &RemoteMutation) -> SyncResult<()> {
        match *mutation {
            RemoteMutation::SetDailyLimit {
                day,
                minutes,
                enabled,
            } => self
                .set_daily_limit(child_id, day, i64::from(minutes), enabled)
                .await
                .map(|_| ()),
            RemoteMutation::SetSchedule { day, schedule } => {
                self.set_schedule(child_id, day, schedule).await
            }
            RemoteMutation::SetBlock { duration_secs } => {
                self.set_block(child_id, duration_secs).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_without_jitter() {
        let policy = RetryPolicy::default();
        let mut backoff = policy.create_backoff();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(4)));
    }

    #[test]
    fn test_policy_from_config() {
        let mut config = BridgeConfig::default();
        config.sync.max_attempts = 5;
        config.sync.call_timeout_secs = 10;
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.call_timeout, Duration::from_secs(10));
    }
}
