//! # Session Manager
//!
//! Owns bundle freshness: decides when to refresh, makes sure only one
//! refresh runs at a time, and degrades gracefully when refresh fails.
//!
//! ## Refresh Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ensure_usable()                                                        │
//! │     │                                                                   │
//! │     ├── Fresh ───────────────────────────────────────► UsableSession    │
//! │     │                                                                   │
//! │     ├── RefreshDue, refresh of this version already failed ──► pending  │
//! │     │                                                                   │
//! │     └── RefreshDue / Expired / Incomplete                               │
//! │            │                                                            │
//! │            ▼  refresh lock (single flight)                              │
//! │     ┌─────────────────────────────┐                                     │
//! │     │ another caller finished an  │── yes ──► reuse its outcome         │
//! │     │ attempt while we waited?    │                                     │
//! │     └──────────────┬──────────────┘                                     │
//! │                    │ no                                                 │
//! │                    ▼                                                    │
//! │            client.login(bundle) ──► store.replace() ──► Fresh           │
//! │                    │ failure                                            │
//! │                    ▼                                                    │
//! │     prior bundle still valid? ── yes ──► usable, refresh pending (warn) │
//! │                    │ no                                                 │
//! │                    ▼                                                    │
//! │               AuthExpired                                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use curfew_core::{ArtifactExpiry, AuthArtifactBundle, AuthPolicy, Freshness};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::DashboardClient;
use crate::error::{SyncError, SyncResult};
use crate::store::{AuthStore, BundleVersion, StoredBundle};

/// A bundle snapshot cleared for use.
#[derive(Debug, Clone)]
pub struct UsableSession {
    pub bundle: Arc<AuthArtifactBundle>,
    pub version: BundleVersion,
    /// Refresh failed but the bundle has not expired yet.
    pub refresh_pending: bool,
}

impl UsableSession {
    fn from_stored(stored: StoredBundle, refresh_pending: bool) -> Self {
        Self {
            bundle: stored.bundle,
            version: stored.version,
            refresh_pending,
        }
    }
}

/// Snapshot reported on the health entity.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub freshness: Freshness,
    pub earliest_expiry: Option<DateTime<Utc>>,
    pub consecutive_refresh_failures: u32,
    pub refresh_pending: bool,
    pub bundle_version: BundleVersion,
    pub artifacts: Vec<ArtifactExpiry>,
}

type RefreshOutcome = Result<StoredBundle, String>;

pub struct SessionManager {
    store: Arc<dyn AuthStore>,
    client: Arc<dyn DashboardClient>,
    policy: AuthPolicy,
    login_timeout: Duration,
    /// Held for the whole refresh; stores the latest outcome for waiters.
    refresh: Mutex<Option<RefreshOutcome>>,
    /// Completed refresh attempts.
    attempts: AtomicU64,
    consecutive_failures: AtomicU32,
    refresh_pending: AtomicBool,
    /// Version whose refresh last failed. Cleared on success or by the caller.
    failed_refresh: Mutex<Option<BundleVersion>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn AuthStore>,
        client: Arc<dyn DashboardClient>,
        policy: AuthPolicy,
        login_timeout: Duration,
    ) -> Self {
        Self {
            store,
            client,
            policy,
            login_timeout,
            refresh: Mutex::new(None),
            attempts: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            refresh_pending: AtomicBool::new(false),
            failed_refresh: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn AuthStore> {
        &self.store
    }

    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    /// Returns a usable session, refreshing first when inside the margin.
    ///
    /// Fails with `AuthExpired` only when refresh failed and the stored
    /// bundle is already expired or incomplete.
    pub async fn ensure_usable(&self) -> SyncResult<UsableSession> {
        let current = self.store.load().await?;
        let freshness = current.bundle.freshness(&self.policy, Utc::now());
        if freshness.is_usable() {
            return Ok(UsableSession::from_stored(current, false));
        }

        if freshness.is_valid() && *self.failed_refresh.lock().await == Some(current.version) {
            debug!("Refresh already failed for this bundle, using it as is");
            return Ok(UsableSession::from_stored(current, true));
        }

        debug!(freshness = freshness.label(), "Session needs refresh");
        match self.refresh(current.version, false).await {
            Ok(refreshed) => Ok(UsableSession::from_stored(refreshed, false)),
            Err(reason) => self.fall_back(reason).await,
        }
    }

    /// Refreshes after the dashboard rejected the bundle at `rejected`.
    /// A bundle written by someone else since then is used as is.
    pub async fn force_refresh(&self, rejected: BundleVersion) -> SyncResult<UsableSession> {
        self.refresh(rejected, true)
            .await
            .map(|stored| UsableSession::from_stored(stored, false))
            .map_err(SyncError::AuthExpired)
    }

    /// Allows the next `ensure_usable` to retry a refresh that failed
    /// for the current bundle. Called once per tick.
    pub async fn clear_failed_refresh(&self) {
        *self.failed_refresh.lock().await = None;
    }

    /// Version of the bundle whose refresh last failed, if any.
    pub async fn failed_refresh(&self) -> Option<BundleVersion> {
        *self.failed_refresh.lock().await
    }

    pub async fn status(&self) -> SyncResult<SessionStatus> {
        let current = self.store.load().await?;
        let now = Utc::now();
        Ok(SessionStatus {
            freshness: current.bundle.freshness(&self.policy, now),
            earliest_expiry: current.bundle.earliest_required_expiry(&self.policy.required),
            consecutive_refresh_failures: self.consecutive_failures.load(Ordering::SeqCst),
            refresh_pending: self.refresh_pending.load(Ordering::SeqCst),
            bundle_version: current.version,
            artifacts: current.bundle.artifact_expiries(&self.policy.required, now),
        })
    }

    async fn fall_back(&self, reason: String) -> SyncResult<UsableSession> {
        let current = self.store.load().await?;
        match current.bundle.freshness(&self.policy, Utc::now()) {
            Freshness::Fresh { .. } => Ok(UsableSession::from_stored(current, false)),
            Freshness::RefreshDue { expires_in } => {
                self.refresh_pending.store(true, Ordering::SeqCst);
                warn!(
                    expires_in_secs = expires_in.num_seconds(),
                    %reason,
                    "Session refresh failed, continuing with current bundle; upload a fresh bundle before it expires"
                );
                Ok(UsableSession::from_stored(current, true))
            }
            Freshness::Expired | Freshness::Incomplete { .. } => Err(SyncError::AuthExpired(reason)),
        }
    }

    async fn refresh(&self, observed: BundleVersion, force: bool) -> RefreshOutcome {
        let seen = self.attempts.load(Ordering::SeqCst);
        let mut last = self.refresh.lock().await;

        if self.attempts.load(Ordering::SeqCst) != seen {
            if let Some(outcome) = last.as_ref() {
                debug!("Reusing outcome of concurrent session refresh");
                return outcome.clone();
            }
        }

        // A writer may have replaced the bundle while we waited.
        let current = self.store.load().await.map_err(|e| e.to_string())?;
        let replaced = current.version != observed;
        if (force && replaced)
            || (!force && current.bundle.freshness(&self.policy, Utc::now()).is_usable())
        {
            debug!("Bundle replaced while waiting, skipping refresh");
            return Ok(current);
        }

        info!(force, "Refreshing dashboard session");
        let outcome = match tokio::time::timeout(
            self.login_timeout,
            self.client.login(current.bundle.clone()),
        )
        .await
        {
            Err(_) => Err(format!(
                "login timed out after {}s",
                self.login_timeout.as_secs()
            )),
            Ok(Err(e)) => Err(format!("login failed: {e}")),
            Ok(Ok(bundle)) => self.install(bundle).await,
        };

        *self.failed_refresh.lock().await = match &outcome {
            Ok(_) => None,
            Err(_) => Some(current.version),
        };
        match &outcome {
            Ok(stored) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                self.refresh_pending.store(false, Ordering::SeqCst);
                info!(
                    earliest_expiry = ?stored.bundle.earliest_required_expiry(&self.policy.required),
                    "Session refreshed"
                );
            }
            Err(reason) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(%reason, failures, "Session refresh failed");
            }
        }

        *last = Some(outcome.clone());
        self.attempts.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    async fn install(&self, bundle: AuthArtifactBundle) -> RefreshOutcome {
        let missing = bundle.missing(&self.policy.required);
        if !missing.is_empty() {
            return Err(format!("login returned a bundle missing {missing:?}"));
        }
        let version = self
            .store
            .replace(bundle.clone())
            .await
            .map_err(|e| format!("storing refreshed bundle: {e}"))?;
        Ok(StoredBundle {
            bundle: Arc::new(bundle),
            version,
        })
    }
}
