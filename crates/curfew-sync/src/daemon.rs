//! # Sync Daemon
//!
//! The scheduling loop. Runs a full pass on a timer and, debounced, after
//! inbound bus commands. Only one pass runs at a time.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │            timer tick / debounced command / sync_now()                  │
//! │   ┌──────┐ ─────────────────────────────────────────► ┌─────────┐       │
//! │   │ Idle │                                            │ Syncing │       │
//! │   └──────┘ ◄───────────────── pass succeeded ──────── └────┬────┘       │
//! │      ▲                                                     │            │
//! │      │ new bundle in store                                 │            │
//! │      │ / read succeeds                                     ▼            │
//! │   ┌──────────────────────────────┐   AuthExpired, no refresh path       │
//! │   │ Degraded(AuthExpired)        │ ◄────────────────────────┤           │
//! │   │ Degraded(Unreachable)        │ ◄── N transient passes ──┘           │
//! │   └──────────────────────────────┘                                      │
//! │                                                                         │
//! │   Degraded still publishes cached usage and health; AuthExpired also    │
//! │   suppresses every dashboard call until the store version changes.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## One Pass
//! ```text
//! ensure_usable ─► resolve child ─► fetch_state ─► reconcile
//!      ─► confirm satisfied entries ─► dispatch mutations ─► publish state
//! ```
//!
//! Commands that arrive during a pass land in `DesiredState` and leave a
//! single wake-up permit behind, so exactly one more pass follows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use curfew_core::{
    reconcile, usage_publications, ChildProfile, DesiredState, DeviceBlockState, EntityId,
    MinuteGrid, Pending, PlannedMutation, Publication, RemoteMutation, RemoteState, StateValue,
    MAX_UNCONFIRMED_DISPATCHES,
};
use serde_json::json;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::bus::{Bus, EntityNaming};
use crate::children::ChildResolver;
use crate::client::DashboardClient;
use crate::config::BridgeConfig;
use crate::error::{SyncError, SyncResult};
use crate::gateway::{DashboardGateway, RetryPolicy};
use crate::inbound::{CommandListener, LocalControls};
use crate::session::SessionManager;
use crate::store::{AuthStore, BundleVersion};

/// A burst of commands extends the debounce wait at most this many times.
const MAX_DEBOUNCE_WINDOWS: u32 = 5;

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedReason {
    AuthExpired,
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Idle,
    Syncing,
    Degraded(DegradedReason),
}

impl DaemonState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonState::Idle => "idle",
            DaemonState::Syncing => "syncing",
            DaemonState::Degraded(DegradedReason::AuthExpired) => "degraded_auth_expired",
            DaemonState::Degraded(DegradedReason::Unreachable) => "degraded_unreachable",
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, DaemonState::Degraded(_))
    }
}

/// Current daemon status for external queries.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub state: DaemonState,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Failed passes since the last success.
    pub consecutive_failures: u32,
    pub passes: u64,
    pub child: Option<ChildProfile>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus {
            state: DaemonState::Idle,
            last_success: None,
            last_error: None,
            consecutive_failures: 0,
            passes: 0,
            child: None,
        }
    }
}

impl SyncStatus {
    pub fn seconds_since_last_success(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_success.map(|at| (now - at).num_seconds().max(0))
    }
}

/// What one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub dispatched: usize,
    pub confirmed: usize,
    pub abandoned: usize,
    pub published: usize,
    /// Dashboard calls were suppressed while degraded.
    pub suppressed: bool,
}

// =============================================================================
// Pass State
// =============================================================================

/// Owned by whichever pass holds the lock.
struct PassState {
    children: ChildResolver,
    last_remote: Option<RemoteState>,
    /// Last block we set, for clients that do not report block state.
    local_block: DeviceBlockState,
    /// Store version that was current when auth degraded.
    degraded_at: Option<BundleVersion>,
    transient_failures: u32,
}

// =============================================================================
// Sync Daemon
// =============================================================================

struct DaemonInner {
    config: BridgeConfig,
    naming: EntityNaming,
    grid: MinuteGrid,
    gateway: DashboardGateway,
    bus: Arc<dyn Bus>,
    desired: Arc<Mutex<DesiredState>>,
    controls: Arc<LocalControls>,
    /// Debounced wake-up from the command listener.
    trigger: Arc<Notify>,
    /// Immediate wake-up from `sync_now`.
    manual: Notify,
    status: RwLock<SyncStatus>,
    pass: Mutex<PassState>,
}

#[derive(Clone)]
pub struct SyncDaemon {
    inner: Arc<DaemonInner>,
}

impl SyncDaemon {
    /// Validates the configuration and wires the components together.
    pub fn new(
        config: BridgeConfig,
        store: Arc<dyn AuthStore>,
        client: Arc<dyn DashboardClient>,
        bus: Arc<dyn Bus>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let grid = config.grid();
        let session = Arc::new(SessionManager::new(
            store,
            client.clone(),
            config.auth_policy(),
            config.login_timeout(),
        ));
        let gateway =
            DashboardGateway::new(client, session, RetryPolicy::from_config(&config), grid);

        let pass = PassState {
            children: ChildResolver::new(
                config.child.clone(),
                config.sync.child_stale_after_failures,
            ),
            last_remote: None,
            local_block: DeviceBlockState::unblocked(),
            degraded_at: None,
            transient_failures: 0,
        };

        Ok(Self {
            inner: Arc::new(DaemonInner {
                naming: EntityNaming::from_config(&config),
                grid,
                gateway,
                bus,
                desired: Arc::new(Mutex::new(DesiredState::new())),
                controls: Arc::new(LocalControls::default()),
                trigger: Arc::new(Notify::new()),
                manual: Notify::new(),
                status: RwLock::new(SyncStatus::default()),
                pass: Mutex::new(pass),
                config,
            }),
        })
    }

    pub fn naming(&self) -> &EntityNaming {
        &self.inner.naming
    }

    pub fn desired(&self) -> &Arc<Mutex<DesiredState>> {
        &self.inner.desired
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        self.inner.gateway.session()
    }

    pub async fn status(&self) -> SyncStatus {
        self.inner.status.read().await.clone()
    }

    /// A listener feeding this daemon's desired state.
    pub fn listener(&self) -> CommandListener {
        CommandListener::new(
            self.inner.naming.clone(),
            self.inner.bus.clone(),
            self.inner.desired.clone(),
            self.inner.controls.clone(),
            self.inner.trigger.clone(),
        )
    }

    /// Announces every entity and publishes bridge-local defaults.
    pub async fn announce(&self) -> SyncResult<()> {
        let inner = &self.inner;
        for entity in EntityId::all() {
            inner
                .bus
                .announce(&inner.naming.announcement(&entity, &inner.grid))
                .await?;
        }
        inner
            .bus
            .publish(
                &inner.naming.unique_id(&EntityId::BlockDuration),
                &StateValue::Number(inner.controls.block_duration_minutes()).to_payload(),
                true,
            )
            .await?;
        info!(
            child = %inner.naming.child_slug,
            entities = EntityId::all().len(),
            "Entities announced"
        );
        Ok(())
    }

    /// Announces, subscribes, and spawns the listener and the loop. The
    /// first pass runs immediately.
    pub async fn start(&self) -> SyncResult<SyncDaemonHandle> {
        self.announce().await?;

        let unique_ids = EntityId::all()
            .iter()
            .filter(|e| e.is_commandable())
            .map(|e| self.inner.naming.unique_id(e))
            .collect();
        let commands = self.inner.bus.subscribe(unique_ids).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let listener = tokio::spawn(self.listener().run(commands, shutdown_rx.clone()));
        let daemon = self.clone();
        let scheduler = tokio::spawn(async move { daemon.run_loop(shutdown_rx).await });

        info!(
            interval_secs = self.inner.config.sync.interval_secs,
            debounce_ms = self.inner.config.sync.debounce_ms,
            "Sync daemon started"
        );

        Ok(SyncDaemonHandle {
            daemon: self.clone(),
            shutdown_tx,
            tasks: vec![listener, scheduler],
        })
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    async fn run_loop(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.inner.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("Periodic sync");
                }

                _ = self.inner.manual.notified() => {
                    debug!("Manual sync requested");
                }

                _ = self.inner.trigger.notified() => {
                    if !self.debounce(&mut shutdown).await {
                        break;
                    }
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }

            if *shutdown.borrow() {
                break;
            }

            // Not cancellable: shutdown waits for the pass to finish.
            if let Err(e) = self.sync_once().await {
                debug!(error = %e, "Sync pass ended with error");
            }
        }

        info!("Sync daemon stopped");
    }

    /// Waits until no command arrived for one debounce window. Returns
    /// `false` on shutdown.
    async fn debounce(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let window = self.inner.config.debounce();
        let mut extensions = 0;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(window) => return true,

                _ = self.inner.trigger.notified() => {
                    extensions += 1;
                    if extensions >= MAX_DEBOUNCE_WINDOWS {
                        debug!(extensions, "Debounce cap reached");
                        return true;
                    }
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return false;
                    }
                }
            }
        }
    }

    // =========================================================================
    // Pass
    // =========================================================================

    /// Runs one pass now, waiting for any in-flight pass first.
    pub async fn sync_once(&self) -> SyncResult<PassReport> {
        let pass_id = Uuid::new_v4();
        self.pass()
            .instrument(info_span!("sync_pass", %pass_id))
            .await
    }

    async fn pass(&self) -> SyncResult<PassReport> {
        let inner = &self.inner;
        let mut state = inner.pass.lock().await;
        let store = inner.gateway.session().store().clone();

        if let Some(degraded_at) = state.degraded_at {
            if store.version().await? == degraded_at {
                debug!("Auth bundle unchanged, staying degraded");
                let published = self.publish_cached(&state).await;
                self.publish_health().await;
                return Ok(PassReport {
                    published,
                    suppressed: true,
                    ..PassReport::default()
                });
            }
            info!("New auth bundle detected, resuming sync");
            state.degraded_at = None;
        }

        let previous = {
            let mut status = inner.status.write().await;
            let previous = status.state;
            status.state = DaemonState::Syncing;
            status.passes += 1;
            previous
        };

        let result = self.attempt(&mut state).await;

        match &result {
            Ok(report) => {
                state.transient_failures = 0;
                state.children.record_success();
                let mut status = inner.status.write().await;
                if previous.is_degraded() {
                    info!(previous = previous.as_str(), "Left degraded mode");
                }
                status.state = DaemonState::Idle;
                status.last_success = Some(Utc::now());
                status.last_error = None;
                status.consecutive_failures = 0;
                status.child = state.children.current().cloned();
                info!(
                    dispatched = report.dispatched,
                    confirmed = report.confirmed,
                    abandoned = report.abandoned,
                    published = report.published,
                    "Sync pass complete"
                );
            }
            Err(e) => {
                let next = if e.is_auth_error() {
                    state.degraded_at = match inner.gateway.session().failed_refresh().await {
                        Some(version) => Some(version),
                        None => match store.version().await {
                            Ok(version) => Some(version),
                            Err(read) => {
                                warn!(
                                    error = %read,
                                    "Could not read auth bundle version, retrying next tick"
                                );
                                None
                            }
                        },
                    };
                    error!(
                        error = %e,
                        "Session expired and could not be refreshed; upload a fresh auth bundle"
                    );
                    DaemonState::Degraded(DegradedReason::AuthExpired)
                } else if e.is_transient() {
                    state.transient_failures += 1;
                    state.children.record_failure();
                    let threshold = inner.config.sync.unreachable_ticks_before_degraded;
                    if state.transient_failures >= threshold {
                        warn!(
                            failures = state.transient_failures,
                            error = %e,
                            "Dashboard unreachable, degraded"
                        );
                        DaemonState::Degraded(DegradedReason::Unreachable)
                    } else {
                        warn!(failures = state.transient_failures, error = %e, "Sync pass failed");
                        previous_or_idle(previous)
                    }
                } else {
                    state.children.record_failure();
                    warn!(error = %e, "Sync pass failed");
                    previous_or_idle(previous)
                };

                let mut status = inner.status.write().await;
                status.state = next;
                status.last_error = Some(e.to_string());
                status.consecutive_failures += 1;
                drop(status);

                self.publish_cached(&state).await;
            }
        }

        self.publish_health().await;
        result
    }

    async fn attempt(&self, state: &mut PassState) -> SyncResult<PassReport> {
        let inner = &self.inner;
        let mut report = PassReport::default();

        inner.gateway.session().clear_failed_refresh().await;
        let session = inner.gateway.session().ensure_usable().await?;
        let child = state
            .children
            .resolve(&inner.gateway, session.version)
            .await?;

        let mut remote = inner.gateway.fetch_state(&child.id).await?;
        let now = Utc::now();
        if remote.block.is_none() {
            remote.block = Some(state.local_block.effective_at(now));
        }
        state.last_remote = Some(remote.clone());

        let planned = {
            let mut desired = inner.desired.lock().await;
            let plan = reconcile(&remote, &desired, &inner.grid, now);
            for pending in &plan.confirmations {
                if desired.confirm(&pending.target, pending.sequence) {
                    debug!(target = ?pending.target, sequence = pending.sequence, "Confirmed by remote");
                    report.confirmed += 1;
                }
            }
            let mut planned = Vec::with_capacity(plan.remote_mutations.len());
            for mutation in plan.remote_mutations {
                let (exhausted, live): (Vec<Pending>, Vec<Pending>) =
                    mutation.satisfies.into_iter().partition(|p| {
                        desired.get(&p.target).is_some_and(|e| {
                            e.sequence == p.sequence
                                && e.dispatch_count >= MAX_UNCONFIRMED_DISPATCHES
                        })
                    });
                for pending in &exhausted {
                    warn!(
                        target = ?pending.target,
                        sequence = pending.sequence,
                        "Remote never confirmed the write, giving up"
                    );
                    desired.abandon(&pending.target, pending.sequence);
                    report.abandoned += 1;
                }
                if !live.is_empty() {
                    planned.push(PlannedMutation {
                        mutation: mutation.mutation,
                        satisfies: live,
                    });
                }
            }
            planned
        };

        for planned in planned {
            match inner.gateway.apply(&child.id, &planned.mutation).await {
                Ok(()) => {
                    report.dispatched += 1;
                    debug!(mutation = ?planned.mutation, "Mutation dispatched");
                    let mut desired = inner.desired.lock().await;
                    for pending in &planned.satisfies {
                        desired.record_dispatch(&pending.target, pending.sequence);
                    }
                    if let RemoteMutation::SetBlock { duration_secs } = planned.mutation {
                        state.local_block = match duration_secs {
                            Some(secs) => DeviceBlockState::blocked_for(Utc::now(), secs),
                            None => DeviceBlockState::unblocked(),
                        };
                    }
                }
                Err(e) if e.is_data_error() => {
                    warn!(mutation = ?planned.mutation, error = %e, "Dashboard rejected mutation, dropping it");
                    let mut desired = inner.desired.lock().await;
                    for pending in &planned.satisfies {
                        if desired.abandon(&pending.target, pending.sequence) {
                            report.abandoned += 1;
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }

        // Pending entries stay authoritative on the bus until a read
        // confirms them.
        let publications = {
            let desired = inner.desired.lock().await;
            reconcile(&remote, &desired, &inner.grid, Utc::now()).bus_publications
        };
        report.published = self.publish_all(&publications).await;
        Ok(report)
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    async fn publish_all(&self, publications: &[Publication]) -> usize {
        let mut published = 0;
        for publication in publications {
            let unique_id = self.inner.naming.unique_id(&publication.entity);
            match self
                .inner
                .bus
                .publish(&unique_id, &publication.value.to_payload(), true)
                .await
            {
                Ok(()) => published += 1,
                Err(e) => warn!(%unique_id, error = %e, "Bus publish failed"),
            }
        }
        published
    }

    async fn publish_cached(&self, state: &PassState) -> usize {
        match &state.last_remote {
            Some(remote) => self.publish_all(&usage_publications(&remote.usage)).await,
            None => 0,
        }
    }

    async fn publish_health(&self) {
        let status = self.status().await;
        let session = self.session().status().await.ok();
        let now = Utc::now();

        let doc = json!({
            "state": status.state.as_str(),
            "seconds_since_last_sync": status.seconds_since_last_success(now),
            "last_success": status.last_success,
            "last_error": status.last_error,
            "consecutive_failures": status.consecutive_failures,
            "child": status.child.as_ref().map(|c| c.name.clone()),
            "session": session.as_ref().map(|s| json!({
                "freshness": s.freshness.label(),
                "expires_at": s.earliest_expiry,
                "refresh_pending": s.refresh_pending,
                "refresh_failures": s.consecutive_refresh_failures,
                "artifacts": s.artifacts,
            })),
        });

        self.publish_all(&[Publication::new(EntityId::Health, StateValue::Json(doc))])
            .await;
    }
}

fn previous_or_idle(previous: DaemonState) -> DaemonState {
    match previous {
        DaemonState::Degraded(DegradedReason::Unreachable) => previous,
        _ => DaemonState::Idle,
    }
}

// =============================================================================
// Daemon Handle
// =============================================================================

/// Controls a started daemon.
pub struct SyncDaemonHandle {
    daemon: SyncDaemon,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncDaemonHandle {
    pub async fn status(&self) -> SyncStatus {
        self.daemon.status().await
    }

    /// Requests a pass without waiting for the debounce window.
    pub fn sync_now(&self) {
        self.daemon.inner.manual.notify_one();
    }

    pub fn daemon(&self) -> &SyncDaemon {
        &self.daemon
    }

    /// Stops the timer, debounce wait and listener. An in-flight pass
    /// finishes first.
    pub async fn shutdown(self) -> SyncResult<()> {
        info!("Sync daemon shutting down");
        self.shutdown_tx
            .send(true)
            .map_err(|_| SyncError::ChannelError("Shutdown channel closed".into()))?;
        for task in self.tasks {
            task.await
                .map_err(|e| SyncError::Internal(format!("daemon task failed: {e}")))?;
        }
        Ok(())
    }
}
