//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Utc, Weekday};
use curfew_core::{
    AuthArtifact, AuthArtifactBundle, AuthPolicy, ChildProfile, DailyLimitState, DailySchedule,
    DeviceBlockState, MinuteGrid, RemoteMutation, RemoteState, DEFAULT_REQUIRED_ARTIFACTS,
};
use curfew_sync::{
    BridgeConfig, ClientError, ClientResult, DashboardClient, DashboardGateway, MemoryAuthStore,
    RetryPolicy, SessionManager,
};

// =============================================================================
// Bundles
// =============================================================================

pub fn bundle_expiring_in(after: chrono::Duration) -> AuthArtifactBundle {
    bundle_with_value(after, "v1")
}

pub fn bundle_with_value(after: chrono::Duration, value: &str) -> AuthArtifactBundle {
    let at = Utc::now() + after;
    AuthArtifactBundle::new(
        DEFAULT_REQUIRED_ARTIFACTS
            .iter()
            .map(|name| {
                AuthArtifact::new(*name, value)
                    .with_domain(".dashboard.example")
                    .expiring_at(at)
            })
            .collect(),
    )
}

pub fn fresh_bundle() -> AuthArtifactBundle {
    bundle_expiring_in(chrono::Duration::hours(24))
}

// =============================================================================
// Fake Dashboard
// =============================================================================

/// In-memory dashboard that applies writes to its own state.
pub struct FakeDashboard {
    state: Mutex<RemoteState>,
    children: Vec<ChildProfile>,
    failures: Mutex<VecDeque<ClientError>>,
    hang_next: AtomicUsize,
    block_report: Mutex<Option<DeviceBlockState>>,
    rejected_days: Mutex<Vec<Weekday>>,
    writes: Mutex<Vec<RemoteMutation>>,
    login_fails: AtomicBool,
    login_delay: Mutex<Duration>,
    logins: AtomicUsize,
    calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl FakeDashboard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RemoteState::empty(Utc::now())),
            children: vec![
                ChildProfile::new("c-liam", "Liam"),
                ChildProfile::new("c-emma", "Emma"),
            ],
            failures: Mutex::new(VecDeque::new()),
            hang_next: AtomicUsize::new(0),
            block_report: Mutex::new(None),
            rejected_days: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            login_fails: AtomicBool::new(false),
            login_delay: Mutex::new(Duration::ZERO),
            logins: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_limit(&self, day: Weekday, enabled: bool, minutes: u32) {
        *self.state.lock().unwrap().limits.get_mut(day) =
            DailyLimitState::new(enabled, minutes, Utc::now());
    }

    pub fn limit(&self, day: Weekday) -> DailyLimitState {
        self.state.lock().unwrap().limits.get(day).clone()
    }

    pub fn set_today_minutes(&self, minutes: u32) {
        self.state.lock().unwrap().usage.today_minutes = minutes;
    }

    /// Failures returned by the next data calls, in order.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = ClientError>) {
        self.failures.lock().unwrap().extend(errors);
    }

    /// The next `n` data calls never complete.
    pub fn hang_next(&self, n: usize) {
        self.hang_next.store(n, Ordering::SeqCst);
    }

    /// Overrides the block state reported by `fetch_state`, simulating a
    /// stale read. `None` reports the real state.
    pub fn report_block(&self, block: Option<DeviceBlockState>) {
        *self.block_report.lock().unwrap() = block;
    }

    /// Daily-limit writes for `day` are refused with a 422.
    pub fn reject_limit_writes(&self, day: Weekday) {
        self.rejected_days.lock().unwrap().push(day);
    }

    pub fn fail_logins(&self, fail: bool) {
        self.login_fails.store(fail, Ordering::SeqCst);
    }

    pub fn delay_logins(&self, delay: Duration) {
        *self.login_delay.lock().unwrap() = delay;
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    /// Data calls attempted, failures included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<RemoteMutation> {
        self.writes.lock().unwrap().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }

    async fn begin_call(&self) -> ClientResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let hang = self
            .hang_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let failure = self.failures.lock().unwrap().pop_front();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DashboardClient for FakeDashboard {
    async fn login(&self, _current: Arc<AuthArtifactBundle>) -> ClientResult<AuthArtifactBundle> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        let delay = *self.login_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.login_fails.load(Ordering::SeqCst) {
            return Err(ClientError::Unreachable("login page did not load".into()));
        }
        Ok(bundle_with_value(chrono::Duration::hours(24), "refreshed"))
    }

    async fn list_children(&self, _session: Arc<AuthArtifactBundle>) -> ClientResult<Vec<ChildProfile>> {
        self.begin_call().await?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.children.clone())
    }

    async fn fetch_state(
        &self,
        _session: Arc<AuthArtifactBundle>,
        child_id: &str,
    ) -> ClientResult<RemoteState> {
        self.begin_call().await?;
        if !self.children.iter().any(|c| c.id == child_id) {
            return Err(ClientError::Status {
                status: 404,
                body: format!("unknown child {child_id}"),
            });
        }
        let mut state = self.state.lock().unwrap().clone();
        if let Some(block) = *self.block_report.lock().unwrap() {
            state.block = Some(block);
        }
        state.fetched_at = Utc::now();
        Ok(state)
    }

    async fn set_daily_limit(
        &self,
        _session: Arc<AuthArtifactBundle>,
        _child_id: &str,
        day: Weekday,
        minutes: u32,
        enabled: bool,
    ) -> ClientResult<()> {
        self.begin_call().await?;
        if self.rejected_days.lock().unwrap().contains(&day) {
            return Err(ClientError::Status {
                status: 422,
                body: format!("limit for {day} rejected"),
            });
        }
        self.set_limit(day, enabled, minutes);
        self.writes.lock().unwrap().push(RemoteMutation::SetDailyLimit {
            day,
            minutes,
            enabled,
        });
        Ok(())
    }

    async fn set_schedule(
        &self,
        _session: Arc<AuthArtifactBundle>,
        _child_id: &str,
        day: Weekday,
        schedule: DailySchedule,
    ) -> ClientResult<()> {
        self.begin_call().await?;
        self.state.lock().unwrap().schedules.set(day, schedule);
        self.writes
            .lock()
            .unwrap()
            .push(RemoteMutation::SetSchedule { day, schedule });
        Ok(())
    }

    async fn set_block(
        &self,
        _session: Arc<AuthArtifactBundle>,
        _child_id: &str,
        duration_secs: Option<u32>,
    ) -> ClientResult<()> {
        self.begin_call().await?;
        let block = match duration_secs {
            Some(secs) => DeviceBlockState::blocked_for(Utc::now(), secs),
            None => DeviceBlockState::unblocked(),
        };
        self.state.lock().unwrap().block = Some(block);
        self.writes
            .lock()
            .unwrap()
            .push(RemoteMutation::SetBlock { duration_secs });
        Ok(())
    }
}

// =============================================================================
// Wiring
// =============================================================================

pub fn session(store: Arc<MemoryAuthStore>, client: Arc<FakeDashboard>) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(
        store,
        client,
        AuthPolicy::default(),
        Duration::from_secs(120),
    ))
}

pub fn gateway(store: Arc<MemoryAuthStore>, client: Arc<FakeDashboard>) -> DashboardGateway {
    let session = session(store, client.clone());
    DashboardGateway::new(client, session, RetryPolicy::default(), MinuteGrid::default())
}

pub fn config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.child.name = "Emma".into();
    config
}
