//! # Dashboard Client Contract
//!
//! The browser-automation layer that logs in and performs raw dashboard API
//! calls lives outside this crate. The sync layer only sees this trait.
//!
//! Every call receives the session bundle explicitly so the caller controls
//! which snapshot is used; implementations must not cache a bundle across
//! calls.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Weekday;
use curfew_core::{AuthArtifactBundle, ChildProfile, DailySchedule, RemoteState};
use thiserror::Error;

use crate::error::SyncError;

/// Failure tags reported by a client implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The dashboard rejected the session (HTTP 401 or a login redirect).
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("rate limited")]
    RateLimited,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Any other non-2xx response.
    #[error("status {status}: {body}")]
    Status { status: u16, body: String },
}

pub type ClientResult<T> = Result<T, ClientError>;

impl From<ClientError> for SyncError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Unauthenticated | ClientError::Status { status: 401, .. } => {
                SyncError::AuthExpired("dashboard rejected the session".into())
            }
            ClientError::RateLimited | ClientError::Status { status: 429, .. } => {
                SyncError::RateLimited
            }
            ClientError::Malformed(msg) => SyncError::Malformed(msg),
            ClientError::Unreachable(msg) => SyncError::Unreachable(msg),
            ClientError::Status { status, body } => SyncError::RemoteError { status, body },
        }
    }
}

/// Operations the bridge needs from the dashboard.
#[async_trait]
pub trait DashboardClient: Send + Sync {
    /// Performs a login using the current bundle and returns a replacement.
    async fn login(&self, current: Arc<AuthArtifactBundle>) -> ClientResult<AuthArtifactBundle>;

    async fn list_children(&self, session: Arc<AuthArtifactBundle>) -> ClientResult<Vec<ChildProfile>>;

    async fn fetch_state(
        &self,
        session: Arc<AuthArtifactBundle>,
        child_id: &str,
    ) -> ClientResult<RemoteState>;

    async fn set_daily_limit(
        &self,
        session: Arc<AuthArtifactBundle>,
        child_id: &str,
        day: Weekday,
        minutes: u32,
        enabled: bool,
    ) -> ClientResult<()>;

    async fn set_schedule(
        &self,
        session: Arc<AuthArtifactBundle>,
        child_id: &str,
        day: Weekday,
        schedule: DailySchedule,
    ) -> ClientResult<()>;

    /// `None` resumes the device.
    async fn set_block(
        &self,
        session: Arc<AuthArtifactBundle>,
        child_id: &str,
        duration_secs: Option<u32>,
    ) -> ClientResult<()>;
}
