//! # Sync Error Types
//!
//! Error types for the session, gateway and daemon.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Auth          │  │     Remote              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  AuthExpired    │  │  RateLimited     retry  │ │
//! │  │  ConfigLoad...  │  │  StoreFailed    │  │  RemoteError 5xx retry  │ │
//! │  │  ConfigSave...  │  │                 │  │  Unreachable     retry  │ │
//! │  └─────────────────┘  └─────────────────┘  │  RemoteError 4xx no     │ │
//! │                                            │  Malformed       no     │ │
//! │  ┌─────────────────┐  ┌─────────────────┐  │  NoChildProfile  no     │ │
//! │  │      Bus        │  │    Internal     │  └─────────────────────────┘ │
//! │  │  BusError       │  │  ChannelError   │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use curfew_core::CoreError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Every failure the sync layer can surface.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid bridge configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Auth Errors
    // =========================================================================
    /// No usable session and no way to refresh one. Clears when a fresh
    /// bundle is written to the store.
    #[error("Session expired: {0}")]
    AuthExpired(String),

    /// The auth store could not be read or written.
    #[error("Auth store error: {0}")]
    StoreFailed(String),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    #[error("Rate limited by dashboard")]
    RateLimited,

    #[error("Dashboard returned {status}: {body}")]
    RemoteError { status: u16, body: String },

    /// Response arrived but could not be understood.
    #[error("Malformed dashboard response: {0}")]
    Malformed(String),

    #[error("Dashboard unreachable: {0}")]
    Unreachable(String),

    #[error("No child profile matches '{0}'")]
    NoChildProfile(String),

    // =========================================================================
    // Bus Errors
    // =========================================================================
    #[error("Bus error: {0}")]
    BusError(String),

    // =========================================================================
    // Domain & Internal Errors
    // =========================================================================
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::StoreFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::StoreFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the gateway should back off and try again.
    ///
    /// ## Retryable Errors
    /// - Unreachable (including timeouts)
    /// - RateLimited
    /// - RemoteError with a 5xx status
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Unreachable(_) | SyncError::RateLimited => true,
            SyncError::RemoteError { status, .. } => (500..600).contains(status),
            _ => false,
        }
    }

    /// Transient failures that count towards `Degraded(Unreachable)`.
    /// Rate limiting is excluded: it never degrades the daemon by itself.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Unreachable(_) => true,
            SyncError::RemoteError { status, .. } => (500..600).contains(status),
            _ => false,
        }
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, SyncError::AuthExpired(_))
    }

    /// Data or contract mismatch: logged, not retried.
    pub fn is_data_error(&self) -> bool {
        match self {
            SyncError::RemoteError { status, .. } => (400..500).contains(status),
            SyncError::Malformed(_) | SyncError::Core(_) => true,
            _ => false,
        }
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Unreachable("timeout".into()).is_retryable());
        assert!(SyncError::RateLimited.is_retryable());
        assert!(SyncError::RemoteError {
            status: 503,
            body: String::new()
        }
        .is_retryable());

        assert!(!SyncError::RemoteError {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!SyncError::Malformed("bad json".into()).is_retryable());
        assert!(!SyncError::AuthExpired("gone".into()).is_retryable());
    }

    #[test]
    fn test_rate_limit_is_not_transient() {
        assert!(!SyncError::RateLimited.is_transient());
        assert!(SyncError::Unreachable("dns".into()).is_transient());
    }

    #[test]
    fn test_data_errors() {
        assert!(SyncError::RemoteError {
            status: 422,
            body: "bad minutes".into()
        }
        .is_data_error());
        assert!(!SyncError::RemoteError {
            status: 502,
            body: String::new()
        }
        .is_data_error());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::RemoteError {
            status: 404,
            body: "no such child".into(),
        };
        assert_eq!(err.to_string(), "Dashboard returned 404: no such child");
        assert!(SyncError::InvalidConfig("x".into()).is_config_error());
    }
}
