//! # curfew-sync: Sync Engine for the Curfew Bridge
//!
//! Keeps a parental-controls dashboard and a home-automation bus in
//! agreement: dashboard state is published as bus entities, and bus
//! commands become dashboard writes.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Daemon Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                     SyncDaemon (scheduling loop)                 │  │
//! │  │                                                                  │  │
//! │  │  Timer every 300s • debounced bus commands • one pass at a time  │  │
//! │  └──────────┬───────────────────────┬───────────────────────▲──────┘  │
//! │             │                       │                       │          │
//! │             ▼                       ▼                       │          │
//! │  ┌────────────────────┐  ┌────────────────────┐  ┌──────────┴───────┐  │
//! │  │ DashboardGateway   │  │ reconcile()        │  │ CommandListener  │  │
//! │  │                    │  │ (curfew-core)      │  │                  │  │
//! │  │ timeout, backoff,  │  │                    │  │ bus command ──►  │  │
//! │  │ single auth retry  │  │ remote vs desired  │  │ DesiredState     │  │
//! │  └─────────┬──────────┘  └────────────────────┘  └──────────────────┘  │
//! │            ▼                                                            │
//! │  ┌────────────────────┐  ┌────────────────────┐                         │
//! │  │ SessionManager     │─►│ AuthStore          │◄── manual upload        │
//! │  │ single-flight      │  │ auth.json, atomic  │                         │
//! │  │ refresh            │  │ replace, versioned │                         │
//! │  └────────────────────┘  └────────────────────┘                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - TOML configuration with `CURFEW_*` overrides
//! - [`error`] - Sync error types and categories
//! - [`store`] - Auth bundle persistence
//! - [`client`] - Dashboard client contract
//! - [`session`] - Freshness checks and refresh
//! - [`gateway`] - Retry policy around the client
//! - [`bus`] - Bus contract, entity naming, discovery documents
//! - [`inbound`] - Bus commands into desired state
//! - [`children`] - Child profile resolution
//! - [`daemon`] - The scheduling loop
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use curfew_sync::{BridgeConfig, FileAuthStore, SyncDaemon};
//!
//! curfew_sync::init_tracing("info,curfew=debug");
//!
//! let config = BridgeConfig::load_or_default(None);
//! let store = Arc::new(FileAuthStore::new(config.bundle_path().unwrap_or_else(|| "auth.json".into())));
//! let daemon = SyncDaemon::new(config, store, dashboard_client, mqtt_bus)?;
//! let handle = daemon.start().await?;
//!
//! // later
//! handle.shutdown().await?;
//! ```

use tracing_subscriber::EnvFilter;

// =============================================================================
// Module Declarations
// =============================================================================

pub mod bus;
pub mod children;
pub mod client;
pub mod config;
pub mod daemon;
pub mod error;
pub mod gateway;
pub mod inbound;
pub mod session;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use bus::{Announcement, Bus, BusCommand, EntityNaming, MemoryBus};
pub use client::{ClientError, ClientResult, DashboardClient};
pub use config::BridgeConfig;
pub use daemon::{DaemonState, DegradedReason, PassReport, SyncDaemon, SyncDaemonHandle, SyncStatus};
pub use error::{SyncError, SyncResult};
pub use gateway::{DashboardGateway, RetryPolicy};
pub use inbound::{CommandListener, CommandOutcome, LocalControls};
pub use session::{SessionManager, SessionStatus, UsableSession};
pub use store::{AuthStore, BundleVersion, FileAuthStore, MemoryAuthStore, StoredBundle};

/// Installs a global fmt subscriber.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=curfew_sync=trace` - Trace the sync engine only
/// - Default: `default_filter`
///
/// Does nothing if a subscriber is already installed.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
