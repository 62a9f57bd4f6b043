//! # curfew-core: Pure Domain Logic for the Curfew Bridge
//!
//! Everything the bridge decides without touching the outside world: when a
//! session must be refreshed, which minute values the dashboard accepts,
//! which entities exist on the bus, and what to write or publish each tick.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Curfew Bridge Architecture                        │
//! │                                                                         │
//! │  ┌──────────────────────┐                  ┌────────────────────────┐  │
//! │  │ Dashboard (browser)  │                  │ Automation bus         │  │
//! │  └──────────┬───────────┘                  └───────────┬────────────┘  │
//! │             │ DashboardClient                          │ Bus           │
//! │  ┌──────────▼──────────────────────────────────────────▼────────────┐  │
//! │  │                 curfew-sync (session, gateway, daemon)           │  │
//! │  └──────────────────────────────┬────────────────────────────────────┘  │
//! │                                 │                                        │
//! │  ┌──────────────────────────────▼────────────────────────────────────┐  │
//! │  │               ★ curfew-core (THIS CRATE) ★                        │  │
//! │  │                                                                   │  │
//! │  │   ┌─────────┐ ┌──────────┐ ┌──────────┐ ┌─────────┐ ┌──────────┐ │  │
//! │  │   │  auth   │ │validation│ │  entity  │ │ desired │ │reconcile │ │  │
//! │  │   │ Bundle  │ │MinuteGrid│ │ EntityId │ │ Desired │ │ diff +   │ │  │
//! │  │   │Freshness│ │  HH:MM   │ │ payloads │ │  State  │ │ publish  │ │  │
//! │  │   └─────────┘ └──────────┘ └──────────┘ └─────────┘ └──────────┘ │  │
//! │  │                                                                   │  │
//! │  │   NO I/O • NO CLOCK • NO NETWORK • PURE FUNCTIONS                 │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Remote state (limits, schedules, block, usage)
//! - [`auth`] - Auth artifact bundle and freshness
//! - [`validation`] - Minute grid and `HH:MM` parsing
//! - [`entity`] - Bus entity catalogue and payload encoding
//! - [`desired`] - Sequenced desired state
//! - [`reconcile`] - Remote vs desired diff
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use curfew_core::validation::MinuteGrid;
//!
//! let grid = MinuteGrid::default();
//! assert_eq!(grid.clamp(100), 90);
//! assert_eq!(grid.clamp(999), 480);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod auth;
pub mod desired;
pub mod entity;
pub mod error;
pub mod reconcile;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports
// =============================================================================

pub use auth::{
    ArtifactExpiry, AuthArtifact, AuthArtifactBundle, AuthPolicy, Freshness,
    DEFAULT_REQUIRED_ARTIFACTS,
};
pub use desired::{
    expand, ApplyOutcome, BatchOutcome, BlockCommand, Command, DesiredEntry, DesiredState,
    DesiredUpdate, DesiredValue, Target, MAX_UNCONFIRMED_DISPATCHES,
};
pub use entity::{
    BulkGroup, CommandValue, Component, EntityDescriptor, EntityGroup, EntityId, ScheduleBound,
    StateValue, ValueDomain,
};
pub use error::{CoreError, CoreResult, ValidationError};
pub use reconcile::{
    reconcile, usage_publications, Pending, PlannedMutation, Publication, Reconciliation,
    RemoteMutation,
};
pub use types::{
    ChildProfile, DailyLimitState, DailySchedule, DeviceBlockState, RemoteState, UsageSnapshot,
    ViewingEvent, WeekMap, ALL_DAYS,
};
pub use validation::MinuteGrid;
