//! # Error Types
//!
//! Domain errors for curfew-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          CoreError                                      │
//! │                                                                         │
//! │  ┌─────────────────────────┐  ┌─────────────────────────────────────┐  │
//! │  │   Catalogue Errors      │  │   Input Errors                      │  │
//! │  │  • UnknownEntity        │  │  • InvalidDay                       │  │
//! │  │  • NotCommandable       │  │  • InvalidTime                      │  │
//! │  │                         │  │  • InvalidPayload                   │  │
//! │  └─────────────────────────┘  │  • InvalidBundle                    │  │
//! │                               │  • Validation(ValidationError)      │  │
//! │                               └─────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error Type
// =============================================================================

/// Errors raised by pure domain operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Weekday name could not be parsed.
    #[error("Invalid day name: '{0}'")]
    InvalidDay(String),

    /// Time of day was not `HH:MM`.
    #[error("Invalid time '{0}': expected HH:MM")]
    InvalidTime(String),

    /// No entity with this object id exists in the catalogue.
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// The entity is read-only or handled outside the desired state.
    #[error("Entity {0} does not accept commands")]
    NotCommandable(String),

    /// Command payload did not match the entity's value domain.
    #[error("Invalid payload '{payload}' for {entity}: {reason}")]
    InvalidPayload {
        entity: String,
        payload: String,
        reason: String,
    },

    /// Storage-state document could not be parsed or rendered.
    #[error("Invalid auth bundle: {0}")]
    InvalidBundle(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Range and shape violations found while validating configuration-level
/// values such as the minute grid.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    #[error("{field} must be positive")]
    MustBePositive { field: String },

    #[error("{field} must be a multiple of {step}")]
    OffGrid { field: String, step: u32 },
}

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
