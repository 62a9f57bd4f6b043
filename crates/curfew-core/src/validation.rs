//! # Validation Module
//!
//! The minute grid and the time-of-day format shared by the entity
//! catalogue, the reconciler and the gateway.
//!
//! ## Minute Grid
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Remote API accepts daily limits only on a 15-minute grid in [0, 480]. │
//! │                                                                         │
//! │   desired  -20 ──► clamp ──►   0 ──► truncate ──►   0                   │
//! │   desired  100 ──► clamp ──► 100 ──► truncate ──►  90                   │
//! │   desired  999 ──► clamp ──► 480 ──► truncate ──► 480                   │
//! │                                                                         │
//! │  Truncation (not rounding) so a value never exceeds what was asked.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{NaiveTime, Timelike};

use crate::error::{CoreError, CoreResult, ValidationError};

// =============================================================================
// Constants
// =============================================================================

/// Default grid step for daily limits, in minutes.
pub const DEFAULT_STEP_MINUTES: u32 = 15;

/// Default lower bound for daily limits.
pub const DEFAULT_MIN_MINUTES: u32 = 0;

/// Default upper bound for daily limits (8 hours).
pub const DEFAULT_MAX_MINUTES: u32 = 480;

/// Minutes in a day; no limit may exceed it.
pub const MINUTES_PER_DAY: u32 = 1440;

/// Block duration entity bounds, in minutes.
pub const BLOCK_DURATION_STEP: u32 = 5;
pub const BLOCK_DURATION_MIN: u32 = 5;
pub const BLOCK_DURATION_MAX: u32 = 720;
pub const BLOCK_DURATION_DEFAULT: u32 = 60;

// =============================================================================
// Minute Grid
// =============================================================================

/// A bounded, stepped range of minute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinuteGrid {
    step: u32,
    min: u32,
    max: u32,
}

impl MinuteGrid {
    /// Builds a grid, rejecting a zero step, inverted bounds, bounds past a
    /// full day, or a lower bound off the grid.
    pub fn new(step: u32, min: u32, max: u32) -> CoreResult<Self> {
        if step == 0 {
            return Err(ValidationError::MustBePositive {
                field: "step".to_string(),
            }
            .into());
        }
        if max > MINUTES_PER_DAY || min > max {
            return Err(ValidationError::OutOfRange {
                field: "max".to_string(),
                min: i64::from(min),
                max: i64::from(MINUTES_PER_DAY),
            }
            .into());
        }
        if min % step != 0 {
            return Err(ValidationError::OffGrid {
                field: "min".to_string(),
                step,
            }
            .into());
        }
        Ok(Self { step, min, max })
    }

    /// The block-duration grid: 5..=720 in steps of 5.
    pub const fn block_duration() -> Self {
        Self {
            step: BLOCK_DURATION_STEP,
            min: BLOCK_DURATION_MIN,
            max: BLOCK_DURATION_MAX,
        }
    }

    #[inline]
    pub const fn step(&self) -> u32 {
        self.step
    }

    #[inline]
    pub const fn min(&self) -> u32 {
        self.min
    }

    #[inline]
    pub const fn max(&self) -> u32 {
        self.max
    }

    /// Clamps into bounds, then truncates down to the grid. The result is
    /// always a multiple of `step` within `[min, max]`.
    pub fn clamp(&self, minutes: i64) -> u32 {
        let bounded = minutes.clamp(i64::from(self.min), i64::from(self.max)) as u32;
        bounded - bounded % self.step
    }

    /// Whether the value is already a legal grid point.
    pub fn contains(&self, minutes: u32) -> bool {
        minutes >= self.min && minutes <= self.max && minutes % self.step == 0
    }
}

impl Default for MinuteGrid {
    fn default() -> Self {
        Self {
            step: DEFAULT_STEP_MINUTES,
            min: DEFAULT_MIN_MINUTES,
            max: DEFAULT_MAX_MINUTES,
        }
    }
}

// =============================================================================
// Time of Day
// =============================================================================

/// Parses `HH:MM` (24h). Seconds are rejected.
pub fn parse_hhmm(input: &str) -> CoreResult<NaiveTime> {
    let trimmed = input.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .map_err(|_| CoreError::InvalidTime(input.to_string()))
}

/// Formats as `HH:MM`.
pub fn format_hhmm(time: NaiveTime) -> String {
    format!("{:02}:{:02}", time.hour(), time.minute())
}
