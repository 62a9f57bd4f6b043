//! # Core Types
//!
//! The remote dashboard's view of one child: per-day limits and curfew
//! schedules, the device block, and usage statistics.
//!
//! ## Remote State Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         RemoteState (one child)                         │
//! │                                                                         │
//! │   limits:    WeekMap<DailyLimitState>   Mon ─ Tue ─ ... ─ Sun           │
//! │   schedules: WeekMap<DailySchedule>     Mon ─ Tue ─ ... ─ Sun           │
//! │   block:     Option<DeviceBlockState>   None = not reported remotely    │
//! │   usage:     UsageSnapshot              superseded every sync           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Weekdays
// =============================================================================

/// Monday-first ordering used everywhere a week is iterated.
pub const ALL_DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Lowercase full day name, used in entity object ids (`limit_monday`).
pub fn day_slug(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Capitalized day name for entity labels.
pub fn day_label(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Parses a day name. Accepts full names and three-letter abbreviations in
/// any case.
pub fn parse_day(input: &str) -> CoreResult<Weekday> {
    input
        .trim()
        .parse::<Weekday>()
        .map_err(|_| CoreError::InvalidDay(input.to_string()))
}

/// A value for each day of the week, indexed Monday-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekMap<T> {
    days: [T; 7],
}

impl<T> WeekMap<T> {
    pub fn from_fn(mut f: impl FnMut(Weekday) -> T) -> Self {
        Self {
            days: std::array::from_fn(|i| f(ALL_DAYS[i])),
        }
    }

    #[inline]
    pub fn get(&self, day: Weekday) -> &T {
        &self.days[day.num_days_from_monday() as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, day: Weekday) -> &mut T {
        &mut self.days[day.num_days_from_monday() as usize]
    }

    pub fn set(&mut self, day: Weekday, value: T) {
        *self.get_mut(day) = value;
    }

    /// Iterates Monday through Sunday.
    pub fn iter(&self) -> impl Iterator<Item = (Weekday, &T)> {
        ALL_DAYS.iter().copied().zip(self.days.iter())
    }
}

impl<T: Default> Default for WeekMap<T> {
    fn default() -> Self {
        Self::from_fn(|_| T::default())
    }
}

// =============================================================================
// Limits & Schedules
// =============================================================================

/// Remote daily screen-time allowance for one weekday.
///
/// `enabled` and `minutes_allowed` are independent: disabling a day keeps the
/// stored minute value so re-enabling restores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyLimitState {
    pub enabled: bool,
    pub minutes_allowed: u32,
    pub last_seen_remote_at: DateTime<Utc>,
}

impl DailyLimitState {
    pub fn new(enabled: bool, minutes_allowed: u32, seen_at: DateTime<Utc>) -> Self {
        Self {
            enabled,
            minutes_allowed,
            last_seen_remote_at: seen_at,
        }
    }
}

/// Curfew window for one weekday. Outside `allowed_start..allowed_end` the
/// device is locked by the dashboard when `enabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    pub enabled: bool,
    pub allowed_start: NaiveTime,
    pub allowed_end: NaiveTime,
}

impl Default for DailySchedule {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_start: NaiveTime::MIN,
            allowed_end: NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

// =============================================================================
// Device Block
// =============================================================================

/// "Offscreen time" state. A block without an explicit resume lifts itself
/// at `expires_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceBlockState {
    pub blocked: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl DeviceBlockState {
    pub fn unblocked() -> Self {
        Self::default()
    }

    pub fn blocked_for(now: DateTime<Utc>, duration_secs: u32) -> Self {
        Self {
            blocked: true,
            expires_at: Some(now + Duration::seconds(i64::from(duration_secs))),
        }
    }

    /// Whether the block is still in force at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.blocked && self.expires_at.map_or(true, |at| at > now)
    }

    /// The state as observed at `now`, with an elapsed block collapsed to
    /// unblocked.
    pub fn effective_at(&self, now: DateTime<Utc>) -> Self {
        if self.is_active_at(now) {
            *self
        } else {
            Self::unblocked()
        }
    }
}

// =============================================================================
// Usage
// =============================================================================

/// One entry from the viewing history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewingEvent {
    pub title: String,
    pub category: String,
    pub duration_minutes: u32,
    pub started_at: DateTime<Utc>,
}

/// Usage statistics captured by one successful sync. Superseded, never
/// merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub today_minutes: u32,
    pub yesterday_minutes: u32,
    /// Rolling 7-day total.
    pub week_minutes: u32,
    /// Most recent first.
    pub recent_events: Vec<ViewingEvent>,
    pub captured_at: DateTime<Utc>,
}

impl UsageSnapshot {
    pub fn empty(captured_at: DateTime<Utc>) -> Self {
        Self {
            today_minutes: 0,
            yesterday_minutes: 0,
            week_minutes: 0,
            recent_events: Vec::new(),
            captured_at,
        }
    }

    pub fn latest_event(&self) -> Option<&ViewingEvent> {
        self.recent_events.first()
    }
}

// =============================================================================
// Child & Remote State
// =============================================================================

/// A child account on the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildProfile {
    pub id: String,
    pub name: String,
}

impl ChildProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Everything one `fetch_state` call returns for a child.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteState {
    pub limits: WeekMap<DailyLimitState>,
    pub schedules: WeekMap<DailySchedule>,
    /// `None` when the dashboard does not report block state; the daemon
    /// substitutes its locally tracked block.
    pub block: Option<DeviceBlockState>,
    pub usage: UsageSnapshot,
    pub fetched_at: DateTime<Utc>,
}

impl RemoteState {
    /// All days disabled at zero minutes, no schedules, no usage.
    pub fn empty(fetched_at: DateTime<Utc>) -> Self {
        Self {
            limits: WeekMap::from_fn(|_| DailyLimitState::new(false, 0, fetched_at)),
            schedules: WeekMap::default(),
            block: None,
            usage: UsageSnapshot::empty(fetched_at),
            fetched_at,
        }
    }
}
