//! # Entity Catalogue
//!
//! Every entity the bridge exposes on the bus, its object id, value domain
//! and payload encoding.
//!
//! ## Catalogue
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Group       Object id                  Component      Commands         │
//! │  ──────────  ─────────────────────────  ─────────────  ──────────────   │
//! │  Limits      limit_<day>          x7    switch         ON / OFF         │
//! │              minutes_<day>        x7    number         0..480 step 15   │
//! │              bulk_<group>         x3    number         0..480 step 15   │
//! │  Schedules   schedule_<day>       x7    switch         ON / OFF         │
//! │              schedule_<day>_start x7    text           HH:MM            │
//! │              schedule_<day>_end   x7    text           HH:MM            │
//! │  Controls    block_button               button         PRESS            │
//! │              unblock_button             button         PRESS            │
//! │              block_duration             number         5..720 step 5    │
//! │  Monitoring  blocked                    binary_sensor  -                │
//! │              usage / viewing            sensor (JSON)  -                │
//! │              sync_health                sensor (JSON)  -                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{NaiveTime, Weekday};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::types::{day_label, day_slug, ALL_DAYS};
use crate::validation::{format_hhmm, parse_hhmm, MinuteGrid};

// =============================================================================
// Bulk Groups
// =============================================================================

/// Named sets of days a single number entity sets at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkGroup {
    AllDays,
    /// Sunday through Thursday.
    SchoolNights,
    /// Friday and Saturday.
    Weekend,
}

impl BulkGroup {
    pub const ALL: [BulkGroup; 3] = [BulkGroup::AllDays, BulkGroup::SchoolNights, BulkGroup::Weekend];

    pub fn days(self) -> &'static [Weekday] {
        match self {
            BulkGroup::AllDays => &ALL_DAYS,
            BulkGroup::SchoolNights => &[
                Weekday::Sun,
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
            ],
            BulkGroup::Weekend => &[Weekday::Fri, Weekday::Sat],
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            BulkGroup::AllDays => "all_days",
            BulkGroup::SchoolNights => "school_nights",
            BulkGroup::Weekend => "weekend",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BulkGroup::AllDays => "All Days",
            BulkGroup::SchoolNights => "School Nights (Sun-Thu)",
            BulkGroup::Weekend => "Weekend (Fri-Sat)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleBound {
    Start,
    End,
}

impl ScheduleBound {
    fn slug(self) -> &'static str {
        match self {
            ScheduleBound::Start => "start",
            ScheduleBound::End => "end",
        }
    }
}

// =============================================================================
// Entity Ids
// =============================================================================

/// Bus-facing entity identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityId {
    LimitEnabled(Weekday),
    LimitMinutes(Weekday),
    Bulk(BulkGroup),
    ScheduleEnabled(Weekday),
    ScheduleTime(Weekday, ScheduleBound),
    BlockButton,
    UnblockButton,
    BlockDuration,
    Blocked,
    Usage,
    Viewing,
    Health,
}

/// Home-automation component type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Switch,
    Number,
    Text,
    Button,
    BinarySensor,
    Sensor,
}

impl Component {
    pub fn as_str(self) -> &'static str {
        match self {
            Component::Switch => "switch",
            Component::Number => "number",
            Component::Text => "text",
            Component::Button => "button",
            Component::BinarySensor => "binary_sensor",
            Component::Sensor => "sensor",
        }
    }
}

/// Device grouping shown by the automation frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityGroup {
    Limits,
    Schedules,
    Controls,
    Monitoring,
}

impl EntityGroup {
    pub fn slug(self) -> &'static str {
        match self {
            EntityGroup::Limits => "limits",
            EntityGroup::Schedules => "schedules",
            EntityGroup::Controls => "controls",
            EntityGroup::Monitoring => "monitoring",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EntityGroup::Limits => "Daily Limits",
            EntityGroup::Schedules => "Schedules (Curfew)",
            EntityGroup::Controls => "Controls",
            EntityGroup::Monitoring => "Monitoring",
        }
    }
}

/// Values an entity accepts or reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDomain {
    Boolean,
    Integer {
        min: u32,
        max: u32,
        step: u32,
        unit: &'static str,
    },
    Time,
    Trigger,
    Reading {
        unit: Option<&'static str>,
    },
}

/// Everything needed to announce one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub id: EntityId,
    pub object_id: String,
    pub label: String,
    pub component: Component,
    pub group: EntityGroup,
    pub domain: ValueDomain,
    pub icon: &'static str,
}

impl EntityId {
    /// The full catalogue in announcement order.
    pub fn all() -> Vec<EntityId> {
        let mut out = Vec::with_capacity(45);
        for day in ALL_DAYS {
            out.push(EntityId::LimitEnabled(day));
            out.push(EntityId::LimitMinutes(day));
        }
        out.extend(BulkGroup::ALL.iter().map(|g| EntityId::Bulk(*g)));
        for day in ALL_DAYS {
            out.push(EntityId::ScheduleEnabled(day));
            out.push(EntityId::ScheduleTime(day, ScheduleBound::Start));
            out.push(EntityId::ScheduleTime(day, ScheduleBound::End));
        }
        out.extend([
            EntityId::BlockButton,
            EntityId::UnblockButton,
            EntityId::BlockDuration,
            EntityId::Blocked,
            EntityId::Usage,
            EntityId::Viewing,
            EntityId::Health,
        ]);
        out
    }

    pub fn object_id(&self) -> String {
        match self {
            EntityId::LimitEnabled(day) => format!("limit_{}", day_slug(*day)),
            EntityId::LimitMinutes(day) => format!("minutes_{}", day_slug(*day)),
            EntityId::Bulk(group) => format!("bulk_{}", group.slug()),
            EntityId::ScheduleEnabled(day) => format!("schedule_{}", day_slug(*day)),
            EntityId::ScheduleTime(day, bound) => {
                format!("schedule_{}_{}", day_slug(*day), bound.slug())
            }
            EntityId::BlockButton => "block_button".to_string(),
            EntityId::UnblockButton => "unblock_button".to_string(),
            EntityId::BlockDuration => "block_duration".to_string(),
            EntityId::Blocked => "blocked".to_string(),
            EntityId::Usage => "usage".to_string(),
            EntityId::Viewing => "viewing".to_string(),
            EntityId::Health => "sync_health".to_string(),
        }
    }

    /// Reverse of [`EntityId::object_id`].
    pub fn parse(object_id: &str) -> CoreResult<EntityId> {
        EntityId::all()
            .into_iter()
            .find(|id| id.object_id() == object_id)
            .ok_or_else(|| CoreError::UnknownEntity(object_id.to_string()))
    }

    pub fn component(&self) -> Component {
        match self {
            EntityId::LimitEnabled(_) | EntityId::ScheduleEnabled(_) => Component::Switch,
            EntityId::LimitMinutes(_) | EntityId::Bulk(_) | EntityId::BlockDuration => {
                Component::Number
            }
            EntityId::ScheduleTime(..) => Component::Text,
            EntityId::BlockButton | EntityId::UnblockButton => Component::Button,
            EntityId::Blocked => Component::BinarySensor,
            EntityId::Usage | EntityId::Viewing | EntityId::Health => Component::Sensor,
        }
    }

    pub fn group(&self) -> EntityGroup {
        match self {
            EntityId::LimitEnabled(_) | EntityId::LimitMinutes(_) | EntityId::Bulk(_) => {
                EntityGroup::Limits
            }
            EntityId::ScheduleEnabled(_) | EntityId::ScheduleTime(..) => EntityGroup::Schedules,
            EntityId::BlockButton | EntityId::UnblockButton | EntityId::BlockDuration => {
                EntityGroup::Controls
            }
            EntityId::Blocked | EntityId::Usage | EntityId::Viewing | EntityId::Health => {
                EntityGroup::Monitoring
            }
        }
    }

    /// Whether the bus may send commands to this entity.
    pub fn is_commandable(&self) -> bool {
        !matches!(
            self.component(),
            Component::BinarySensor | Component::Sensor
        )
    }

    pub fn label(&self) -> String {
        match self {
            EntityId::LimitEnabled(day) => format!("{} - Limit Enabled", day_label(*day)),
            EntityId::LimitMinutes(day) => format!("{} - Minutes", day_label(*day)),
            EntityId::Bulk(group) => group.label().to_string(),
            EntityId::ScheduleEnabled(day) => format!("{} - Curfew Enabled", day_label(*day)),
            EntityId::ScheduleTime(day, ScheduleBound::Start) => {
                format!("{} - Start", day_label(*day))
            }
            EntityId::ScheduleTime(day, ScheduleBound::End) => format!("{} - End", day_label(*day)),
            EntityId::BlockButton => "Block Device".to_string(),
            EntityId::UnblockButton => "Resume Device".to_string(),
            EntityId::BlockDuration => "Block Duration".to_string(),
            EntityId::Blocked => "Device Blocked".to_string(),
            EntityId::Usage => "Screen Time Today".to_string(),
            EntityId::Viewing => "Recent Activity".to_string(),
            EntityId::Health => "Sync Health".to_string(),
        }
    }

    pub fn domain(&self, grid: &MinuteGrid) -> ValueDomain {
        match self {
            EntityId::LimitEnabled(_) | EntityId::ScheduleEnabled(_) | EntityId::Blocked => {
                ValueDomain::Boolean
            }
            EntityId::LimitMinutes(_) | EntityId::Bulk(_) => ValueDomain::Integer {
                min: grid.min(),
                max: grid.max(),
                step: grid.step(),
                unit: "min",
            },
            EntityId::BlockDuration => {
                let block = MinuteGrid::block_duration();
                ValueDomain::Integer {
                    min: block.min(),
                    max: block.max(),
                    step: block.step(),
                    unit: "min",
                }
            }
            EntityId::ScheduleTime(..) => ValueDomain::Time,
            EntityId::BlockButton | EntityId::UnblockButton => ValueDomain::Trigger,
            EntityId::Usage => ValueDomain::Reading { unit: Some("min") },
            EntityId::Health => ValueDomain::Reading { unit: Some("s") },
            EntityId::Viewing => ValueDomain::Reading { unit: None },
        }
    }

    fn icon(&self) -> &'static str {
        match self {
            EntityId::LimitEnabled(_) => "mdi:timer-lock",
            EntityId::LimitMinutes(_) => "mdi:timer-sand",
            EntityId::Bulk(_) => "mdi:playlist-edit",
            EntityId::ScheduleEnabled(_) => "mdi:calendar-clock",
            EntityId::ScheduleTime(_, ScheduleBound::Start) => "mdi:clock-start",
            EntityId::ScheduleTime(_, ScheduleBound::End) => "mdi:clock-end",
            EntityId::BlockButton => "mdi:cancel",
            EntityId::UnblockButton => "mdi:play-circle",
            EntityId::BlockDuration => "mdi:timer-cog",
            EntityId::Blocked => "mdi:tablet",
            EntityId::Usage => "mdi:chart-timeline-variant",
            EntityId::Viewing => "mdi:television-play",
            EntityId::Health => "mdi:heart-pulse",
        }
    }

    pub fn descriptor(&self, grid: &MinuteGrid) -> EntityDescriptor {
        EntityDescriptor {
            id: *self,
            object_id: self.object_id(),
            label: self.label(),
            component: self.component(),
            group: self.group(),
            domain: self.domain(grid),
            icon: self.icon(),
        }
    }

    /// Decodes an inbound command payload against this entity's domain.
    /// Numbers are returned raw; clamping happens before dispatch.
    pub fn parse_command(&self, payload: &str) -> CoreResult<CommandValue> {
        let invalid = |reason: &str| CoreError::InvalidPayload {
            entity: self.object_id(),
            payload: payload.to_string(),
            reason: reason.to_string(),
        };
        let trimmed = payload.trim();

        match self.component() {
            Component::Switch => match trimmed.to_ascii_uppercase().as_str() {
                "ON" | "TRUE" | "1" => Ok(CommandValue::Switch(true)),
                "OFF" | "FALSE" | "0" => Ok(CommandValue::Switch(false)),
                _ => Err(invalid("expected ON or OFF")),
            },
            Component::Number => trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .map(|v| v.trunc() as i64)
                })
                .map(CommandValue::Number)
                .ok_or_else(|| invalid("expected an integer")),
            Component::Text => parse_hhmm(trimmed)
                .map(CommandValue::Time)
                .map_err(|_| invalid("expected HH:MM")),
            Component::Button => Ok(CommandValue::Press),
            Component::BinarySensor | Component::Sensor => {
                Err(CoreError::NotCommandable(self.object_id()))
            }
        }
    }
}

// =============================================================================
// Values
// =============================================================================

/// A decoded inbound command value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandValue {
    Switch(bool),
    Number(i64),
    Time(NaiveTime),
    Press,
}

/// A value published as retained entity state.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Switch(bool),
    Number(u32),
    Time(NaiveTime),
    Json(Value),
}

impl StateValue {
    /// Wire payload: `ON`/`OFF`, decimal integer, `HH:MM`, or a JSON document.
    pub fn to_payload(&self) -> String {
        match self {
            StateValue::Switch(true) => "ON".to_string(),
            StateValue::Switch(false) => "OFF".to_string(),
            StateValue::Number(n) => n.to_string(),
            StateValue::Time(t) => format_hhmm(*t),
            StateValue::Json(v) => v.to_string(),
        }
    }
}
