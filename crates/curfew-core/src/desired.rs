//! # Desired State
//!
//! What the bus has asked for, per controllable target, with sequence
//! numbers that make late or duplicated commands harmless.
//!
//! ## Command Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  BusCommand(bulk_school_nights = 120, seq 41)                           │
//! │        │                                                                │
//! │        ▼  expand()                                                      │
//! │  LimitMinutes(Sun)=120 #41   LimitMinutes(Mon)=120 #41   ... (5 days)   │
//! │        │                                                                │
//! │        ▼  apply_batch() under one lock                                  │
//! │  ┌──────────────────────────────────────────────┐                      │
//! │  │ target            value   seq  dispatches    │  seq <= high-water   │
//! │  │ LimitMinutes(Mon)  120    41   0             │  ──► Stale, dropped  │
//! │  │ Block              1800s  38   1             │                      │
//! │  └──────────────────────────────────────────────┘                      │
//! │        │                                                                │
//! │        ▼  confirm() when a remote read matches, abandon() after 3       │
//! │        unconfirmed dispatches or a rejected write                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! High-water marks survive retirement, so a command older than one already
//! confirmed can never resurrect an old value.

use std::collections::HashMap;

use chrono::{NaiveTime, Weekday};

use crate::entity::{CommandValue, EntityId, ScheduleBound};
use crate::error::{CoreError, CoreResult};

/// Dispatches without a confirming read before an entry is abandoned.
pub const MAX_UNCONFIRMED_DISPATCHES: u32 = 3;

// =============================================================================
// Targets & Values
// =============================================================================

/// A single remotely controllable value. Bulk entities are not targets; they
/// fan out into per-day `LimitMinutes` targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    LimitEnabled(Weekday),
    LimitMinutes(Weekday),
    ScheduleEnabled(Weekday),
    ScheduleTime(Weekday, ScheduleBound),
    Block,
}

/// Requested block state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCommand {
    Block { duration_secs: u32 },
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredValue {
    Switch(bool),
    /// Raw minutes as commanded; clamped to the grid at dispatch.
    Minutes(i64),
    Time(NaiveTime),
    Block(BlockCommand),
}

impl Target {
    fn accepts(&self, value: &DesiredValue) -> bool {
        matches!(
            (self, value),
            (Target::LimitEnabled(_), DesiredValue::Switch(_))
                | (Target::ScheduleEnabled(_), DesiredValue::Switch(_))
                | (Target::LimitMinutes(_), DesiredValue::Minutes(_))
                | (Target::ScheduleTime(..), DesiredValue::Time(_))
                | (Target::Block, DesiredValue::Block(_))
        )
    }

    /// Bus entity that reflects this target.
    pub fn entity(&self) -> EntityId {
        match self {
            Target::LimitEnabled(day) => EntityId::LimitEnabled(*day),
            Target::LimitMinutes(day) => EntityId::LimitMinutes(*day),
            Target::ScheduleEnabled(day) => EntityId::ScheduleEnabled(*day),
            Target::ScheduleTime(day, bound) => EntityId::ScheduleTime(*day, *bound),
            Target::Block => EntityId::Blocked,
        }
    }
}

/// One requested change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesiredUpdate {
    pub target: Target,
    pub value: DesiredValue,
    pub sequence: u64,
}

/// A decoded bus command with its arrival sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub entity: EntityId,
    pub value: CommandValue,
    pub sequence: u64,
}

/// Turns a command into desired-state updates. Bulk commands produce one
/// update per day of the group, all sharing the command's sequence.
///
/// `block_duration_minutes` is the current block-duration setting, consumed
/// by the block button.
pub fn expand(command: &Command, block_duration_minutes: u32) -> CoreResult<Vec<DesiredUpdate>> {
    let mismatch = || CoreError::InvalidPayload {
        entity: command.entity.object_id(),
        payload: format!("{:?}", command.value),
        reason: "value does not match entity".to_string(),
    };
    let one = |target: Target, value: DesiredValue| {
        vec![DesiredUpdate {
            target,
            value,
            sequence: command.sequence,
        }]
    };

    let updates = match (command.entity, command.value) {
        (EntityId::LimitEnabled(day), CommandValue::Switch(on)) => {
            one(Target::LimitEnabled(day), DesiredValue::Switch(on))
        }
        (EntityId::LimitMinutes(day), CommandValue::Number(minutes)) => {
            one(Target::LimitMinutes(day), DesiredValue::Minutes(minutes))
        }
        (EntityId::Bulk(group), CommandValue::Number(minutes)) => group
            .days()
            .iter()
            .map(|day| DesiredUpdate {
                target: Target::LimitMinutes(*day),
                value: DesiredValue::Minutes(minutes),
                sequence: command.sequence,
            })
            .collect(),
        (EntityId::ScheduleEnabled(day), CommandValue::Switch(on)) => {
            one(Target::ScheduleEnabled(day), DesiredValue::Switch(on))
        }
        (EntityId::ScheduleTime(day, bound), CommandValue::Time(time)) => {
            one(Target::ScheduleTime(day, bound), DesiredValue::Time(time))
        }
        (EntityId::BlockButton, CommandValue::Press) => one(
            Target::Block,
            DesiredValue::Block(BlockCommand::Block {
                duration_secs: block_duration_minutes.saturating_mul(60),
            }),
        ),
        (EntityId::UnblockButton, CommandValue::Press) => {
            one(Target::Block, DesiredValue::Block(BlockCommand::Resume))
        }
        (entity, _) if !entity.is_commandable() || entity == EntityId::BlockDuration => {
            return Err(CoreError::NotCommandable(entity.object_id()));
        }
        _ => return Err(mismatch()),
    };
    Ok(updates)
}

// =============================================================================
// Desired State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesiredEntry {
    pub value: DesiredValue,
    pub sequence: u64,
    pub dispatch_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// A newer (or equal) sequence was already seen for the target.
    Stale { high_water: u64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub applied: usize,
    pub stale: usize,
}

/// Pending commands, one entry per target.
#[derive(Debug, Clone, Default)]
pub struct DesiredState {
    entries: HashMap<Target, DesiredEntry>,
    high_water: HashMap<Target, u64>,
}

impl DesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one update unless its sequence is not newer than the last
    /// one seen for the target. Mismatched target/value pairs are rejected.
    pub fn apply(&mut self, update: DesiredUpdate) -> CoreResult<ApplyOutcome> {
        if !update.target.accepts(&update.value) {
            return Err(CoreError::InvalidPayload {
                entity: update.target.entity().object_id(),
                payload: format!("{:?}", update.value),
                reason: "value does not match target".to_string(),
            });
        }
        if let Some(&high_water) = self.high_water.get(&update.target) {
            if update.sequence <= high_water {
                return Ok(ApplyOutcome::Stale { high_water });
            }
        }
        self.high_water.insert(update.target, update.sequence);
        self.entries.insert(
            update.target,
            DesiredEntry {
                value: update.value,
                sequence: update.sequence,
                dispatch_count: 0,
            },
        );
        Ok(ApplyOutcome::Applied)
    }

    /// Applies a batch, validating every update first so a bad entry
    /// leaves the state untouched.
    pub fn apply_batch(&mut self, updates: Vec<DesiredUpdate>) -> CoreResult<BatchOutcome> {
        if let Some(bad) = updates.iter().find(|u| !u.target.accepts(&u.value)) {
            return Err(CoreError::InvalidPayload {
                entity: bad.target.entity().object_id(),
                payload: format!("{:?}", bad.value),
                reason: "value does not match target".to_string(),
            });
        }
        let mut outcome = BatchOutcome::default();
        for update in updates {
            match self.apply(update)? {
                ApplyOutcome::Applied => outcome.applied += 1,
                ApplyOutcome::Stale { .. } => outcome.stale += 1,
            }
        }
        Ok(outcome)
    }

    pub fn get(&self, target: &Target) -> Option<&DesiredEntry> {
        self.entries.get(target)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Target, &DesiredEntry)> {
        self.entries.iter()
    }

    /// Retires the entry if it still holds `sequence`. A newer command that
    /// arrived meanwhile stays pending.
    pub fn confirm(&mut self, target: &Target, sequence: u64) -> bool {
        self.retire(target, sequence)
    }

    /// Drops the entry without confirmation.
    pub fn abandon(&mut self, target: &Target, sequence: u64) -> bool {
        self.retire(target, sequence)
    }

    fn retire(&mut self, target: &Target, sequence: u64) -> bool {
        match self.entries.get(target) {
            Some(entry) if entry.sequence == sequence => {
                self.entries.remove(target);
                true
            }
            _ => false,
        }
    }

    /// Counts a dispatch; returns the new count, or `None` if the entry has
    /// moved on to a newer sequence.
    pub fn record_dispatch(&mut self, target: &Target, sequence: u64) -> Option<u32> {
        let entry = self.entries.get_mut(target)?;
        if entry.sequence != sequence {
            return None;
        }
        entry.dispatch_count += 1;
        Some(entry.dispatch_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::BulkGroup;

    fn minutes(day: Weekday, value: i64, sequence: u64) -> DesiredUpdate {
        DesiredUpdate {
            target: Target::LimitMinutes(day),
            value: DesiredValue::Minutes(value),
            sequence,
        }
    }

    #[test]
    fn test_school_nights_expands_to_five_days() {
        let command = Command {
            entity: EntityId::Bulk(BulkGroup::SchoolNights),
            value: CommandValue::Number(120),
            sequence: 7,
        };
        let updates = expand(&command, 60).unwrap();
        assert_eq!(updates.len(), 5);
        let days: Vec<_> = updates
            .iter()
            .map(|u| match u.target {
                Target::LimitMinutes(day) => day,
                other => panic!("unexpected target {other:?}"),
            })
            .collect();
        assert!(!days.contains(&Weekday::Fri));
        assert!(!days.contains(&Weekday::Sat));
        assert!(updates.iter().all(|u| u.sequence == 7));
    }

    #[test]
    fn test_block_button_uses_duration() {
        let command = Command {
            entity: EntityId::BlockButton,
            value: CommandValue::Press,
            sequence: 1,
        };
        let updates = expand(&command, 30).unwrap();
        assert_eq!(
            updates[0].value,
            DesiredValue::Block(BlockCommand::Block { duration_secs: 1800 })
        );
    }

    #[test]
    fn test_expand_rejects_local_and_read_only_entities() {
        for entity in [EntityId::BlockDuration, EntityId::Usage] {
            let command = Command {
                entity,
                value: CommandValue::Number(10),
                sequence: 1,
            };
            assert!(matches!(
                expand(&command, 60),
                Err(CoreError::NotCommandable(_))
            ));
        }
    }

    #[test]
    fn test_expand_rejects_mismatched_value() {
        let command = Command {
            entity: EntityId::LimitEnabled(Weekday::Mon),
            value: CommandValue::Number(10),
            sequence: 1,
        };
        assert!(matches!(
            expand(&command, 60),
            Err(CoreError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_out_of_order_updates_discarded() {
        let mut state = DesiredState::new();
        state.apply(minutes(Weekday::Mon, 120, 5)).unwrap();
        let outcome = state.apply(minutes(Weekday::Mon, 60, 3)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Stale { high_water: 5 });
        assert_eq!(
            state.get(&Target::LimitMinutes(Weekday::Mon)).unwrap().value,
            DesiredValue::Minutes(120)
        );
    }

    #[test]
    fn test_duplicate_sequence_is_stale() {
        let mut state = DesiredState::new();
        state.apply(minutes(Weekday::Mon, 120, 5)).unwrap();
        assert!(matches!(
            state.apply(minutes(Weekday::Mon, 120, 5)).unwrap(),
            ApplyOutcome::Stale { .. }
        ));
    }

    #[test]
    fn test_bulk_then_individual_latest_wins_per_day() {
        let mut state = DesiredState::new();
        let bulk = expand(
            &Command {
                entity: EntityId::Bulk(BulkGroup::AllDays),
                value: CommandValue::Number(60),
                sequence: 10,
            },
            60,
        )
        .unwrap();
        state.apply_batch(bulk).unwrap();
        state.apply(minutes(Weekday::Sat, 180, 11)).unwrap();

        assert_eq!(state.len(), 7);
        assert_eq!(
            state.get(&Target::LimitMinutes(Weekday::Sat)).unwrap().value,
            DesiredValue::Minutes(180)
        );
        assert_eq!(
            state.get(&Target::LimitMinutes(Weekday::Fri)).unwrap().value,
            DesiredValue::Minutes(60)
        );
    }

    #[test]
    fn test_retired_high_water_still_blocks_old_commands() {
        let mut state = DesiredState::new();
        state.apply(minutes(Weekday::Mon, 120, 5)).unwrap();
        assert!(state.confirm(&Target::LimitMinutes(Weekday::Mon), 5));
        assert!(state.is_empty());
        assert!(matches!(
            state.apply(minutes(Weekday::Mon, 30, 4)).unwrap(),
            ApplyOutcome::Stale { .. }
        ));
    }

    #[test]
    fn test_confirm_ignores_superseded_sequence() {
        let mut state = DesiredState::new();
        state.apply(minutes(Weekday::Mon, 120, 5)).unwrap();
        state.apply(minutes(Weekday::Mon, 150, 6)).unwrap();
        assert!(!state.confirm(&Target::LimitMinutes(Weekday::Mon), 5));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_record_dispatch_counts() {
        let mut state = DesiredState::new();
        let target = Target::LimitMinutes(Weekday::Mon);
        state.apply(minutes(Weekday::Mon, 120, 5)).unwrap();
        assert_eq!(state.record_dispatch(&target, 5), Some(1));
        assert_eq!(state.record_dispatch(&target, 5), Some(2));
        assert_eq!(state.record_dispatch(&target, 4), None);
    }

    #[test]
    fn test_batch_with_mismatched_value_applies_nothing() {
        let mut state = DesiredState::new();
        let batch = vec![
            minutes(Weekday::Mon, 60, 1),
            DesiredUpdate {
                target: Target::Block,
                value: DesiredValue::Minutes(5),
                sequence: 1,
            },
        ];
        assert!(state.apply_batch(batch).is_err());
        assert!(state.is_empty());
    }
}
