//! # Reconciler
//!
//! Pure diff between the dashboard's view and the bus's desired state.
//!
//! ## Decision Table (per target)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  desired entry?   remote matches?   mutation      publish     entry    │
//! │  ──────────────   ───────────────   ───────────   ─────────   ──────   │
//! │  no               -                 none          remote      -        │
//! │  yes              yes               none          remote      confirm  │
//! │  yes              no                full value    desired     pending  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A pending command always beats a remote read in the same tick: the read is
//! treated as stale until a later read shows the written value. Mutations
//! carry full values (never deltas), so replaying a plan is harmless.

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde_json::json;

use crate::desired::{BlockCommand, DesiredState, DesiredValue, Target};
use crate::entity::{BulkGroup, EntityId, ScheduleBound, StateValue};
use crate::types::{DailySchedule, RemoteState, UsageSnapshot, WeekMap, ALL_DAYS};
use crate::validation::MinuteGrid;

// =============================================================================
// Output Types
// =============================================================================

/// A write against the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMutation {
    SetDailyLimit {
        day: Weekday,
        minutes: u32,
        enabled: bool,
    },
    SetSchedule {
        day: Weekday,
        schedule: DailySchedule,
    },
    /// `None` resumes the device.
    SetBlock { duration_secs: Option<u32> },
}

/// A desired entry identified by the sequence it held when planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub target: Target,
    pub sequence: u64,
}

/// A mutation plus the entries it is meant to satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMutation {
    pub mutation: RemoteMutation,
    pub satisfies: Vec<Pending>,
}

/// A retained state publication.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub entity: EntityId,
    pub value: StateValue,
}

impl Publication {
    pub fn new(entity: EntityId, value: StateValue) -> Self {
        Self { entity, value }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub remote_mutations: Vec<PlannedMutation>,
    pub bus_publications: Vec<Publication>,
    /// Entries the remote read now agrees with.
    pub confirmations: Vec<Pending>,
}

// =============================================================================
// Reconcile
// =============================================================================

#[derive(Default)]
struct Settlement {
    confirmations: Vec<Pending>,
    unmet: Vec<Pending>,
}

impl Settlement {
    /// Resolves one component: the remote value when nothing is pending or
    /// the remote already agrees, otherwise the desired value.
    fn settle<T: PartialEq>(&mut self, target: Target, wanted: Option<(u64, T)>, remote: T) -> T {
        match wanted {
            Some((sequence, value)) if value == remote => {
                self.confirmations.push(Pending { target, sequence });
                remote
            }
            Some((sequence, value)) => {
                self.unmet.push(Pending { target, sequence });
                value
            }
            None => remote,
        }
    }
}

fn wanted_switch(desired: &DesiredState, target: Target) -> Option<(u64, bool)> {
    match desired.get(&target) {
        Some(entry) => match entry.value {
            DesiredValue::Switch(on) => Some((entry.sequence, on)),
            _ => None,
        },
        None => None,
    }
}

fn wanted_minutes(desired: &DesiredState, target: Target, grid: &MinuteGrid) -> Option<(u64, u32)> {
    match desired.get(&target) {
        Some(entry) => match entry.value {
            DesiredValue::Minutes(raw) => Some((entry.sequence, grid.clamp(raw))),
            _ => None,
        },
        None => None,
    }
}

fn wanted_time(desired: &DesiredState, target: Target) -> Option<(u64, NaiveTime)> {
    match desired.get(&target) {
        Some(entry) => match entry.value {
            DesiredValue::Time(time) => Some((entry.sequence, time)),
            _ => None,
        },
        None => None,
    }
}

/// Plans the writes and publications for one tick.
pub fn reconcile(
    remote: &RemoteState,
    desired: &DesiredState,
    grid: &MinuteGrid,
    now: DateTime<Utc>,
) -> Reconciliation {
    let mut out = Reconciliation::default();
    let mut published_minutes: WeekMap<u32> = WeekMap::default();

    // Daily limits
    for day in ALL_DAYS {
        let current = remote.limits.get(day);
        let mut settlement = Settlement::default();

        let enabled = settlement.settle(
            Target::LimitEnabled(day),
            wanted_switch(desired, Target::LimitEnabled(day)),
            current.enabled,
        );
        let minutes = settlement.settle(
            Target::LimitMinutes(day),
            wanted_minutes(desired, Target::LimitMinutes(day), grid),
            current.minutes_allowed,
        );

        if !settlement.unmet.is_empty() {
            out.remote_mutations.push(PlannedMutation {
                mutation: RemoteMutation::SetDailyLimit {
                    day,
                    minutes: grid.clamp(i64::from(minutes)),
                    enabled,
                },
                satisfies: settlement.unmet,
            });
        }
        out.confirmations.extend(settlement.confirmations);

        published_minutes.set(day, minutes);
        out.bus_publications
            .push(Publication::new(EntityId::LimitEnabled(day), StateValue::Switch(enabled)));
        out.bus_publications
            .push(Publication::new(EntityId::LimitMinutes(day), StateValue::Number(minutes)));
    }

    for group in BulkGroup::ALL {
        let mut values = group.days().iter().map(|day| *published_minutes.get(*day));
        if let Some(first) = values.next() {
            if values.all(|v| v == first) {
                out.bus_publications
                    .push(Publication::new(EntityId::Bulk(group), StateValue::Number(first)));
            }
        }
    }

    // Schedules
    for day in ALL_DAYS {
        let current = *remote.schedules.get(day);
        let mut settlement = Settlement::default();
        let start_target = Target::ScheduleTime(day, ScheduleBound::Start);
        let end_target = Target::ScheduleTime(day, ScheduleBound::End);

        let schedule = DailySchedule {
            enabled: settlement.settle(
                Target::ScheduleEnabled(day),
                wanted_switch(desired, Target::ScheduleEnabled(day)),
                current.enabled,
            ),
            allowed_start: settlement.settle(
                start_target,
                wanted_time(desired, start_target),
                current.allowed_start,
            ),
            allowed_end: settlement.settle(
                end_target,
                wanted_time(desired, end_target),
                current.allowed_end,
            ),
        };

        if !settlement.unmet.is_empty() {
            out.remote_mutations.push(PlannedMutation {
                mutation: RemoteMutation::SetSchedule { day, schedule },
                satisfies: settlement.unmet,
            });
        }
        out.confirmations.extend(settlement.confirmations);

        out.bus_publications.extend([
            Publication::new(EntityId::ScheduleEnabled(day), StateValue::Switch(schedule.enabled)),
            Publication::new(
                EntityId::ScheduleTime(day, ScheduleBound::Start),
                StateValue::Time(schedule.allowed_start),
            ),
            Publication::new(
                EntityId::ScheduleTime(day, ScheduleBound::End),
                StateValue::Time(schedule.allowed_end),
            ),
        ]);
    }

    // Block
    let observed = remote.block.unwrap_or_default().effective_at(now);
    let blocked = match desired.get(&Target::Block) {
        Some(entry) => {
            let pending = Pending {
                target: Target::Block,
                sequence: entry.sequence,
            };
            match entry.value {
                DesiredValue::Block(BlockCommand::Block { duration_secs }) => {
                    if observed.blocked {
                        out.confirmations.push(pending);
                    } else {
                        out.remote_mutations.push(PlannedMutation {
                            mutation: RemoteMutation::SetBlock {
                                duration_secs: Some(duration_secs),
                            },
                            satisfies: vec![pending],
                        });
                    }
                    true
                }
                DesiredValue::Block(BlockCommand::Resume) => {
                    if observed.blocked {
                        out.remote_mutations.push(PlannedMutation {
                            mutation: RemoteMutation::SetBlock { duration_secs: None },
                            satisfies: vec![pending],
                        });
                    } else {
                        out.confirmations.push(pending);
                    }
                    false
                }
                _ => observed.blocked,
            }
        }
        None => observed.blocked,
    };
    out.bus_publications
        .push(Publication::new(EntityId::Blocked, StateValue::Switch(blocked)));

    out.bus_publications.extend(usage_publications(&remote.usage));
    out
}

/// Sensor publications for a usage snapshot. Also used to republish the
/// cached snapshot while the daemon is degraded.
pub fn usage_publications(usage: &UsageSnapshot) -> Vec<Publication> {
    let summary = json!({
        "today_minutes": usage.today_minutes,
        "yesterday_minutes": usage.yesterday_minutes,
        "week_minutes": usage.week_minutes,
        "captured_at": usage.captured_at,
    });
    let viewing = json!({
        "latest": usage.latest_event(),
        "recent": usage.recent_events,
        "captured_at": usage.captured_at,
    });
    vec![
        Publication::new(EntityId::Usage, StateValue::Json(summary)),
        Publication::new(EntityId::Viewing, StateValue::Json(viewing)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desired::DesiredUpdate;
    use crate::types::DeviceBlockState;
    use crate::validation::parse_hhmm;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 18, 0, 0).unwrap()
    }

    fn remote_with_monday(minutes: u32) -> RemoteState {
        let mut remote = RemoteState::empty(now());
        let monday = remote.limits.get_mut(Weekday::Mon);
        monday.enabled = true;
        monday.minutes_allowed = minutes;
        remote
    }

    fn find(rec: &Reconciliation, entity: EntityId) -> Option<&StateValue> {
        rec.bus_publications
            .iter()
            .find(|p| p.entity == entity)
            .map(|p| &p.value)
    }

    fn desire(state: &mut DesiredState, target: Target, value: DesiredValue, sequence: u64) {
        state
            .apply(DesiredUpdate {
                target,
                value,
                sequence,
            })
            .unwrap();
    }

    #[test]
    fn test_no_desired_entries_publishes_only() {
        let rec = reconcile(
            &remote_with_monday(90),
            &DesiredState::new(),
            &MinuteGrid::default(),
            now(),
        );
        assert!(rec.remote_mutations.is_empty());
        assert!(rec.confirmations.is_empty());
        assert_eq!(
            find(&rec, EntityId::LimitMinutes(Weekday::Mon)),
            Some(&StateValue::Number(90))
        );
        assert_eq!(
            find(&rec, EntityId::LimitEnabled(Weekday::Mon)),
            Some(&StateValue::Switch(true))
        );
    }

    #[test]
    fn test_publications_and_mutations_are_disjoint_kinds() {
        let mut desired = DesiredState::new();
        desire(
            &mut desired,
            Target::LimitMinutes(Weekday::Mon),
            DesiredValue::Minutes(120),
            1,
        );
        let rec = reconcile(&remote_with_monday(90), &desired, &MinuteGrid::default(), now());
        assert_eq!(rec.remote_mutations.len(), 1);
        assert!(rec
            .bus_publications
            .iter()
            .all(|p| p.entity.component() != crate::entity::Component::Button));
    }

    #[test]
    fn test_command_wins_and_desired_is_published() {
        let mut desired = DesiredState::new();
        desire(
            &mut desired,
            Target::LimitMinutes(Weekday::Mon),
            DesiredValue::Minutes(120),
            4,
        );
        let rec = reconcile(&remote_with_monday(90), &desired, &MinuteGrid::default(), now());

        assert_eq!(
            rec.remote_mutations,
            vec![PlannedMutation {
                mutation: RemoteMutation::SetDailyLimit {
                    day: Weekday::Mon,
                    minutes: 120,
                    enabled: true,
                },
                satisfies: vec![Pending {
                    target: Target::LimitMinutes(Weekday::Mon),
                    sequence: 4,
                }],
            }]
        );
        assert_eq!(
            find(&rec, EntityId::LimitMinutes(Weekday::Mon)),
            Some(&StateValue::Number(120))
        );
    }

    #[test]
    fn test_out_of_range_desired_is_clamped() {
        let mut desired = DesiredState::new();
        desire(
            &mut desired,
            Target::LimitMinutes(Weekday::Tue),
            DesiredValue::Minutes(1000),
            1,
        );
        desire(
            &mut desired,
            Target::LimitMinutes(Weekday::Wed),
            DesiredValue::Minutes(100),
            2,
        );
        let rec = reconcile(
            &RemoteState::empty(now()),
            &desired,
            &MinuteGrid::default(),
            now(),
        );
        let minutes: Vec<u32> = rec
            .remote_mutations
            .iter()
            .filter_map(|p| match p.mutation {
                RemoteMutation::SetDailyLimit { minutes, .. } => Some(minutes),
                _ => None,
            })
            .collect();
        assert_eq!(minutes, vec![480, 90]);
    }

    #[test]
    fn test_matching_remote_confirms_without_mutation() {
        let mut desired = DesiredState::new();
        desire(
            &mut desired,
            Target::LimitMinutes(Weekday::Mon),
            DesiredValue::Minutes(100),
            9,
        );
        let rec = reconcile(&remote_with_monday(90), &desired, &MinuteGrid::default(), now());
        assert!(rec.remote_mutations.is_empty());
        assert_eq!(
            rec.confirmations,
            vec![Pending {
                target: Target::LimitMinutes(Weekday::Mon),
                sequence: 9,
            }]
        );
    }

    #[test]
    fn test_enable_merges_remote_minutes() {
        let mut remote = remote_with_monday(150);
        remote.limits.get_mut(Weekday::Mon).enabled = false;
        let mut desired = DesiredState::new();
        desire(
            &mut desired,
            Target::LimitEnabled(Weekday::Mon),
            DesiredValue::Switch(true),
            2,
        );
        let rec = reconcile(&remote, &desired, &MinuteGrid::default(), now());
        assert_eq!(
            rec.remote_mutations[0].mutation,
            RemoteMutation::SetDailyLimit {
                day: Weekday::Mon,
                minutes: 150,
                enabled: true,
            }
        );
    }

    #[test]
    fn test_bulk_published_only_when_days_agree() {
        let mut remote = RemoteState::empty(now());
        for day in [Weekday::Fri, Weekday::Sat] {
            remote.limits.get_mut(day).minutes_allowed = 240;
        }
        let rec = reconcile(&remote, &DesiredState::new(), &MinuteGrid::default(), now());
        assert_eq!(
            find(&rec, EntityId::Bulk(BulkGroup::Weekend)),
            Some(&StateValue::Number(240))
        );
        assert_eq!(
            find(&rec, EntityId::Bulk(BulkGroup::SchoolNights)),
            Some(&StateValue::Number(0))
        );
        assert_eq!(find(&rec, EntityId::Bulk(BulkGroup::AllDays)), None);
    }

    #[test]
    fn test_schedule_change_sends_full_schedule() {
        let mut remote = RemoteState::empty(now());
        remote.schedules.set(
            Weekday::Thu,
            DailySchedule {
                enabled: true,
                allowed_start: parse_hhmm("07:00").unwrap(),
                allowed_end: parse_hhmm("20:00").unwrap(),
            },
        );
        let mut desired = DesiredState::new();
        let end = parse_hhmm("21:30").unwrap();
        desire(
            &mut desired,
            Target::ScheduleTime(Weekday::Thu, ScheduleBound::End),
            DesiredValue::Time(end),
            3,
        );
        let rec = reconcile(&remote, &desired, &MinuteGrid::default(), now());
        assert_eq!(
            rec.remote_mutations[0].mutation,
            RemoteMutation::SetSchedule {
                day: Weekday::Thu,
                schedule: DailySchedule {
                    enabled: true,
                    allowed_start: parse_hhmm("07:00").unwrap(),
                    allowed_end: end,
                },
            }
        );
    }

    #[test]
    fn test_block_command_beats_stale_read() {
        let mut remote = RemoteState::empty(now());
        remote.block = Some(DeviceBlockState::unblocked());
        let mut desired = DesiredState::new();
        desire(
            &mut desired,
            Target::Block,
            DesiredValue::Block(BlockCommand::Block { duration_secs: 1800 }),
            5,
        );

        let rec = reconcile(&remote, &desired, &MinuteGrid::default(), now());
        assert_eq!(
            rec.remote_mutations[0].mutation,
            RemoteMutation::SetBlock {
                duration_secs: Some(1800)
            }
        );
        assert_eq!(find(&rec, EntityId::Blocked), Some(&StateValue::Switch(true)));
        assert!(rec.confirmations.is_empty());

        remote.block = Some(DeviceBlockState::blocked_for(now(), 1800));
        let rec = reconcile(&remote, &desired, &MinuteGrid::default(), now());
        assert!(rec.remote_mutations.is_empty());
        assert_eq!(rec.confirmations.len(), 1);
    }

    #[test]
    fn test_expired_block_reads_as_unblocked() {
        let mut remote = RemoteState::empty(now());
        remote.block = Some(DeviceBlockState::blocked_for(now() - Duration::hours(2), 1800));
        let rec = reconcile(&remote, &DesiredState::new(), &MinuteGrid::default(), now());
        assert_eq!(find(&rec, EntityId::Blocked), Some(&StateValue::Switch(false)));
    }

    #[test]
    fn test_replaying_plan_is_idempotent() {
        let mut desired = DesiredState::new();
        desire(
            &mut desired,
            Target::LimitMinutes(Weekday::Mon),
            DesiredValue::Minutes(120),
            1,
        );
        let remote = remote_with_monday(90);
        let first = reconcile(&remote, &desired, &MinuteGrid::default(), now());
        let second = reconcile(&remote, &desired, &MinuteGrid::default(), now());
        assert_eq!(first.remote_mutations, second.remote_mutations);
    }

    #[test]
    fn test_usage_publications() {
        let mut usage = UsageSnapshot::empty(now());
        usage.today_minutes = 42;
        let pubs = usage_publications(&usage);
        match &pubs[0].value {
            StateValue::Json(v) => assert_eq!(v["today_minutes"], 42),
            other => panic!("unexpected {other:?}"),
        }
        match &pubs[1].value {
            StateValue::Json(v) => assert!(v["latest"].is_null()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
