// libs/appointment-cell/src/services/conflict.rs
use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use shared_config::BookingSettings;

use crate::models::Appointment;

/// Decides whether two bookings for the same subject collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Both fall into the same fixed calendar slot of `slot_minutes`,
    /// counted from midnight UTC.
    SameSlot { slot_minutes: i64 },
    /// Start times are less than `minutes` apart.
    Window { minutes: i64 },
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy::SameSlot { slot_minutes: 30 }
    }
}

impl ConflictPolicy {
    pub fn from_settings(settings: &BookingSettings) -> Self {
        let minutes = settings.conflict_minutes.max(1);
        match settings.conflict_mode.as_str() {
            "window" => ConflictPolicy::Window { minutes },
            "slot" => ConflictPolicy::SameSlot { slot_minutes: minutes },
            other => {
                warn!("Unknown conflict mode {:?}, falling back to slot", other);
                ConflictPolicy::SameSlot { slot_minutes: minutes }
            }
        }
    }

    pub fn conflicts(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        match *self {
            ConflictPolicy::SameSlot { slot_minutes } => {
                let width = slot_minutes.max(1) * 60;
                a.timestamp().div_euclid(width) == b.timestamp().div_euclid(width)
            }
            ConflictPolicy::Window { minutes } => (a - b).abs() < Duration::minutes(minutes),
        }
    }

    /// Half-open range `[from, to)` that covers every start time that could
    /// conflict with `at`. Used to narrow store lookups before applying
    /// [`conflicts`](Self::conflicts).
    pub fn search_range(&self, at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match *self {
            ConflictPolicy::SameSlot { slot_minutes } => {
                let width = slot_minutes.max(1) * 60;
                let start = at.timestamp().div_euclid(width) * width;
                let from = DateTime::<Utc>::from_timestamp(start, 0).unwrap_or(at);
                (from, from + Duration::seconds(width))
            }
            ConflictPolicy::Window { minutes } => {
                (at - Duration::minutes(minutes), at + Duration::minutes(minutes))
            }
        }
    }

    /// Interval `[start, end)` this booking holds for its subject. Two bookings
    /// conflict exactly when their reservations overlap, which lets the store
    /// enforce the policy with a single exclusion constraint.
    pub fn reservation(&self, at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match *self {
            ConflictPolicy::SameSlot { .. } => self.search_range(at),
            ConflictPolicy::Window { minutes } => (at, at + Duration::minutes(minutes)),
        }
    }

    /// First active appointment for the same subject that collides with `candidate`.
    pub fn find_conflict<'a, I>(&self, candidate: &Appointment, existing: I) -> Option<&'a Appointment>
    where
        I: IntoIterator<Item = &'a Appointment>,
    {
        existing.into_iter().find(|other| {
            other.id != candidate.id
                && other.subject_id == candidate.subject_id
                && other.is_active()
                && self.conflicts(other.scheduled_at, candidate.scheduled_at)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    #[test]
    fn same_slot_uses_calendar_boundaries() {
        let policy = ConflictPolicy::SameSlot { slot_minutes: 30 };
        assert!(policy.conflicts(at(10, 0), at(10, 29)));
        assert!(!policy.conflicts(at(10, 29), at(10, 31)));
        assert_eq!(policy.search_range(at(10, 17)), (at(10, 0), at(10, 30)));
    }

    #[test]
    fn window_is_symmetric_and_exclusive() {
        let policy = ConflictPolicy::Window { minutes: 45 };
        assert!(policy.conflicts(at(10, 0), at(10, 44)));
        assert!(policy.conflicts(at(10, 44), at(10, 0)));
        assert!(!policy.conflicts(at(10, 0), at(10, 45)));
    }

    #[test]
    fn reservations_overlap_exactly_when_bookings_conflict() {
        let overlap = |policy: ConflictPolicy, a, b| {
            let (a_start, a_end) = policy.reservation(a);
            let (b_start, b_end) = policy.reservation(b);
            a_start < b_end && b_start < a_end
        };

        for policy in [ConflictPolicy::SameSlot { slot_minutes: 30 }, ConflictPolicy::Window { minutes: 45 }] {
            for (a, b) in [(at(10, 0), at(10, 29)), (at(10, 29), at(10, 31)), (at(10, 0), at(10, 44)), (at(10, 0), at(10, 45))] {
                assert_eq!(overlap(policy, a, b), policy.conflicts(a, b), "{:?} {} {}", policy, a, b);
            }
        }
    }

    #[test]
    fn settings_select_mode() {
        let settings = BookingSettings {
            max_horizon_days: 30,
            conflict_mode: "window".to_string(),
            conflict_minutes: 20,
        };
        assert_eq!(ConflictPolicy::from_settings(&settings), ConflictPolicy::Window { minutes: 20 });
        assert_eq!(
            ConflictPolicy::from_settings(&BookingSettings::default()),
            ConflictPolicy::SameSlot { slot_minutes: 30 }
        );
    }
}
