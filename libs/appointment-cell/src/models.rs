// libs/appointment-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    /// The pet being seen.
    pub subject_id: Uuid,
    pub owner_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub notification: NotificationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// A fresh booking: `Pending`, notification eligible immediately.
    pub fn new(subject_id: Uuid, owner_id: Uuid, scheduled_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id,
            owner_id,
            scheduled_at,
            status: AppointmentStatus::Pending,
            notification: NotificationState::due_at(now),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_notification_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.notification.is_due(now)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    Expired,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Cancelled | AppointmentStatus::Completed | AppointmentStatus::Expired
        )
    }

    /// Occupies its slot and may still receive notifications.
    pub fn is_active(&self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }

    pub fn can_transition_to(&self, target: &AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, target),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Pending, Expired)
                | (Confirmed, Cancelled)
                | (Confirmed, Completed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==============================================================================
// NOTIFICATION BOOKKEEPING
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationOutcome {
    Unsent,
    Sent,
    Failed,
}

impl NotificationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationOutcome::Unsent => "unsent",
            NotificationOutcome::Sent => "sent",
            NotificationOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for NotificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationState {
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    pub last_outcome: NotificationOutcome,
}

impl NotificationState {
    pub fn due_at(at: DateTime<Utc>) -> Self {
        Self {
            next_attempt_at: Some(at),
            attempt_count: 0,
            last_outcome: NotificationOutcome::Unsent,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.last_outcome != NotificationOutcome::Failed
            && self.next_attempt_at.is_some_and(|at| at <= now)
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub subject_id: Uuid,
    pub owner_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FailedNotificationsQuery {
    pub limit: Option<usize>,
}

/// Counts from one sweep of time-based transitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub completed: usize,
    pub skipped: usize,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppointmentError {
    #[error("Appointment not found: {0}")]
    NotFound(Uuid),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Unauthorized access to appointment")]
    Unauthorized,

    #[error("Appointment store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        match err {
            AppointmentError::NotFound(id) => AppError::NotFound(format!("Appointment {} not found", id)),
            AppointmentError::ValidationError(msg) => AppError::ValidationError(msg),
            AppointmentError::Conflict(msg) => AppError::Conflict(msg),
            e @ AppointmentError::InvalidTransition { .. } => AppError::Conflict(e.to_string()),
            AppointmentError::Unauthorized => {
                AppError::Forbidden("Not authorized to act on this appointment".to_string())
            }
            AppointmentError::StoreUnavailable(msg) => AppError::Database(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn terminal_states_have_no_exits() {
        use AppointmentStatus::*;
        let all = [Pending, Confirmed, Cancelled, Completed, Expired];
        for from in [Cancelled, Completed, Expired] {
            for to in all {
                assert!(!from.can_transition_to(&to), "{} -> {} must be rejected", from, to);
            }
        }
    }

    #[test]
    fn confirmed_cannot_expire_and_pending_cannot_complete() {
        assert!(!AppointmentStatus::Confirmed.can_transition_to(&AppointmentStatus::Expired));
        assert!(!AppointmentStatus::Pending.can_transition_to(&AppointmentStatus::Completed));
        assert!(!AppointmentStatus::Confirmed.can_transition_to(&AppointmentStatus::Pending));
    }

    #[test]
    fn failed_notification_is_never_due() {
        let now = Utc::now();
        let mut state = NotificationState::due_at(now - Duration::minutes(1));
        assert!(state.is_due(now));

        state.last_outcome = NotificationOutcome::Failed;
        assert!(!state.is_due(now));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&AppointmentStatus::Expired).unwrap(), "\"expired\"");
        assert_eq!(AppointmentStatus::Confirmed.to_string(), "confirmed");
    }
}
