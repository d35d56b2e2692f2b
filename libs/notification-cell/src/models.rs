use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use appointment_cell::{Appointment, AppointmentStatus, SweepReport};

// ==============================================================================
// TEMPLATES
// ==============================================================================

/// Sent for a fresh booking; delivery confirms the appointment.
pub const CONFIRMATION_TEMPLATE: &str = "appointment_confirmation";
/// Sent when the owner confirmed by hand before the first delivery went out.
pub const REMINDER_TEMPLATE: &str = "appointment_reminder";

pub fn template_for(status: AppointmentStatus) -> Option<&'static str> {
    match status {
        AppointmentStatus::Pending => Some(CONFIRMATION_TEMPLATE),
        AppointmentStatus::Confirmed => Some(REMINDER_TEMPLATE),
        _ => None,
    }
}

pub fn payload_for(appointment: &Appointment) -> Value {
    json!({
        "appointment_id": appointment.id,
        "subject_id": appointment.subject_id,
        "owner_id": appointment.owner_id,
        "scheduled_at": appointment.scheduled_at,
    })
}

// ==============================================================================
// DELIVERY
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Success,
    /// Worth another attempt after backoff.
    TransientFailure(String),
    /// Retrying cannot help, e.g. the recipient address is invalid.
    FatalFailure(String),
}

impl DeliveryResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryResult::Success)
    }
}

/// Body of `POST /v1/messages` on the mail API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub template_id: String,
    pub data: Value,
}

/// What happened to a single due appointment during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered,
    Retrying,
    Failed,
    /// Claimed or changed by someone else first.
    Skipped,
}

// ==============================================================================
// TICK REPORT
// ==============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub expired: usize,
    pub completed: usize,
    pub delivered: usize,
    pub retried: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl TickReport {
    pub fn from_sweep(sweep: &SweepReport) -> Self {
        Self {
            expired: sweep.expired,
            completed: sweep.completed,
            skipped: sweep.skipped,
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: AttemptOutcome) {
        match outcome {
            AttemptOutcome::Delivered => self.delivered += 1,
            AttemptOutcome::Retrying => self.retried += 1,
            AttemptOutcome::Failed => self.failed += 1,
            AttemptOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_have_no_template() {
        assert_eq!(template_for(AppointmentStatus::Pending), Some(CONFIRMATION_TEMPLATE));
        assert_eq!(template_for(AppointmentStatus::Confirmed), Some(REMINDER_TEMPLATE));
        assert_eq!(template_for(AppointmentStatus::Expired), None);
        assert_eq!(template_for(AppointmentStatus::Cancelled), None);
    }

    #[test]
    fn tick_report_counts_outcomes() {
        let mut report = TickReport::from_sweep(&SweepReport { expired: 1, completed: 0, skipped: 2 });
        report.record(AttemptOutcome::Delivered);
        report.record(AttemptOutcome::Skipped);

        assert_eq!(report.expired, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 3);
        assert!(!report.is_empty());
        assert!(TickReport::default().is_empty());
    }
}
