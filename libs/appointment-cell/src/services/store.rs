// libs/appointment-cell/src/services/store.rs
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::models::{Appointment, AppointmentError, AppointmentStatus, NotificationOutcome, NotificationState};
use crate::services::conflict::ConflictPolicy;

/// Durable home of appointment rows and the only shared mutable state.
///
/// Every write that depends on a prior read is a compare-and-swap: callers
/// pass what they expect to find and get [`AppointmentError::Conflict`] when
/// someone else got there first.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Inserts a new booking. Rejects `scheduled_at <= created_at` and any
    /// active booking for the same subject that the conflict policy flags.
    async fn create(&self, appointment: Appointment) -> Result<Uuid, AppointmentError>;

    async fn get(&self, id: Uuid) -> Result<Appointment, AppointmentError>;

    async fn update_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        new_status: AppointmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError>;

    /// Active appointments whose notification is due, oldest first.
    async fn due_for_notification(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Appointment>, AppointmentError>;

    /// Active appointments whose scheduled time has passed, oldest first.
    async fn due_for_transition(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Appointment>, AppointmentError>;

    /// Pushes `next_attempt_at` to `lease_until` if the notification state
    /// still matches `expected`, reserving the delivery for the caller.
    async fn claim_notification(
        &self,
        id: Uuid,
        expected: &NotificationState,
        lease_until: DateTime<Utc>,
    ) -> Result<NotificationState, AppointmentError>;

    /// Writes a delivery outcome, guarded by the attempt count the caller claimed.
    async fn record_notification_outcome(
        &self,
        id: Uuid,
        expected_attempt_count: u32,
        state: NotificationState,
    ) -> Result<(), AppointmentError>;

    async fn failed_notifications(&self, limit: usize) -> Result<Vec<Appointment>, AppointmentError>;
}

pub(crate) fn validate_new(appointment: &Appointment) -> Result<(), AppointmentError> {
    if appointment.status != AppointmentStatus::Pending {
        return Err(AppointmentError::ValidationError(format!(
            "New appointments must start pending, got {}",
            appointment.status
        )));
    }
    if appointment.scheduled_at <= appointment.created_at {
        return Err(AppointmentError::ValidationError(
            "Appointment must be scheduled for a future time".to_string(),
        ));
    }
    Ok(())
}

pub struct InMemoryAppointmentStore {
    appointments: RwLock<HashMap<Uuid, Appointment>>,
    policy: ConflictPolicy,
}

impl InMemoryAppointmentStore {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            appointments: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub async fn len(&self) -> usize {
        self.appointments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.appointments.read().await.is_empty()
    }
}

impl Default for InMemoryAppointmentStore {
    fn default() -> Self {
        Self::new(ConflictPolicy::default())
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn create(&self, appointment: Appointment) -> Result<Uuid, AppointmentError> {
        validate_new(&appointment)?;

        let mut appointments = self.appointments.write().await;

        if appointments.contains_key(&appointment.id) {
            return Err(AppointmentError::Conflict(format!("Appointment {} already exists", appointment.id)));
        }

        if let Some(existing) = self.policy.find_conflict(&appointment, appointments.values()) {
            debug!("Subject {} already booked by {}", appointment.subject_id, existing.id);
            return Err(AppointmentError::Conflict(format!(
                "Subject {} already has an appointment at {}",
                appointment.subject_id, existing.scheduled_at
            )));
        }

        let id = appointment.id;
        appointments.insert(id, appointment);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        self.appointments
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(AppointmentError::NotFound(id))
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        new_status: AppointmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let mut appointments = self.appointments.write().await;
        let appointment = appointments.get_mut(&id).ok_or(AppointmentError::NotFound(id))?;

        if appointment.status != expected {
            return Err(AppointmentError::Conflict(format!(
                "Appointment {} is {}, expected {}",
                id, appointment.status, expected
            )));
        }

        appointment.status = new_status;
        appointment.updated_at = at;
        Ok(appointment.clone())
    }

    async fn due_for_notification(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Appointment>, AppointmentError> {
        let appointments = self.appointments.read().await;
        let mut due: Vec<Appointment> = appointments
            .values()
            .filter(|a| a.is_notification_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|a| (a.notification.next_attempt_at, a.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn due_for_transition(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Appointment>, AppointmentError> {
        let appointments = self.appointments.read().await;
        let mut due: Vec<Appointment> = appointments
            .values()
            .filter(|a| a.is_active() && a.scheduled_at < now)
            .cloned()
            .collect();
        due.sort_by_key(|a| (a.scheduled_at, a.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn claim_notification(
        &self,
        id: Uuid,
        expected: &NotificationState,
        lease_until: DateTime<Utc>,
    ) -> Result<NotificationState, AppointmentError> {
        let mut appointments = self.appointments.write().await;
        let appointment = appointments.get_mut(&id).ok_or(AppointmentError::NotFound(id))?;

        if appointment.notification != *expected || !appointment.is_active() {
            return Err(AppointmentError::Conflict(format!("Notification for {} already claimed", id)));
        }

        appointment.notification.next_attempt_at = Some(lease_until);
        Ok(appointment.notification.clone())
    }

    async fn record_notification_outcome(
        &self,
        id: Uuid,
        expected_attempt_count: u32,
        state: NotificationState,
    ) -> Result<(), AppointmentError> {
        let mut appointments = self.appointments.write().await;
        let appointment = appointments.get_mut(&id).ok_or(AppointmentError::NotFound(id))?;

        if appointment.notification.attempt_count != expected_attempt_count {
            return Err(AppointmentError::Conflict(format!(
                "Notification for {} moved to attempt {}",
                id, appointment.notification.attempt_count
            )));
        }

        appointment.notification = state;
        Ok(())
    }

    async fn failed_notifications(&self, limit: usize) -> Result<Vec<Appointment>, AppointmentError> {
        let appointments = self.appointments.read().await;
        let mut failed: Vec<Appointment> = appointments
            .values()
            .filter(|a| a.notification.last_outcome == NotificationOutcome::Failed)
            .cloned()
            .collect();
        failed.sort_by_key(|a| (a.scheduled_at, a.id));
        failed.truncate(limit);
        Ok(failed)
    }
}
