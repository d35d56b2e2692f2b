// libs/appointment-cell/src/services/lifecycle.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::BookingSettings;

use crate::models::{Appointment, AppointmentError, AppointmentStatus, NotificationState, SweepReport};
use crate::services::clock::Clock;
use crate::services::store::AppointmentStore;

/// How many times a client-driven transition re-reads after losing a CAS race.
const MAX_CAS_RETRIES: usize = 3;

/// Owns every status change an appointment goes through.
///
/// Client-facing calls (`create`, `confirm`, `cancel`) and the scheduler's
/// time-driven calls (`sweep_time_transitions`, `mark_notified`) all land on
/// the store's compare-and-swap, so concurrent writers resolve to a single
/// winner. The scheduler's notification bookkeeping goes through here too;
/// nothing outside this type holds the store.
pub struct LifecycleManager {
    store: Arc<dyn AppointmentStore>,
    clock: Arc<dyn Clock>,
    max_horizon: Duration,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn AppointmentStore>, clock: Arc<dyn Clock>, settings: &BookingSettings) -> Self {
        Self {
            store,
            clock,
            max_horizon: Duration::days(settings.max_horizon_days),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        if !current_status.can_transition_to(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidTransition {
                from: current_status,
                to: new_status,
            });
        }
        Ok(())
    }

    /// Validate appointment timing constraints
    pub fn validate_appointment_timing(
        &self,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        if scheduled_at <= now {
            return Err(AppointmentError::ValidationError(
                "Appointment must be scheduled for a future time".to_string(),
            ));
        }
        if scheduled_at > now + self.max_horizon {
            return Err(AppointmentError::ValidationError(format!(
                "Appointment cannot be scheduled more than {} days ahead",
                self.max_horizon.num_days()
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn create_appointment(
        &self,
        subject_id: Uuid,
        owner_id: Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        if subject_id.is_nil() || owner_id.is_nil() {
            return Err(AppointmentError::ValidationError("Subject and owner ids are required".to_string()));
        }

        let now = self.clock.now();
        self.validate_appointment_timing(scheduled_at, now)?;

        let appointment = Appointment::new(subject_id, owner_id, scheduled_at, now);
        self.store.create(appointment.clone()).await?;

        info!("Appointment {} booked for subject {} at {}", appointment.id, subject_id, scheduled_at);
        Ok(appointment)
    }

    pub async fn get_appointment(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store.get(id).await
    }

    /// Moves the appointment to `Cancelled`. Already-cancelled counts as success.
    #[instrument(skip(self))]
    pub async fn cancel_appointment(&self, id: Uuid, authorized: bool) -> Result<Appointment, AppointmentError> {
        if !authorized {
            return Err(AppointmentError::Unauthorized);
        }

        for _ in 0..MAX_CAS_RETRIES {
            let current = self.store.get(id).await?;
            let now = self.clock.now();

            match current.status {
                AppointmentStatus::Cancelled => {
                    debug!("Appointment {} already cancelled", id);
                    return Ok(current);
                }
                AppointmentStatus::Confirmed if current.scheduled_at <= now => {
                    return Err(AppointmentError::InvalidTransition {
                        from: current.status,
                        to: AppointmentStatus::Cancelled,
                    });
                }
                status => self.validate_status_transition(status, AppointmentStatus::Cancelled)?,
            }

            match self.store.update_status(id, current.status, AppointmentStatus::Cancelled, now).await {
                Ok(cancelled) => {
                    info!("Appointment {} cancelled (was {})", id, current.status);
                    return Ok(cancelled);
                }
                Err(AppointmentError::Conflict(reason)) => {
                    debug!("Cancel of {} raced another writer: {}", id, reason);
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppointmentError::Conflict(format!("Appointment {} is changing too quickly, try again", id)))
    }

    /// Explicit acknowledgement. Already-confirmed counts as success.
    #[instrument(skip(self))]
    pub async fn confirm_appointment(&self, id: Uuid, authorized: bool) -> Result<Appointment, AppointmentError> {
        if !authorized {
            return Err(AppointmentError::Unauthorized);
        }

        let current = self.store.get(id).await?;
        if current.status == AppointmentStatus::Confirmed {
            return Ok(current);
        }
        self.validate_status_transition(current.status, AppointmentStatus::Confirmed)?;

        // Past its start a pending appointment belongs to the sweep, which expires it.
        let now = self.clock.now();
        if current.scheduled_at <= now {
            return Err(AppointmentError::InvalidTransition {
                from: current.status,
                to: AppointmentStatus::Confirmed,
            });
        }

        match self.store
            .update_status(id, AppointmentStatus::Pending, AppointmentStatus::Confirmed, now)
            .await
        {
            Ok(confirmed) => {
                info!("Appointment {} confirmed by request", id);
                Ok(confirmed)
            }
            Err(AppointmentError::Conflict(_)) => {
                // The scheduler may have confirmed it in between.
                let latest = self.store.get(id).await?;
                if latest.status == AppointmentStatus::Confirmed {
                    Ok(latest)
                } else {
                    Err(AppointmentError::InvalidTransition {
                        from: latest.status,
                        to: AppointmentStatus::Confirmed,
                    })
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Scheduler entry point: `Pending -> Confirmed` after a delivered notification.
    /// Returns `false` when the appointment had already moved on or its start
    /// time has passed.
    pub async fn mark_notified(&self, id: Uuid) -> Result<bool, AppointmentError> {
        let current = self.store.get(id).await?;
        let now = self.clock.now();
        if current.status != AppointmentStatus::Pending || current.scheduled_at <= now {
            debug!("Appointment {} not confirmed by notification (status {})", id, current.status);
            return Ok(false);
        }

        match self.store
            .update_status(id, AppointmentStatus::Pending, AppointmentStatus::Confirmed, now)
            .await
        {
            Ok(_) => {
                info!("Appointment {} confirmed after notification", id);
                Ok(true)
            }
            Err(AppointmentError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Scheduler entry point: expires or completes appointments whose time has passed.
    /// Lost CAS races are counted as skipped; any other store error aborts the sweep.
    #[instrument(skip(self))]
    pub async fn sweep_time_transitions(&self, now: DateTime<Utc>, limit: usize) -> Result<SweepReport, AppointmentError> {
        let mut report = SweepReport::default();

        for appointment in self.store.due_for_transition(now, limit).await? {
            let target = match appointment.status {
                AppointmentStatus::Pending => AppointmentStatus::Expired,
                AppointmentStatus::Confirmed => AppointmentStatus::Completed,
                _ => continue,
            };

            match self.store.update_status(appointment.id, appointment.status, target, now).await {
                Ok(_) => {
                    debug!("Appointment {} moved {} -> {}", appointment.id, appointment.status, target);
                    match target {
                        AppointmentStatus::Expired => report.expired += 1,
                        _ => report.completed += 1,
                    }
                }
                Err(AppointmentError::Conflict(_)) | Err(AppointmentError::NotFound(_)) => {
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    /// Scheduler entry point: active appointments whose notification is due.
    pub async fn due_for_notification(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Appointment>, AppointmentError> {
        self.store.due_for_notification(now, limit).await
    }

    /// Scheduler entry point: leases the notification until `lease_until` if
    /// nobody else touched it since `expected` was read.
    pub async fn claim_notification(
        &self,
        id: Uuid,
        expected: &NotificationState,
        lease_until: DateTime<Utc>,
    ) -> Result<NotificationState, AppointmentError> {
        self.store.claim_notification(id, expected, lease_until).await
    }

    pub async fn record_notification_outcome(
        &self,
        id: Uuid,
        expected_attempt_count: u32,
        state: NotificationState,
    ) -> Result<(), AppointmentError> {
        self.store.record_notification_outcome(id, expected_attempt_count, state).await
    }

    pub async fn failed_notifications(&self, limit: usize) -> Result<Vec<Appointment>, AppointmentError> {
        self.store.failed_notifications(limit).await
    }
}
