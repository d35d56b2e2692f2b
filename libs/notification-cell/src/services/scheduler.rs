use std::sync::Arc;

use chrono::Duration;
use tokio::sync::watch;
use tokio::time::{interval, timeout, Duration as StdDuration, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use appointment_cell::{Appointment, AppointmentError, AppointmentStatus, LifecycleManager};
use shared_config::SchedulerSettings;

use crate::error::NotificationError;
use crate::models::{payload_for, template_for, AttemptOutcome, DeliveryResult, TickReport};
use crate::services::gateway::NotificationGateway;
use crate::services::recipients::RecipientDirectory;
use crate::services::retry::RetryPolicy;

/// Background loop that moves appointments through time-based transitions
/// and delivers their notifications.
///
/// Holds no state between ticks. Everything it needs is re-read from the
/// store, so several instances can run against one store and a restart
/// resumes where the last run stopped.
pub struct SchedulerLoop {
    lifecycle: Arc<LifecycleManager>,
    gateway: Arc<dyn NotificationGateway>,
    recipients: Arc<dyn RecipientDirectory>,
    retry: RetryPolicy,
    settings: SchedulerSettings,
    shutdown_tx: watch::Sender<bool>,
}

impl SchedulerLoop {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        gateway: Arc<dyn NotificationGateway>,
        recipients: Arc<dyn RecipientDirectory>,
        settings: &SchedulerSettings,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            lifecycle,
            gateway,
            recipients,
            retry: RetryPolicy::from_settings(settings),
            settings: settings.clone(),
            shutdown_tx,
        }
    }

    /// Runs ticks until [`shutdown`](Self::shutdown) is called. Tick errors
    /// are logged and the loop carries on.
    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut ticker = interval(StdDuration::from_secs(self.settings.tick_interval_seconds.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Notification scheduler started (every {}s, batch {})",
            self.settings.tick_interval_seconds, self.settings.batch_size
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(report) if !report.is_empty() => info!(?report, "Scheduler tick finished"),
                        Ok(_) => debug!("Scheduler tick found nothing to do"),
                        Err(e) if e.is_store_unavailable() => warn!("Store unavailable, retrying next tick: {}", e),
                        Err(e) => error!("Scheduler tick failed: {}", e),
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Notification scheduler stopped");
    }

    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// One pass: sweep time-based transitions, then work through a bounded
    /// batch of due notifications. A store error aborts the pass.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<TickReport, NotificationError> {
        let now = self.lifecycle.now();

        let sweep = self.lifecycle
            .sweep_time_transitions(now, self.settings.sweep_batch_size)
            .await?;
        let mut report = TickReport::from_sweep(&sweep);

        let due = self.lifecycle
            .due_for_notification(now, self.settings.batch_size)
            .await?;

        for appointment in due {
            let outcome = self.attempt(appointment).await?;
            report.record(outcome);
        }

        Ok(report)
    }

    #[instrument(skip(self, appointment), fields(appointment_id = %appointment.id))]
    async fn attempt(&self, appointment: Appointment) -> Result<AttemptOutcome, NotificationError> {
        let Some(template_id) = template_for(appointment.status) else {
            return Ok(AttemptOutcome::Skipped);
        };

        // Started but not yet swept (sweep batch exhausted); the next sweep settles it.
        let now = self.lifecycle.now();
        if appointment.scheduled_at <= now {
            debug!("Appointment {} already started, leaving it to the sweep", appointment.id);
            return Ok(AttemptOutcome::Skipped);
        }

        let lease_until = now + Duration::seconds(self.settings.claim_lease_seconds.max(1));

        let claimed = match self.lifecycle
            .claim_notification(appointment.id, &appointment.notification, lease_until)
            .await
        {
            Ok(claimed) => claimed,
            Err(AppointmentError::Conflict(_)) | Err(AppointmentError::NotFound(_)) => {
                debug!("Appointment {} claimed elsewhere", appointment.id);
                return Ok(AttemptOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        let result = self.deliver(template_id, &appointment).await;
        let next = self.retry.next_state(&claimed, &result, self.lifecycle.now());

        if result.is_success() && appointment.status == AppointmentStatus::Pending {
            match self.lifecycle.mark_notified(appointment.id).await {
                Ok(_) => {}
                Err(AppointmentError::NotFound(_)) => return Ok(AttemptOutcome::Skipped),
                Err(e) => return Err(e.into()),
            }
        }

        // Written last: a crash before this point leaves the lease to expire
        // and the attempt is repeated.
        match self.lifecycle
            .record_notification_outcome(appointment.id, claimed.attempt_count, next.clone())
            .await
        {
            Ok(()) => {}
            Err(AppointmentError::Conflict(reason)) => {
                warn!("Outcome for {} discarded: {}", appointment.id, reason);
                return Ok(AttemptOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        }

        let outcome = match result {
            DeliveryResult::Success => AttemptOutcome::Delivered,
            DeliveryResult::TransientFailure(reason) if next.next_attempt_at.is_some() => {
                info!(
                    "Delivery for {} failed (attempt {}/{}), retrying at {:?}: {}",
                    appointment.id, next.attempt_count, self.retry.max_attempts, next.next_attempt_at, reason
                );
                AttemptOutcome::Retrying
            }
            DeliveryResult::TransientFailure(reason) | DeliveryResult::FatalFailure(reason) => {
                warn!("Giving up on notification for {}: {}", appointment.id, reason);
                AttemptOutcome::Failed
            }
        };
        Ok(outcome)
    }

    /// Looks up the recipient and sends, both under one deadline so a stuck
    /// directory cannot hold the tick any more than a stuck gateway can.
    async fn deliver(&self, template_id: &str, appointment: &Appointment) -> DeliveryResult {
        let limit = StdDuration::from_secs(self.settings.delivery_timeout_seconds.max(1));

        let send = async {
            let recipient = match self.recipients.resolve(appointment.owner_id).await {
                Ok(Some(recipient)) => recipient,
                Ok(None) => {
                    return DeliveryResult::FatalFailure(format!("no address for owner {}", appointment.owner_id))
                }
                Err(e) => return DeliveryResult::TransientFailure(e.to_string()),
            };
            let payload = payload_for(appointment);
            self.gateway.send(template_id, &recipient, &payload).await
        };

        match timeout(limit, send).await {
            Ok(result) => result,
            Err(_) => DeliveryResult::TransientFailure(format!(
                "delivery timed out after {}s",
                limit.as_secs()
            )),
        }
    }
}
