use chrono::{DateTime, Duration, Utc};

use appointment_cell::{NotificationOutcome, NotificationState};
use shared_config::SchedulerSettings;

use crate::models::DeliveryResult;

/// Exponential backoff with a ceiling on attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&SchedulerSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::seconds(settings.backoff_base_seconds.max(0)),
            max_delay: Duration::seconds(settings.backoff_max_seconds.max(0)),
        }
    }

    /// Delay before attempt `attempt + 1`: `base * 2^(attempt - 1)`, capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30);
        let delay = self
            .base_delay
            .num_seconds()
            .saturating_mul(1_i64 << exponent);
        Duration::seconds(delay.min(self.max_delay.num_seconds()))
    }

    /// Notification state to persist after an attempt that started from `claimed`.
    pub fn next_state(
        &self,
        claimed: &NotificationState,
        result: &DeliveryResult,
        now: DateTime<Utc>,
    ) -> NotificationState {
        match result {
            DeliveryResult::Success => NotificationState {
                next_attempt_at: None,
                attempt_count: claimed.attempt_count,
                last_outcome: NotificationOutcome::Sent,
            },
            DeliveryResult::TransientFailure(_) => {
                let attempt_count = claimed.attempt_count + 1;
                if attempt_count >= self.max_attempts {
                    NotificationState {
                        next_attempt_at: None,
                        attempt_count,
                        last_outcome: NotificationOutcome::Failed,
                    }
                } else {
                    NotificationState {
                        next_attempt_at: Some(now + self.delay_for_attempt(attempt_count)),
                        attempt_count,
                        last_outcome: NotificationOutcome::Unsent,
                    }
                }
            }
            DeliveryResult::FatalFailure(_) => NotificationState {
                next_attempt_at: None,
                attempt_count: claimed.attempt_count + 1,
                last_outcome: NotificationOutcome::Failed,
            },
        }
    }
}
