// libs/appointment-cell/src/services/supabase_store.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Method, StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{SupabaseClient, SupabaseError};

use crate::models::{Appointment, AppointmentError, AppointmentStatus, NotificationOutcome, NotificationState};
use crate::services::conflict::ConflictPolicy;
use crate::services::store::{validate_new, AppointmentStore};

const TABLE: &str = "/rest/v1/appointments";
const ACTIVE_FILTER: &str = "status=in.(pending,confirmed)";

/// Flat row layout of the `appointments` table.
///
/// Expected indexes: primary key on `id`, `(subject_id, scheduled_at)` for
/// conflict lookups and `next_attempt_at` for the due query.
///
/// Double booking is prevented by the table itself. Each row carries the
/// `[slot_start, slot_end)` interval it reserves (see
/// [`ConflictPolicy::reservation`]) and the table needs:
///
/// ```sql
/// create extension if not exists btree_gist;
/// alter table appointments add constraint appointments_no_double_booking
///     exclude using gist (subject_id with =, tstzrange(slot_start, slot_end) with &&)
///     where (status in ('pending', 'confirmed'));
/// ```
///
/// A losing insert fails with 409, which surfaces as
/// [`AppointmentError::Conflict`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AppointmentRow {
    id: Uuid,
    subject_id: Uuid,
    owner_id: Uuid,
    scheduled_at: DateTime<Utc>,
    status: AppointmentStatus,
    next_attempt_at: Option<DateTime<Utc>>,
    attempt_count: u32,
    last_outcome: NotificationOutcome,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Insert payload: the row plus the interval it reserves.
#[derive(Debug, Serialize)]
struct NewAppointmentRow {
    #[serde(flatten)]
    row: AppointmentRow,
    slot_start: DateTime<Utc>,
    slot_end: DateTime<Utc>,
}

impl From<&Appointment> for AppointmentRow {
    fn from(a: &Appointment) -> Self {
        Self {
            id: a.id,
            subject_id: a.subject_id,
            owner_id: a.owner_id,
            scheduled_at: a.scheduled_at,
            status: a.status,
            next_attempt_at: a.notification.next_attempt_at,
            attempt_count: a.notification.attempt_count,
            last_outcome: a.notification.last_outcome,
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

impl From<AppointmentRow> for Appointment {
    fn from(row: AppointmentRow) -> Self {
        Self {
            id: row.id,
            subject_id: row.subject_id,
            owner_id: row.owner_id,
            scheduled_at: row.scheduled_at,
            status: row.status,
            notification: NotificationState {
                next_attempt_at: row.next_attempt_at,
                attempt_count: row.attempt_count,
                last_outcome: row.last_outcome,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn ts(at: DateTime<Utc>) -> String {
    urlencoding::encode(&at.to_rfc3339_opts(SecondsFormat::Micros, true)).into_owned()
}

fn map_error(err: SupabaseError) -> AppointmentError {
    if err.is_conflict() {
        return AppointmentError::Conflict(err.to_string());
    }
    match err.status() {
        Some(StatusCode::BAD_REQUEST) | Some(StatusCode::UNPROCESSABLE_ENTITY) => {
            AppointmentError::ValidationError(err.to_string())
        }
        _ => AppointmentError::StoreUnavailable(err.to_string()),
    }
}

fn return_representation() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Prefer", HeaderValue::from_static("return=representation"));
    headers
}

pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
    service_key: String,
    policy: ConflictPolicy,
}

impl SupabaseAppointmentStore {
    pub fn new(config: &AppConfig, policy: ConflictPolicy) -> Self {
        Self::with_client(
            Arc::new(SupabaseClient::new(config)),
            config.supabase_service_role_key.clone(),
            policy,
        )
    }

    pub fn with_client(supabase: Arc<SupabaseClient>, service_key: String, policy: ConflictPolicy) -> Self {
        Self { supabase, service_key, policy }
    }

    async fn select(&self, query: &str) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!("{}?{}", TABLE, query);
        let rows: Vec<AppointmentRow> = self.supabase
            .request(Method::GET, &path, Some(&self.service_key), None)
            .await
            .map_err(map_error)?;
        Ok(rows.into_iter().map(Appointment::from).collect())
    }

    /// Filtered PATCH; returns the rows that matched the filter.
    async fn patch(&self, query: &str, body: serde_json::Value) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!("{}?{}", TABLE, query);
        let rows: Vec<AppointmentRow> = self.supabase
            .request_with_headers(Method::PATCH, &path, Some(&self.service_key), Some(body), return_representation())
            .await
            .map_err(map_error)?;
        Ok(rows.into_iter().map(Appointment::from).collect())
    }

    /// Explains why a guarded PATCH matched nothing.
    async fn guard_failed(&self, id: Uuid, what: &str) -> AppointmentError {
        match self.get(id).await {
            Ok(_) => AppointmentError::Conflict(format!("{} for appointment {} lost a concurrent update", what, id)),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    #[instrument(skip(self, appointment), fields(appointment_id = %appointment.id))]
    async fn create(&self, appointment: Appointment) -> Result<Uuid, AppointmentError> {
        validate_new(&appointment)?;

        // Cheap early rejection with a readable message. The insert below is
        // what actually guards against a concurrent booking.
        let (from, to) = self.policy.search_range(appointment.scheduled_at);
        let nearby = self.select(&format!(
            "subject_id=eq.{}&{}&scheduled_at=gte.{}&scheduled_at=lt.{}",
            appointment.subject_id, ACTIVE_FILTER, ts(from), ts(to)
        )).await?;

        if let Some(existing) = self.policy.find_conflict(&appointment, nearby.iter()) {
            debug!("Subject {} already booked by {}", appointment.subject_id, existing.id);
            return Err(AppointmentError::Conflict(format!(
                "Subject {} already has an appointment at {}",
                appointment.subject_id, existing.scheduled_at
            )));
        }

        let (slot_start, slot_end) = self.policy.reservation(appointment.scheduled_at);
        let body = serde_json::to_value(NewAppointmentRow {
            row: AppointmentRow::from(&appointment),
            slot_start,
            slot_end,
        })
        .map_err(|e| AppointmentError::ValidationError(e.to_string()))?;

        let created: Vec<AppointmentRow> = match self.supabase
            .request_with_headers(Method::POST, TABLE, Some(&self.service_key), Some(body), return_representation())
            .await
        {
            Ok(rows) => rows,
            Err(e) if e.is_conflict() => {
                debug!("Insert of {} rejected by the booking constraint: {}", appointment.id, e);
                return Err(AppointmentError::Conflict(format!(
                    "Subject {} already has an appointment near {}",
                    appointment.subject_id, appointment.scheduled_at
                )));
            }
            Err(e) => return Err(map_error(e)),
        };

        match created.into_iter().next() {
            Some(row) => Ok(row.id),
            None => {
                warn!("Insert of appointment {} returned no representation", appointment.id);
                Ok(appointment.id)
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        self.select(&format!("id=eq.{}", id))
            .await?
            .into_iter()
            .next()
            .ok_or(AppointmentError::NotFound(id))
    }

    #[instrument(skip(self))]
    async fn update_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        new_status: AppointmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let updated = self.patch(
            &format!("id=eq.{}&status=eq.{}", id, expected),
            json!({ "status": new_status, "updated_at": at }),
        ).await?;

        match updated.into_iter().next() {
            Some(appointment) => Ok(appointment),
            None => Err(self.guard_failed(id, "Status change").await),
        }
    }

    async fn due_for_notification(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Appointment>, AppointmentError> {
        self.select(&format!(
            "{}&last_outcome=neq.failed&next_attempt_at=lte.{}&order=next_attempt_at.asc&limit={}",
            ACTIVE_FILTER, ts(now), limit
        )).await
    }

    async fn due_for_transition(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Appointment>, AppointmentError> {
        self.select(&format!(
            "{}&scheduled_at=lt.{}&order=scheduled_at.asc&limit={}",
            ACTIVE_FILTER, ts(now), limit
        )).await
    }

    #[instrument(skip(self, expected))]
    async fn claim_notification(
        &self,
        id: Uuid,
        expected: &NotificationState,
        lease_until: DateTime<Utc>,
    ) -> Result<NotificationState, AppointmentError> {
        let next_attempt_filter = match expected.next_attempt_at {
            Some(at) => format!("eq.{}", ts(at)),
            None => "is.null".to_string(),
        };
        let claimed = self.patch(
            &format!(
                "id=eq.{}&{}&attempt_count=eq.{}&last_outcome=eq.{}&next_attempt_at={}",
                id, ACTIVE_FILTER, expected.attempt_count, expected.last_outcome, next_attempt_filter
            ),
            json!({ "next_attempt_at": lease_until }),
        ).await?;

        match claimed.into_iter().next() {
            Some(appointment) => Ok(appointment.notification),
            None => Err(self.guard_failed(id, "Notification claim").await),
        }
    }

    #[instrument(skip(self, state))]
    async fn record_notification_outcome(
        &self,
        id: Uuid,
        expected_attempt_count: u32,
        state: NotificationState,
    ) -> Result<(), AppointmentError> {
        let updated = self.patch(
            &format!("id=eq.{}&attempt_count=eq.{}", id, expected_attempt_count),
            json!({
                "next_attempt_at": state.next_attempt_at,
                "attempt_count": state.attempt_count,
                "last_outcome": state.last_outcome,
            }),
        ).await?;

        if updated.is_empty() {
            return Err(self.guard_failed(id, "Notification outcome").await);
        }
        Ok(())
    }

    async fn failed_notifications(&self, limit: usize) -> Result<Vec<Appointment>, AppointmentError> {
        self.select(&format!("last_outcome=eq.failed&order=scheduled_at.asc&limit={}", limit)).await
    }
}
