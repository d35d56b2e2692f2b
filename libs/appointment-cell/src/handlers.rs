// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{BookAppointmentRequest, FailedNotificationsQuery};
use crate::services::lifecycle::LifecycleManager;

const DEFAULT_FAILED_LIMIT: usize = 50;
const MAX_FAILED_LIMIT: usize = 500;

/// Shared state for the appointment routes.
pub struct AppointmentState {
    pub config: Arc<AppConfig>,
    pub lifecycle: Arc<LifecycleManager>,
}

impl AppointmentState {
    pub fn new(config: Arc<AppConfig>, lifecycle: Arc<LifecycleManager>) -> Self {
        Self { config, lifecycle }
    }
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

pub async fn book_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if !user.can_act_for(&request.owner_id.to_string()) {
        return Err(AppError::Forbidden("Not authorized to book for this owner".to_string()));
    }

    let appointment = state.lifecycle
        .create_appointment(request.subject_id, request.owner_id, request.scheduled_at)
        .await?;

    info!("User {} booked appointment {}", user.id, appointment.id);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "appointment": appointment,
        })),
    ))
}

pub async fn get_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.lifecycle.get_appointment(appointment_id).await?;

    if !user.can_act_for(&appointment.owner_id.to_string()) {
        return Err(AppError::Forbidden("Not authorized to view this appointment".to_string()));
    }

    Ok(Json(json!({ "appointment": appointment })))
}

pub async fn cancel_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let current = state.lifecycle.get_appointment(appointment_id).await?;
    let authorized = user.can_act_for(&current.owner_id.to_string());

    let appointment = state.lifecycle.cancel_appointment(appointment_id, authorized).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
    })))
}

pub async fn confirm_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let current = state.lifecycle.get_appointment(appointment_id).await?;
    let authorized = user.can_act_for(&current.owner_id.to_string());

    let appointment = state.lifecycle.confirm_appointment(appointment_id, authorized).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
    })))
}

/// Appointments whose notification gave up, for operator follow-up. Admin only.
pub async fn list_failed_notifications(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Query(query): Query<FailedNotificationsQuery>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("Admin access required".to_string()));
    }

    let limit = query.limit.unwrap_or(DEFAULT_FAILED_LIMIT).clamp(1, MAX_FAILED_LIMIT);
    let appointments = state.lifecycle.failed_notifications(limit).await?;

    Ok(Json(json!({
        "count": appointments.len(),
        "appointments": appointments,
    })))
}
