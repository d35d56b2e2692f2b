// =====================================================================================
// APPOINTMENT CELL - BOOKING & LIFECYCLE
// =====================================================================================
//
// Appointment records for pets, the status state machine that governs them,
// and the store abstraction the notification scheduler shares with the
// booking API.
//
// =====================================================================================

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{
    Appointment, AppointmentError, AppointmentStatus, NotificationOutcome, NotificationState, SweepReport,
};
pub use services::{
    AppointmentStore, Clock, ConflictPolicy, InMemoryAppointmentStore, LifecycleManager, ManualClock,
    SupabaseAppointmentStore, SystemClock,
};
pub use handlers::AppointmentState;
pub use router::appointment_routes;
