use thiserror::Error;

use appointment_cell::AppointmentError;
use shared_database::SupabaseError;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Appointment store error: {0}")]
    Store(#[from] AppointmentError),

    #[error("Recipient lookup failed: {0}")]
    Directory(#[from] SupabaseError),

    #[error("Gateway misconfigured: {0}")]
    Configuration(String),
}

impl NotificationError {
    /// Store outages end the current tick; the next tick tries again.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, NotificationError::Store(AppointmentError::StoreUnavailable(_)))
    }
}
