// =====================================================================================
// NOTIFICATION CELL - DELIVERY SCHEDULER
// =====================================================================================
//
// Polls the appointment store, sends confirmation and reminder messages
// through a pluggable gateway and records each attempt with retry and
// backoff bookkeeping.
//
// =====================================================================================

pub mod error;
pub mod models;
pub mod services;

pub use error::*;
pub use models::*;
pub use services::*;
