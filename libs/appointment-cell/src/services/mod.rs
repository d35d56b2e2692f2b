pub mod clock;
pub mod conflict;
pub mod lifecycle;
pub mod store;
pub mod supabase_store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use conflict::ConflictPolicy;
pub use lifecycle::LifecycleManager;
pub use store::{AppointmentStore, InMemoryAppointmentStore};
pub use supabase_store::SupabaseAppointmentStore;
