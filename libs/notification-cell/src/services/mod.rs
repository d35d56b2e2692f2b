pub mod gateway;
pub mod recipients;
pub mod retry;
pub mod scheduler;

pub use gateway::{HttpMailGateway, LogOnlyGateway, NotificationGateway};
pub use recipients::{RecipientDirectory, StaticRecipientDirectory, SupabaseRecipientDirectory};
pub use retry::RetryPolicy;
pub use scheduler::SchedulerLoop;
