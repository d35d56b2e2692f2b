use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: String,
    pub supabase_jwt_secret: String,
    pub mail_api_base_url: String,
    pub mail_api_key: String,
    pub mail_sender: String,
    pub server_port: u16,
    /// Per-request limit for store and profile lookups.
    pub store_timeout_seconds: u64,
    pub booking: BookingSettings,
    pub scheduler: SchedulerSettings,
}

/// Rules applied when an appointment is booked.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingSettings {
    pub max_horizon_days: i64,
    /// `slot` (same calendar slot) or `window` (within N minutes of each other)
    pub conflict_mode: String,
    pub conflict_minutes: i64,
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            max_horizon_days: 180,
            conflict_mode: "slot".to_string(),
            conflict_minutes: 30,
        }
    }
}

/// Tuning for the notification scheduler loop.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub tick_interval_seconds: u64,
    pub batch_size: usize,
    pub sweep_batch_size: usize,
    pub delivery_timeout_seconds: u64,
    pub max_attempts: u32,
    pub backoff_base_seconds: i64,
    pub backoff_max_seconds: i64,
    pub claim_lease_seconds: i64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 30,
            batch_size: 50,
            sweep_batch_size: 200,
            delivery_timeout_seconds: 10,
            max_attempts: 3,
            backoff_base_seconds: 60,
            backoff_max_seconds: 3600,
            claim_lease_seconds: 60,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let booking_defaults = BookingSettings::default();
        let scheduler_defaults = SchedulerSettings::default();

        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            mail_api_base_url: env::var("MAIL_API_BASE_URL")
                .unwrap_or_else(|_| {
                    warn!("MAIL_API_BASE_URL not set, using empty value");
                    String::new()
                }),
            mail_api_key: env::var("MAIL_API_KEY")
                .unwrap_or_else(|_| {
                    warn!("MAIL_API_KEY not set, using empty value");
                    String::new()
                }),
            mail_sender: env::var("MAIL_SENDER")
                .unwrap_or_else(|_| {
                    warn!("MAIL_SENDER not set, using default");
                    "appointments@petcare.local".to_string()
                }),
            server_port: env_or("SERVER_PORT", 3000),
            store_timeout_seconds: env_or("SUPABASE_TIMEOUT_SECONDS", 10),
            booking: BookingSettings {
                max_horizon_days: env_or("BOOKING_MAX_HORIZON_DAYS", booking_defaults.max_horizon_days),
                conflict_mode: env::var("BOOKING_CONFLICT_MODE")
                    .unwrap_or(booking_defaults.conflict_mode),
                conflict_minutes: env_or("BOOKING_CONFLICT_MINUTES", booking_defaults.conflict_minutes),
            },
            scheduler: SchedulerSettings {
                tick_interval_seconds: env_or("SCHEDULER_TICK_SECONDS", scheduler_defaults.tick_interval_seconds),
                batch_size: env_or("SCHEDULER_BATCH_SIZE", scheduler_defaults.batch_size),
                sweep_batch_size: env_or("SCHEDULER_SWEEP_BATCH_SIZE", scheduler_defaults.sweep_batch_size),
                delivery_timeout_seconds: env_or(
                    "SCHEDULER_DELIVERY_TIMEOUT_SECONDS",
                    scheduler_defaults.delivery_timeout_seconds,
                ),
                max_attempts: env_or("SCHEDULER_MAX_ATTEMPTS", scheduler_defaults.max_attempts),
                backoff_base_seconds: env_or("SCHEDULER_BACKOFF_BASE_SECONDS", scheduler_defaults.backoff_base_seconds),
                backoff_max_seconds: env_or("SCHEDULER_BACKOFF_MAX_SECONDS", scheduler_defaults.backoff_max_seconds),
                claim_lease_seconds: env_or("SCHEDULER_CLAIM_LEASE_SECONDS", scheduler_defaults.claim_lease_seconds),
            },
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    /// The scheduler writes without a user token, so it needs the service role key.
    pub fn is_store_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_service_role_key.is_empty()
    }

    pub fn is_mail_configured(&self) -> bool {
        !self.mail_api_base_url.is_empty() && !self.mail_api_key.is_empty()
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    parse_or(key, env::var(key).ok().as_deref(), default)
}

fn parse_or<T: FromStr>(key: &str, raw: Option<&str>, default: T) -> T {
    match raw {
        None => default,
        Some(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!("{} has unparseable value {:?}, using default", key, value);
            default
        }),
    }
}
