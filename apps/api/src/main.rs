use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::{
    AppointmentState, AppointmentStore, ConflictPolicy, InMemoryAppointmentStore, LifecycleManager,
    SupabaseAppointmentStore, SystemClock,
};
use notification_cell::{
    HttpMailGateway, LogOnlyGateway, NotificationGateway, RecipientDirectory, SchedulerLoop,
    StaticRecipientDirectory, SupabaseRecipientDirectory,
};
use shared_config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Petcare appointment API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());
    let policy = ConflictPolicy::from_settings(&config.booking);

    // Persistence and delivery collaborators
    let (store, recipients): (Arc<dyn AppointmentStore>, Arc<dyn RecipientDirectory>) =
        if config.is_store_configured() {
            (
                Arc::new(SupabaseAppointmentStore::new(&config, policy)),
                Arc::new(SupabaseRecipientDirectory::new(&config)),
            )
        } else {
            warn!("Supabase is not configured; appointments are kept in memory and lost on restart");
            (
                Arc::new(InMemoryAppointmentStore::new(policy)),
                Arc::new(StaticRecipientDirectory::new()),
            )
        };

    let gateway: Arc<dyn NotificationGateway> = if config.is_mail_configured() {
        Arc::new(HttpMailGateway::new(&config)?)
    } else {
        warn!("Mail API is not configured; notifications are only logged");
        Arc::new(LogOnlyGateway)
    };

    let lifecycle = Arc::new(LifecycleManager::new(store, Arc::new(SystemClock), &config.booking));

    // Background notification scheduler
    let scheduler = Arc::new(SchedulerLoop::new(lifecycle.clone(), gateway, recipients, &config.scheduler));
    let scheduler_task = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Create shared state
    let state = Arc::new(AppointmentState::new(config.clone(), lifecycle));

    // Build the application router
    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped, waiting for scheduler");
    scheduler.shutdown();
    scheduler_task.await.context("scheduler task panicked")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
