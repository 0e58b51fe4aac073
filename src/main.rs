//! ActivityRelay binary entry point

use activityrelay::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Initialize metrics
/// 3. Load configuration from file and environment
/// 4. Initialize AppState (fatal if the keypair cannot be loaded)
/// 5. Build Axum router
/// 6. Start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize tracing/logging
    let log_format =
        std::env::var("RELAY__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "activityrelay=info,tower_http=info".into());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting ActivityRelay...");

    // 2. Initialize metrics
    activityrelay::metrics::init_metrics();

    // 3. Load configuration
    let config = config::AppConfig::load()?;
    tracing::info!(
        host = %config.ap.host,
        whitelist_enabled = config.ap.whitelist_enabled,
        pause_days = config.pause_days,
        "Configuration loaded"
    );

    // 4. Initialize application state
    let state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize relay");
            return Err(e.into());
        }
    };
    tracing::info!(
        subscribers = state.registry.len().await,
        "Relay state loaded"
    );

    // 5. Build Axum router
    let app = activityrelay::build_router(state);

    // 6. Start HTTP server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Relay actor: {}", config.ap.actor_uri());

    axum::serve(listener, app).await?;

    Ok(())
}
