//! ActivityRelay - an ActivityPub relay
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - /actor, /inbox                                           │
//! │  - Homepage, nodeinfo, webfinger, metrics                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Federation Layer                          │
//! │  - HTTP Signatures, inbound policy                          │
//! │  - Activity processing and delivery fan-out                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite key/value state (sqlx)                            │
//! │  - Subscriber registry, error state, dedup cache            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `federation`: ActivityPub federation handling
//! - `data`: Persistent state and caches
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;

use std::sync::Arc;

use data::StateStore;
use federation::{Resolve, RelayIdentity};

/// Maximum accepted request body
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Application state shared across all handlers
///
/// This struct is cloned for each request and contains shared relay state
/// and services.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Relay keypair
    pub identity: Arc<RelayIdentity>,

    /// Subscribed inboxes
    pub registry: Arc<data::SubscriberRegistry>,

    /// Per-destination delivery failures
    pub health: Arc<data::DeliveryHealth>,

    /// Recently relayed object ids (volatile)
    pub dedup: Arc<data::DedupCache>,

    /// Remote actor and software lookups
    pub resolver: Arc<dyn Resolve>,

    /// Outbound delivery
    pub delivery: federation::DeliveryEngine,

    /// Inbound rules
    pub policy: Arc<federation::InboundPolicy>,

    /// Activity dispatch
    pub processor: Arc<federation::ActivityProcessor>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Load or generate the relay keypair
    /// 3. Initialize HTTP client and resolver
    /// 4. Load registry and error state
    ///
    /// # Errors
    /// Returns error if any initialization step fails. Key material errors
    /// are fatal.
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Connect to SQLite database
        let db = data::Database::connect(&config.database.path).await?;
        let store: Arc<dyn StateStore> = Arc::new(db);

        // 2. Relay keypair, before anything can sign
        let identity = RelayIdentity::load_or_generate(store.as_ref()).await?;

        // 3. Initialize HTTP client
        let http_client = Arc::new(build_http_client(&config)?);
        let resolver: Arc<dyn Resolve> =
            Arc::new(federation::HttpResolver::new(http_client.clone()));

        // 4. Relay state
        let state = Self::assemble(config, store, identity, resolver, http_client).await?;

        tracing::info!("Application state initialized successfully");
        Ok(state)
    }

    /// Wire the relay services together from already constructed parts.
    ///
    /// Used by [`AppState::new`] and by tests that need an in-memory store,
    /// a small key, or a fake resolver.
    pub async fn assemble(
        config: config::AppConfig,
        store: Arc<dyn StateStore>,
        identity: RelayIdentity,
        resolver: Arc<dyn Resolve>,
        http_client: Arc<reqwest::Client>,
    ) -> Result<Self, error::AppError> {
        let config = Arc::new(config);
        let identity = Arc::new(identity);

        let registry = Arc::new(data::SubscriberRegistry::load(store.clone()).await?);
        let health = Arc::new(data::DeliveryHealth::load(store).await?);
        let dedup = Arc::new(data::DedupCache::new(config.cache_size));

        let delivery = federation::DeliveryEngine::new(
            http_client,
            identity.clone(),
            health.clone(),
            config.delivery.max_concurrent,
            config.pause_threshold(),
        );
        let policy = Arc::new(federation::InboundPolicy::new(
            config.clone(),
            registry.clone(),
            resolver.clone(),
        ));
        let processor = Arc::new(federation::ActivityProcessor::new(
            config.clone(),
            registry.clone(),
            health.clone(),
            dedup.clone(),
            delivery.clone(),
        ));

        Ok(Self {
            config,
            identity,
            registry,
            health,
            dedup,
            resolver,
            delivery,
            policy,
            processor,
        })
    }
}

/// HTTP client shared by delivery and resolution
pub fn build_http_client(config: &config::AppConfig) -> Result<reqwest::Client, error::AppError> {
    reqwest::Client::builder()
        .user_agent(federation::user_agent())
        .timeout(std::time::Duration::from_secs(
            config.delivery.timeout_seconds,
        ))
        .build()
        .map_err(|e| error::AppError::Internal(e.into()))
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::home_router())
        .merge(api::wellknown_router())
        .merge(api::activitypub_router())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(api::metrics_router())
}

async fn health_check() -> &'static str {
    "OK"
}
