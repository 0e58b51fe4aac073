//! Common test utilities for E2E tests
//!
//! The relay runs in-process behind [`TestRelay::router`]. Remote instances
//! are [`Peer`]s: local axum servers that record every activity delivered
//! to their inbox. Actor documents are served by [`FakeResolver`] so peers
//! can use `https://{name}.example` identities while receiving deliveries
//! on `127.0.0.1`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use activityrelay::federation::{
    ActorPublicKey, RelayIdentity, RemoteActor, Resolve, sign_request,
};
use activityrelay::{AppState, build_http_client, config};
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::routing::post;
use chrono::Utc;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

/// Public hostname the relay under test answers to
pub const RELAY_HOST: &str = "relay.example";

/// Resolver backed by an in-memory table of actors and software names
#[derive(Default)]
pub struct FakeResolver {
    actors: Mutex<HashMap<String, Arc<RemoteActor>>>,
    software: Mutex<HashMap<String, String>>,
}

impl FakeResolver {
    pub fn add_actor(&self, actor: RemoteActor) {
        self.actors
            .lock()
            .unwrap()
            .insert(actor.id.clone(), Arc::new(actor));
    }

    pub fn set_software(&self, domain: &str, software: &str) {
        self.software
            .lock()
            .unwrap()
            .insert(domain.to_string(), software.to_string());
    }
}

#[axum::async_trait]
impl Resolve for FakeResolver {
    async fn actor(&self, uri: &str) -> Option<Arc<RemoteActor>> {
        self.actors.lock().unwrap().get(uri).cloned()
    }

    async fn software(&self, domain: &str) -> Option<String> {
        self.software.lock().unwrap().get(domain).cloned()
    }
}

/// Test configuration with the relay at [`RELAY_HOST`]
pub fn test_config(db_path: std::path::PathBuf) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        ap: config::ApConfig {
            host: RELAY_HOST.to_string(),
            whitelist_enabled: false,
            whitelist: Default::default(),
            blocked_instances: Default::default(),
            blocked_software: Default::default(),
        },
        database: config::DatabaseConfig { path: db_path },
        delivery: config::DeliveryConfig {
            max_concurrent: 500,
            timeout_seconds: 5,
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
        pause_days: 7,
        cache_size: 1024,
        note: "Test relay".to_string(),
    }
}

/// Test relay instance
pub struct TestRelay {
    pub state: AppState,
    pub router: axum::Router,
    pub resolver: Arc<FakeResolver>,
    pub _temp_dir: TempDir,
}

impl TestRelay {
    /// Relay with default test configuration
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Relay with configuration adjusted by `customize`
    pub async fn with_config(customize: impl FnOnce(&mut config::AppConfig)) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(temp_dir.path().join("relay.db"));
        customize(&mut config);

        let store = Arc::new(
            activityrelay::data::Database::connect(&config.database.path)
                .await
                .unwrap(),
        );
        let identity = RelayIdentity::generate(1024).unwrap();
        let resolver = Arc::new(FakeResolver::default());
        let http_client = Arc::new(build_http_client(&config).unwrap());

        let state = AppState::assemble(config, store, identity, resolver.clone(), http_client)
            .await
            .unwrap();
        let router = activityrelay::build_router(state.clone());

        Self {
            state,
            router,
            resolver,
            _temp_dir: temp_dir,
        }
    }

    /// Make a peer resolvable by the relay.
    pub fn know(&self, peer: &Peer) {
        self.resolver.add_actor(peer.remote_actor());
    }

    /// Resolvable peer that is already subscribed.
    pub async fn subscribe(&self, peer: &Peer) {
        self.know(peer);
        self.state.registry.add(&peer.inbox).await.unwrap();
    }

    /// GET `path` through the full router.
    pub async fn get(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .uri(path)
            .header("host", RELAY_HOST)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    /// POST `activity` to `/inbox`, signed with `peer`'s key.
    pub async fn post_signed(&self, peer: &Peer, activity: &Value) -> (StatusCode, String) {
        let body = serde_json::to_vec(activity).unwrap();
        let signed = sign_request(
            &peer.identity,
            "POST",
            &format!("https://{}/inbox", RELAY_HOST),
            &body,
            &peer.key_id(),
            Utc::now(),
        )
        .unwrap();

        let request = Request::builder()
            .method("POST")
            .uri("/inbox")
            .header("host", signed.host)
            .header("date", signed.date)
            .header("digest", signed.digest)
            .header("content-type", signed.content_type)
            .header("content-length", signed.content_length)
            .header("signature", signed.signature)
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    /// POST `activity` to `/inbox` without a signature.
    pub async fn post_unsigned(&self, activity: &Value) -> (StatusCode, String) {
        let request = Request::builder()
            .method("POST")
            .uri("/inbox")
            .header("host", RELAY_HOST)
            .header("content-type", "application/activity+json")
            .body(Body::from(serde_json::to_vec(activity).unwrap()))
            .unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }
}

/// Remote instance that records what the relay delivers to it
pub struct Peer {
    pub name: String,
    pub actor_id: String,
    pub inbox: String,
    pub identity: RelayIdentity,
    received: Arc<tokio::sync::Mutex<Vec<Value>>>,
}

async fn record(
    State(received): State<Arc<tokio::sync::Mutex<Vec<Value>>>>,
    body: Bytes,
) -> StatusCode {
    match serde_json::from_slice(&body) {
        Ok(activity) => {
            received.lock().await.push(activity);
            StatusCode::ACCEPTED
        }
        Err(_) => StatusCode::BAD_REQUEST,
    }
}

impl Peer {
    /// Start a peer named `name`; its actor is `https://{name}.example/actor`.
    pub async fn spawn(name: &str) -> Self {
        let received = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let app = axum::Router::new()
            .route("/inbox", post(record))
            .with_state(received.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            name: name.to_string(),
            actor_id: format!("https://{}.example/actor", name),
            inbox: format!("http://{}/inbox", addr),
            identity: RelayIdentity::generate(1024).unwrap(),
            received,
        }
    }

    pub fn host(&self) -> String {
        format!("{}.example", self.name)
    }

    pub fn key_id(&self) -> String {
        format!("{}#main-key", self.actor_id)
    }

    /// Actor document as the relay resolves it
    pub fn remote_actor(&self) -> RemoteActor {
        RemoteActor {
            id: self.actor_id.clone(),
            inbox: self.inbox.clone(),
            endpoints: None,
            public_key: Some(ActorPublicKey {
                id: Some(self.key_id()),
                owner: Some(self.actor_id.clone()),
                public_key_pem: self.identity.public_key_pem().to_string(),
            }),
        }
    }

    /// Activities received so far
    pub async fn received(&self) -> Vec<Value> {
        self.received.lock().await.clone()
    }

    /// Received activities of one type
    pub async fn received_of_type(&self, activity_type: &str) -> Vec<Value> {
        self.received()
            .await
            .into_iter()
            .filter(|activity| activity["type"] == activity_type)
            .collect()
    }

    /// Poll until at least `count` activities of `activity_type` arrived.
    pub async fn wait_for(&self, activity_type: &str, count: usize) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let activities = self.received_of_type(activity_type).await;
            if activities.len() >= count || tokio::time::Instant::now() >= deadline {
                return activities;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Give background deliveries time to land before asserting absence.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}
