//! Durable key/value state
//!
//! The relay persists a handful of JSON documents (actor keys, the relay
//! list, destination error timestamps). Everything that touches them goes
//! through [`StateStore`] so the backing engine can be swapped for an
//! in-memory map in tests.

use std::collections::HashMap;

use axum::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use crate::error::AppError;

/// Relay keypair document (`{"publicKey": ..., "privateKey": ...}`)
pub const ACTOR_KEYS: &str = "actorKeys";
/// Ordered list of subscriber inbox URLs
pub const RELAY_LIST: &str = "relay-list";
/// Map of inbox URL -> ISO-8601 timestamp of the first delivery failure
pub const ERRORS: &str = "errors";

/// Injected durable map used by the relay core.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a document, `None` if the key was never written.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, AppError>;

    /// Write (or replace) a document.
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), AppError>;
}

/// Read and decode a typed document.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn StateStore,
    key: &str,
) -> Result<Option<T>, AppError> {
    match store.get(key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| AppError::Storage(format!("Failed to decode {}: {}", key, e))),
        None => Ok(None),
    }
}

/// Encode and write a typed document.
pub async fn save_json<T: Serialize>(
    store: &dyn StateStore,
    key: &str,
    value: &T,
) -> Result<(), AppError> {
    let value = serde_json::to_value(value)?;
    store.set(key, value).await
}

/// Volatile store, used by tests and for dry runs.
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, AppError> {
        Ok(self.documents.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), AppError> {
        self.documents.write().await.insert(key.to_string(), value);
        Ok(())
    }
}
