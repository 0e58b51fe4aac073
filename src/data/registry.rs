//! Subscriber registry and destination error state
//!
//! Both are process-wide mutable state backed by the [`StateStore`]. The
//! in-memory copy is authoritative for reads; every mutation is written
//! through before the in-memory copy is updated, so a failed write leaves
//! both sides unchanged.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use tokio::sync::RwLock;

use super::store::{ERRORS, RELAY_LIST, StateStore, load_json, save_json};
use crate::error::AppError;
use crate::metrics::{PAUSED_DESTINATIONS, SUBSCRIBERS};

/// Insertion-ordered set of subscriber inbox URLs (the "relay list").
pub struct SubscriberRegistry {
    store: Arc<dyn StateStore>,
    inboxes: RwLock<Vec<String>>,
}

impl SubscriberRegistry {
    /// Load the persisted relay list.
    ///
    /// Duplicate entries left behind by older deployments are collapsed,
    /// keeping the first occurrence.
    pub async fn load(store: Arc<dyn StateStore>) -> Result<Self, AppError> {
        let stored: Vec<String> = load_json(store.as_ref(), RELAY_LIST)
            .await?
            .unwrap_or_default();

        let mut inboxes: Vec<String> = Vec::with_capacity(stored.len());
        for inbox in stored {
            if !inboxes.contains(&inbox) {
                inboxes.push(inbox);
            }
        }

        SUBSCRIBERS.set(inboxes.len() as i64);
        tracing::info!(subscribers = inboxes.len(), "Subscriber registry loaded");

        Ok(Self {
            store,
            inboxes: RwLock::new(inboxes),
        })
    }

    /// Register an inbox.
    ///
    /// # Returns
    /// `true` if the inbox was newly added, `false` if it was already present
    pub async fn add(&self, inbox: &str) -> Result<bool, AppError> {
        let mut inboxes = self.inboxes.write().await;
        if inboxes.iter().any(|existing| existing == inbox) {
            return Ok(false);
        }

        let mut updated = inboxes.clone();
        updated.push(inbox.to_string());
        save_json(self.store.as_ref(), RELAY_LIST, &updated).await?;
        *inboxes = updated;

        SUBSCRIBERS.set(inboxes.len() as i64);
        tracing::info!(inbox = %inbox, "Subscriber added");
        Ok(true)
    }

    /// Unregister an inbox.
    ///
    /// # Returns
    /// `true` if the inbox was present and removed
    pub async fn remove(&self, inbox: &str) -> Result<bool, AppError> {
        let mut inboxes = self.inboxes.write().await;
        if !inboxes.iter().any(|existing| existing == inbox) {
            return Ok(false);
        }

        let updated: Vec<String> = inboxes
            .iter()
            .filter(|existing| existing.as_str() != inbox)
            .cloned()
            .collect();
        save_json(self.store.as_ref(), RELAY_LIST, &updated).await?;
        *inboxes = updated;

        SUBSCRIBERS.set(inboxes.len() as i64);
        tracing::info!(inbox = %inbox, "Subscriber removed");
        Ok(true)
    }

    pub async fn contains(&self, inbox: &str) -> bool {
        self.inboxes.read().await.iter().any(|existing| existing == inbox)
    }

    /// Snapshot of the registered inboxes in insertion order.
    pub async fn list(&self) -> Vec<String> {
        self.inboxes.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.inboxes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inboxes.read().await.is_empty()
    }
}

/// Per-destination delivery failure tracking.
///
/// An entry holds the time of the *first* failure of the current failure run.
/// Later failures never move it forward; any success clears it.
pub struct DeliveryHealth {
    store: Arc<dyn StateStore>,
    failures: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl DeliveryHealth {
    /// Load the persisted error map.
    ///
    /// Entries whose timestamp cannot be parsed are dropped, which treats the
    /// destination as healthy.
    pub async fn load(store: Arc<dyn StateStore>) -> Result<Self, AppError> {
        let stored: HashMap<String, String> = load_json(store.as_ref(), ERRORS)
            .await?
            .unwrap_or_default();

        let mut failures = HashMap::with_capacity(stored.len());
        for (inbox, timestamp) in stored {
            match parse_timestamp(&timestamp) {
                Some(at) => {
                    failures.insert(inbox, at);
                }
                None => {
                    tracing::warn!(inbox = %inbox, timestamp = %timestamp, "Dropping unparseable error timestamp");
                }
            }
        }

        PAUSED_DESTINATIONS.set(failures.len() as i64);

        Ok(Self {
            store,
            failures: RwLock::new(failures),
        })
    }

    /// Time of the first recorded failure, if the destination is failing.
    pub async fn first_failure(&self, inbox: &str) -> Option<DateTime<Utc>> {
        self.failures.read().await.get(inbox).copied()
    }

    /// Whether the destination has been failing for at least `threshold`.
    pub async fn is_paused(
        &self,
        inbox: &str,
        now: DateTime<Utc>,
        threshold: chrono::Duration,
    ) -> bool {
        self.first_failure(inbox)
            .await
            .is_some_and(|first| now - first >= threshold)
    }

    /// Record a failure unless one is already on record.
    ///
    /// # Returns
    /// `true` if a new entry was created
    pub async fn record_failure(&self, inbox: &str, at: DateTime<Utc>) -> Result<bool, AppError> {
        let mut failures = self.failures.write().await;
        if failures.contains_key(inbox) {
            return Ok(false);
        }

        let mut updated = failures.clone();
        updated.insert(inbox.to_string(), at);
        self.persist(&updated).await?;
        *failures = updated;

        PAUSED_DESTINATIONS.set(failures.len() as i64);
        Ok(true)
    }

    /// Forget any failure on record for the destination.
    ///
    /// # Returns
    /// `true` if an entry was removed
    pub async fn clear(&self, inbox: &str) -> Result<bool, AppError> {
        let mut failures = self.failures.write().await;
        if !failures.contains_key(inbox) {
            return Ok(false);
        }

        let mut updated = failures.clone();
        updated.remove(inbox);
        self.persist(&updated).await?;
        *failures = updated;

        PAUSED_DESTINATIONS.set(failures.len() as i64);
        Ok(true)
    }

    pub async fn len(&self) -> usize {
        self.failures.read().await.len()
    }

    async fn persist(&self, failures: &HashMap<String, DateTime<Utc>>) -> Result<(), AppError> {
        let encoded: HashMap<&str, String> = failures
            .iter()
            .map(|(inbox, at)| {
                (
                    inbox.as_str(),
                    at.to_rfc3339_opts(SecondsFormat::Micros, true),
                )
            })
            .collect();
        save_json(self.store.as_ref(), ERRORS, &encoded).await
    }
}

/// Parse an ISO-8601 timestamp, with or without an offset.
///
/// Timestamps without an offset are taken as UTC.
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}
