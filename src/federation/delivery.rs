//! Activity delivery
//!
//! Signs and POSTs activities to subscriber inboxes. Every POST in the
//! process shares one concurrency limit, and destinations that have been
//! failing for longer than the pause threshold are skipped.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::data::DeliveryHealth;
use crate::federation::keys::RelayIdentity;
use crate::federation::signature::sign_request;
use crate::metrics::{DELIVERIES_IN_FLIGHT, DELIVERIES_TOTAL, DELIVERY_DURATION_SECONDS};

/// `User-Agent` sent with every outbound request
pub fn user_agent() -> String {
    format!("ActivityRelay/{}", env!("CARGO_PKG_VERSION"))
}

/// Result of a single push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The destination answered with this HTTP status
    Delivered(u16),
    /// The destination is paused; no request was made
    Skipped,
    /// The request could not be built or no response was received
    Failed(String),
}

impl DeliveryOutcome {
    fn label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered(202) => "accepted",
            DeliveryOutcome::Delivered(_) => "delivered",
            DeliveryOutcome::Skipped => "skipped",
            DeliveryOutcome::Failed(_) => "failed",
        }
    }
}

/// Outbound delivery engine
///
/// Cheap to clone; clones share the semaphore and error state.
#[derive(Clone)]
pub struct DeliveryEngine {
    http_client: Arc<reqwest::Client>,
    identity: Arc<RelayIdentity>,
    health: Arc<DeliveryHealth>,
    permits: Arc<Semaphore>,
    pause_threshold: chrono::Duration,
}

/// Deduplicate identical inbox URIs while keeping distinct personal inboxes.
///
/// This preserves recipients on the same domain that use different inbox paths.
pub fn unique_inbox_targets(inbox_uris: Vec<String>) -> Vec<String> {
    use std::collections::HashSet;

    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for inbox_uri in inbox_uris {
        if seen.insert(inbox_uri.clone()) {
            targets.push(inbox_uri);
        }
    }

    targets
}

impl DeliveryEngine {
    /// Create new delivery engine
    ///
    /// # Arguments
    /// * `max_concurrent` - In-flight POST limit shared by all deliveries
    /// * `pause_threshold` - Failure age after which a destination is skipped
    pub fn new(
        http_client: Arc<reqwest::Client>,
        identity: Arc<RelayIdentity>,
        health: Arc<DeliveryHealth>,
        max_concurrent: usize,
        pause_threshold: chrono::Duration,
    ) -> Self {
        Self {
            http_client,
            identity,
            health,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            pause_threshold,
        }
    }

    /// Deliver a message to a single inbox
    ///
    /// Never fails: transport errors are recorded in the destination's error
    /// state and reported through the outcome.
    pub async fn push(&self, inbox: &str, message: &Value, key_id: &str) -> DeliveryOutcome {
        let outcome = self.attempt(inbox, message, key_id).await;
        DELIVERIES_TOTAL
            .with_label_values(&[outcome.label()])
            .inc();
        outcome
    }

    async fn attempt(&self, inbox: &str, message: &Value, key_id: &str) -> DeliveryOutcome {
        // 1. Skip destinations that have been failing for too long
        if self
            .health
            .is_paused(inbox, Utc::now(), self.pause_threshold)
            .await
        {
            tracing::warn!(inbox = %inbox, "Skipped delivery due to excessive delivery failures");
            return DeliveryOutcome::Skipped;
        }

        // 2. Serialize and sign
        let body = match serde_json::to_vec(message) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(inbox = %inbox, "Failed to serialize activity: {}", e);
                return DeliveryOutcome::Failed(e.to_string());
            }
        };

        let signed = match sign_request(&self.identity, "POST", inbox, &body, key_id, Utc::now()) {
            Ok(signed) => signed,
            Err(e) => {
                tracing::error!(inbox = %inbox, "Failed to sign request: {}", e);
                return DeliveryOutcome::Failed(e.to_string());
            }
        };

        tracing::debug!(inbox = %inbox, message = %message, "Pushing");

        // 3. POST under the global concurrency limit
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => return DeliveryOutcome::Failed(e.to_string()),
        };

        DELIVERIES_IN_FLIGHT.inc();
        let timer = DELIVERY_DURATION_SECONDS.start_timer();
        let result = self
            .http_client
            .post(inbox)
            .header("Content-Type", signed.content_type)
            .header("Digest", signed.digest)
            .header("Date", signed.date)
            .header("User-Agent", user_agent())
            .header("Signature", signed.signature)
            .body(body)
            .send()
            .await;
        timer.observe_duration();
        DELIVERIES_IN_FLIGHT.dec();

        // 4. Any response clears the error state; no response records it
        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                if status != 202 {
                    let payload = response.text().await.unwrap_or_default();
                    tracing::debug!(inbox = %inbox, status, response = %payload, "Push answered with non-202 status");
                }

                if let Err(e) = self.health.clear(inbox).await {
                    tracing::warn!(inbox = %inbox, "Failed to clear error state: {}", e);
                }
                DeliveryOutcome::Delivered(status)
            }
            Err(e) => {
                tracing::info!(inbox = %inbox, "Caught error while pushing: {}", e);
                if let Err(persist_error) = self.health.record_failure(inbox, Utc::now()).await {
                    tracing::warn!(inbox = %inbox, "Failed to record error state: {}", persist_error);
                }
                DeliveryOutcome::Failed(e.to_string())
            }
        }
    }

    /// Deliver a message to many inboxes in the background.
    ///
    /// Pushes run concurrently, bounded only by the shared semaphore. The
    /// handle resolves once every push has finished; dropping it leaves the
    /// deliveries running.
    pub fn fan_out(&self, inboxes: Vec<String>, message: Value, key_id: String) -> JoinHandle<()> {
        let engine = self.clone();

        tokio::spawn(async move {
            let total = inboxes.len();
            let deliveries = inboxes
                .iter()
                .map(|inbox| engine.push(inbox, &message, &key_id));
            let outcomes = join_all(deliveries).await;

            let delivered = outcomes
                .iter()
                .filter(|outcome| matches!(outcome, DeliveryOutcome::Delivered(_)))
                .count();
            let skipped = outcomes
                .iter()
                .filter(|outcome| matches!(outcome, DeliveryOutcome::Skipped))
                .count();

            tracing::info!(
                total,
                delivered,
                skipped,
                failed = total - delivered - skipped,
                "Fan-out complete"
            );
        })
    }
}

/// Build ActivityPub activity JSON
pub mod builder {
    use serde_json::Value;

    /// Build a Follow activity
    ///
    /// # Arguments
    /// * `id` - Activity ID (unique URI)
    /// * `actor` - Actor URI (follower)
    /// * `object` - Object URI (followee)
    pub fn follow(id: &str, actor: &str, object: &str) -> Value {
        serde_json::json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Follow",
            "to": [object],
            "id": id,
            "actor": actor,
            "object": object
        })
    }

    /// Build an Accept activity
    ///
    /// # Arguments
    /// * `id` - Activity ID (unique URI)
    /// * `actor` - Actor URI (accepter)
    /// * `follower` - Actor whose Follow is accepted
    /// * `object` - Original activity being accepted (usually a Follow)
    pub fn accept(id: &str, actor: &str, follower: &str, object: Value) -> Value {
        serde_json::json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Accept",
            "to": [follower],
            "id": id,
            "actor": actor,
            "object": object
        })
    }

    /// Build an Undo activity
    ///
    /// # Arguments
    /// * `id` - Activity ID (unique URI)
    /// * `actor` - Actor URI (undoer)
    /// * `to` - Actor being notified
    /// * `object` - Original activity being undone
    pub fn undo(id: &str, actor: &str, to: &str, object: Value) -> Value {
        serde_json::json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Undo",
            "to": [to],
            "id": id,
            "actor": actor,
            "object": object
        })
    }

    /// Build an Announce activity
    ///
    /// # Arguments
    /// * `id` - Activity ID (unique URI)
    /// * `actor` - Actor URI (announcer)
    /// * `object` - Object URI being announced
    /// * `followers` - Followers collection of the announcer
    pub fn announce(id: &str, actor: &str, object: &str, followers: &str) -> Value {
        serde_json::json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Announce",
            "to": [followers],
            "id": id,
            "actor": actor,
            "object": object
        })
    }
}
