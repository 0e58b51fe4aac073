//! Activity processing
//!
//! Handles incoming ActivityPub activities once the inbox policy has
//! accepted them.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use ulid::Ulid;

use super::delivery::{DeliveryEngine, builder, unique_inbox_targets};
use super::resolver::RemoteActor;
use crate::config::AppConfig;
use crate::data::{Claim, DedupCache, DeliveryHealth, SubscriberRegistry};
use crate::error::AppError;
use crate::metrics::ACTIVITIES_RECEIVED;

/// ActivityPub Activity types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityType {
    Follow,
    Undo,
    Announce,
    Create,
    Delete,
    Update,
    /// Anything else; accepted and ignored
    Other(String),
}

impl From<&str> for ActivityType {
    fn from(s: &str) -> Self {
        match s {
            "Follow" => Self::Follow,
            "Undo" => Self::Undo,
            "Announce" => Self::Announce,
            "Create" => Self::Create,
            "Delete" => Self::Delete,
            "Update" => Self::Update,
            other => Self::Other(other.to_string()),
        }
    }
}

impl ActivityType {
    /// Type of a raw activity; a missing `type` is `Other("")`.
    pub fn of(activity: &Value) -> Self {
        activity
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .into()
    }

    /// Metrics label; unknown types share one label.
    fn label(&self) -> &'static str {
        match self {
            Self::Follow => "Follow",
            Self::Undo => "Undo",
            Self::Announce => "Announce",
            Self::Create => "Create",
            Self::Delete => "Delete",
            Self::Update => "Update",
            Self::Other(_) => "Other",
        }
    }
}

/// Lowercase host of a URL, without port.
pub fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .host_str()
        .map(|host| host.to_ascii_lowercase())
}

/// The `actor` of an activity, given either as a URI or as an embedded
/// object with an `id`.
pub fn activity_actor(activity: &Value) -> Option<&str> {
    match activity.get("actor")? {
        Value::String(uri) => Some(uri.as_str()),
        Value::Object(actor) => actor.get("id")?.as_str(),
        _ => None,
    }
}

/// Canonical id of the object an activity refers to.
///
/// A string `object` is the id itself; an embedded object contributes its
/// `id`.
pub fn distill_object_id(activity: &Value) -> Option<&str> {
    match activity.get("object")? {
        Value::String(id) => Some(id.as_str()),
        Value::Object(object) => object.get("id")?.as_str(),
        _ => None,
    }
}

/// Fan-out targets for an activity about `object_id`.
///
/// Drops the sender's own inbox, every inbox on the object's origin host,
/// and duplicates. Registry order is kept.
pub fn distill_inboxes(subscribers: Vec<String>, sender_inbox: &str, object_id: &str) -> Vec<String> {
    let origin_host = host_of(object_id);

    let targets = subscribers
        .into_iter()
        .filter(|inbox| inbox != sender_inbox)
        .filter(|inbox| origin_host.is_none() || host_of(inbox) != origin_host)
        .collect();

    unique_inbox_targets(targets)
}

/// Background work started while processing an activity
///
/// Dropping it leaves the work running.
#[derive(Debug, Default)]
pub struct Dispatched {
    pub pending: Vec<JoinHandle<()>>,
}

impl Dispatched {
    /// Wait for all background work to finish.
    pub async fn settle(self) {
        for handle in self.pending {
            if let Err(e) = handle.await {
                tracing::warn!("Background delivery task failed: {}", e);
            }
        }
    }
}

/// Activity processor
///
/// Processes activities accepted at the inbox.
pub struct ActivityProcessor {
    config: Arc<AppConfig>,
    registry: Arc<SubscriberRegistry>,
    health: Arc<DeliveryHealth>,
    dedup: Arc<DedupCache>,
    delivery: DeliveryEngine,
}

impl ActivityProcessor {
    /// Create new activity processor
    pub fn new(
        config: Arc<AppConfig>,
        registry: Arc<SubscriberRegistry>,
        health: Arc<DeliveryHealth>,
        dedup: Arc<DedupCache>,
        delivery: DeliveryEngine,
    ) -> Self {
        Self {
            config,
            registry,
            health,
            dedup,
            delivery,
        }
    }

    /// Process an accepted activity
    ///
    /// # Arguments
    /// * `actor` - Resolved sender
    /// * `activity` - Raw JSON-LD activity
    ///
    /// # Errors
    /// Only when persisting registry changes fails. Delivery problems are
    /// never reported here.
    pub async fn process(
        &self,
        actor: &Arc<RemoteActor>,
        activity: &Value,
    ) -> Result<Dispatched, AppError> {
        // 1. The sender is evidently reachable again
        let inbox = actor.delivery_inbox();
        match self.health.clear(inbox).await {
            Ok(true) => tracing::debug!(inbox = %inbox, "Unpausing"),
            Ok(false) => {}
            Err(e) => tracing::warn!(inbox = %inbox, "Failed to clear error state: {}", e),
        }

        // 2. Dispatch to type-specific handler
        let activity_type = ActivityType::of(activity);
        ACTIVITIES_RECEIVED
            .with_label_values(&[activity_type.label()])
            .inc();
        tracing::debug!(actor = %actor.id, activity_type = ?activity_type, "Processing activity");

        match activity_type {
            ActivityType::Follow => self.handle_follow(actor, activity).await,
            ActivityType::Undo => self.handle_undo(actor, activity).await,
            ActivityType::Announce | ActivityType::Create => self.handle_relay(actor, activity).await,
            ActivityType::Delete | ActivityType::Update => self.handle_forward(actor, activity).await,
            ActivityType::Other(_) => Ok(Dispatched::default()),
        }
    }

    /// Register the follower, follow back, and accept.
    async fn handle_follow(
        &self,
        actor: &Arc<RemoteActor>,
        activity: &Value,
    ) -> Result<Dispatched, AppError> {
        let inbox = actor.delivery_inbox();

        if host_of(inbox).is_some_and(|host| self.config.ap.blocked_instances.contains(&host)) {
            tracing::info!(inbox = %inbox, "Ignoring Follow from blocked instance");
            return Ok(Dispatched::default());
        }

        let mut dispatched = Dispatched::default();
        if self.registry.add(inbox).await? {
            if let Some(handle) = self.spawn_follow_back(actor) {
                dispatched.pending.push(handle);
            }
        }

        let relay_actor = self.config.ap.actor_uri();
        let accept = builder::accept(
            &self.new_activity_id(),
            &relay_actor,
            &actor.id,
            serde_json::json!({
                "type": "Follow",
                "id": activity.get("id").cloned().unwrap_or(Value::Null),
                "object": relay_actor,
                "actor": actor.id,
            }),
        );
        self.delivery
            .push(inbox, &accept, &self.config.ap.key_id())
            .await;

        Ok(dispatched)
    }

    /// Follow a new subscriber in turn, unless whitelist mode refuses it.
    fn spawn_follow_back(&self, actor: &Arc<RemoteActor>) -> Option<JoinHandle<()>> {
        let host = host_of(&actor.id).unwrap_or_default();
        if !self.config.ap.is_whitelisted(&host) {
            tracing::info!(actor = %actor.id, "Refusing to follow non-whitelisted actor");
            return None;
        }

        tracing::info!(actor = %actor.id, "Following");
        let follow = builder::follow(
            &self.new_activity_id(),
            &self.config.ap.actor_uri(),
            &actor.id,
        );
        let engine = self.delivery.clone();
        let inbox = actor.delivery_inbox().to_string();
        let key_id = self.config.ap.key_id();

        Some(tokio::spawn(async move {
            engine.push(&inbox, &follow, &key_id).await;
        }))
    }

    /// Unregister the follower and unfollow it in turn.
    async fn handle_undo(
        &self,
        actor: &Arc<RemoteActor>,
        activity: &Value,
    ) -> Result<Dispatched, AppError> {
        let undone = activity
            .get("object")
            .and_then(|object| object.get("type"))
            .and_then(|t| t.as_str());
        if undone != Some("Follow") {
            return Ok(Dispatched::default());
        }

        let inbox = actor.delivery_inbox();
        if !self.registry.remove(inbox).await? {
            tracing::debug!(inbox = %inbox, "Undo for an inbox that is not subscribed");
            return Ok(Dispatched::default());
        }

        tracing::info!(actor = %actor.id, "Unfollowing");
        let relay_actor = self.config.ap.actor_uri();
        let undo = builder::undo(
            &self.new_activity_id(),
            &relay_actor,
            &actor.id,
            builder::follow(&self.new_activity_id(), &relay_actor, &actor.id),
        );
        self.delivery
            .push(inbox, &undo, &self.config.ap.key_id())
            .await;

        Ok(Dispatched::default())
    }

    /// Announce the object to every other subscriber, once per object.
    async fn handle_relay(
        &self,
        actor: &Arc<RemoteActor>,
        activity: &Value,
    ) -> Result<Dispatched, AppError> {
        let Some(object_id) = distill_object_id(activity) else {
            tracing::debug!(actor = %actor.id, "Relay activity without object id");
            return Ok(Dispatched::default());
        };

        let activity_id = match self
            .dedup
            .claim(object_id, || self.new_activity_id())
            .await
        {
            Claim::Fresh(activity_id) => activity_id,
            Claim::Seen(existing) => {
                tracing::debug!(object = %object_id, activity = %existing, "Already relayed");
                return Ok(Dispatched::default());
            }
        };

        let message = builder::announce(
            &activity_id,
            &self.config.ap.actor_uri(),
            object_id,
            &format!("https://{}/followers", self.config.ap.host),
        );
        let inboxes = distill_inboxes(
            self.registry.list().await,
            actor.delivery_inbox(),
            object_id,
        );
        tracing::debug!(object = %object_id, targets = inboxes.len(), "Relaying");

        Ok(Dispatched {
            pending: vec![
                self.delivery
                    .fan_out(inboxes, message, self.config.ap.key_id()),
            ],
        })
    }

    /// Forward the activity verbatim to every other subscriber.
    async fn handle_forward(
        &self,
        actor: &Arc<RemoteActor>,
        activity: &Value,
    ) -> Result<Dispatched, AppError> {
        let origin = distill_object_id(activity).unwrap_or(actor.id.as_str());
        let inboxes = distill_inboxes(self.registry.list().await, actor.delivery_inbox(), origin);
        tracing::debug!(origin = %origin, targets = inboxes.len(), "Forwarding");

        Ok(Dispatched {
            pending: vec![
                self.delivery
                    .fan_out(inboxes, activity.clone(), self.config.ap.key_id()),
            ],
        })
    }

    fn new_activity_id(&self) -> String {
        format!("https://{}/activities/{}", self.config.ap.host, Ulid::new())
    }
}
