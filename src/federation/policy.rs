//! Inbound policy
//!
//! Decides whether an inbox POST is accepted. Rules are evaluated in a fixed
//! order and the first failing rule determines the rejection.

use std::sync::Arc;

use serde_json::Value;

use super::activity::{ActivityType, activity_actor, host_of};
use super::resolver::Resolve;
use crate::config::AppConfig;
use crate::data::SubscriberRegistry;
use crate::error::AppError;

/// Why an inbound activity was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The sender runs software listed in `ap.blocked_software`
    BlockedSoftware,
    /// The activity names no actor
    MissingActor,
    /// The HTTP signature did not verify
    InvalidSignature,
    /// A non-Follow activity from an inbox that is not subscribed
    NotSubscribed,
    /// Whitelist mode is on and the sender host is not listed
    NotWhitelisted,
}

impl Rejection {
    /// Plain-text response body
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::BlockedSoftware => "relays have been blocked",
            Rejection::MissingActor
            | Rejection::InvalidSignature
            | Rejection::NotSubscribed
            | Rejection::NotWhitelisted => "access denied",
        }
    }

    /// Metrics and log label
    pub fn rule(&self) -> &'static str {
        match self {
            Rejection::BlockedSoftware => "blocked_software",
            Rejection::MissingActor => "missing_actor",
            Rejection::InvalidSignature => "invalid_signature",
            Rejection::NotSubscribed => "not_subscribed",
            Rejection::NotWhitelisted => "not_whitelisted",
        }
    }
}

impl From<Rejection> for AppError {
    fn from(rejection: Rejection) -> Self {
        AppError::Unauthorized(rejection.reason().to_string())
    }
}

/// Facts about an inbox POST the policy decides on
#[derive(Debug)]
pub struct InboundRequest<'a> {
    pub activity: &'a Value,
    /// Whether the HTTP signature verified
    pub validated: bool,
}

/// Applies the inbound rules
pub struct InboundPolicy {
    config: Arc<AppConfig>,
    registry: Arc<SubscriberRegistry>,
    resolver: Arc<dyn Resolve>,
}

impl InboundPolicy {
    pub fn new(
        config: Arc<AppConfig>,
        registry: Arc<SubscriberRegistry>,
        resolver: Arc<dyn Resolve>,
    ) -> Self {
        Self {
            config,
            registry,
            resolver,
        }
    }

    /// Evaluate the rules in order.
    ///
    /// 1. blocked software (only consulted when the block list is non-empty)
    /// 2. actor present and signature validated
    /// 3. non-Follow activities must come from a subscribed inbox
    /// 4. whitelist
    ///
    /// The sender's actor document is only resolved for rule 3.
    pub async fn authorize(&self, request: &InboundRequest<'_>) -> Result<(), Rejection> {
        let ap = &self.config.ap;
        let actor = activity_actor(request.activity);
        let host = actor.and_then(host_of);

        if !ap.blocked_software.is_empty() {
            if let Some(host) = host.as_deref() {
                if let Some(software) = self.resolver.software(host).await {
                    if ap.blocked_software.contains(&software.to_lowercase()) {
                        return Err(Rejection::BlockedSoftware);
                    }
                }
            }
        }

        let Some(actor) = actor else {
            return Err(Rejection::MissingActor);
        };
        if !request.validated {
            return Err(Rejection::InvalidSignature);
        }

        if ActivityType::of(request.activity) != ActivityType::Follow {
            let inbox = match (self.resolver.actor(actor).await, host.as_deref()) {
                (Some(sender), _) => sender.delivery_inbox().to_string(),
                (None, Some(host)) => format!("https://{}/inbox", host),
                (None, None) => return Err(Rejection::NotSubscribed),
            };
            if !self.registry.contains(&inbox).await {
                return Err(Rejection::NotSubscribed);
            }
        }

        if !ap.is_whitelisted(host.as_deref().unwrap_or_default()) {
            return Err(Rejection::NotWhitelisted);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::valid_config;
    use crate::data::{MemoryStore, StateStore};
    use crate::federation::resolver::{MockResolve, RemoteActor};
    use serde_json::json;

    async fn policy(config: AppConfig, resolver: MockResolve) -> (InboundPolicy, Arc<SubscriberRegistry>) {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let registry = Arc::new(SubscriberRegistry::load(store).await.unwrap());
        let policy = InboundPolicy::new(Arc::new(config), registry.clone(), Arc::new(resolver));
        (policy, registry)
    }

    fn no_lookups() -> MockResolve {
        let mut resolver = MockResolve::new();
        resolver.expect_software().never();
        resolver.expect_actor().never();
        resolver
    }

    fn resolving_sender() -> MockResolve {
        let mut resolver = MockResolve::new();
        resolver.expect_software().never();
        resolver
            .expect_actor()
            .withf(|uri| uri == "https://remote.example/actor")
            .returning(|_| {
                Some(Arc::new(RemoteActor {
                    id: "https://remote.example/actor".to_string(),
                    inbox: "https://remote.example/actor/inbox".to_string(),
                    endpoints: Some(json!({"sharedInbox": "https://remote.example/inbox"})),
                    public_key: None,
                }))
            });
        resolver
    }

    fn announce() -> Value {
        json!({
            "type": "Announce",
            "actor": "https://remote.example/actor",
            "object": "https://origin.example/notes/1"
        })
    }

    #[tokio::test]
    async fn blocked_software_is_refused_first() {
        let mut config = valid_config();
        config.ap.blocked_software.insert("activityrelay".to_string());
        let mut resolver = MockResolve::new();
        resolver
            .expect_software()
            .withf(|domain| domain == "remote.example")
            .returning(|_| Some("ActivityRelay".to_string()));
        let (policy, _) = policy(config, resolver).await;

        // Unsigned as well, but the software rule comes first
        let request = InboundRequest {
            activity: &announce(),
            validated: false,
        };
        let rejection = policy.authorize(&request).await.unwrap_err();
        assert_eq!(rejection, Rejection::BlockedSoftware);
        assert_eq!(rejection.reason(), "relays have been blocked");
    }

    #[tokio::test]
    async fn software_lookup_failure_does_not_block() {
        let mut config = valid_config();
        config.ap.blocked_software.insert("activityrelay".to_string());
        let mut resolver = MockResolve::new();
        resolver.expect_software().returning(|_| None);
        let (policy, _) = policy(config, resolver).await;

        let follow = json!({"type": "Follow", "actor": "https://remote.example/actor"});
        let request = InboundRequest {
            activity: &follow,
            validated: true,
        };
        assert!(policy.authorize(&request).await.is_ok());
    }

    #[tokio::test]
    async fn missing_actor_and_bad_signature_are_denied() {
        let (policy, _) = policy(valid_config(), no_lookups()).await;

        let request = InboundRequest {
            activity: &json!({"type": "Follow"}),
            validated: true,
        };
        assert_eq!(policy.authorize(&request).await, Err(Rejection::MissingActor));

        let follow = json!({"type": "Follow", "actor": "https://remote.example/actor"});
        let request = InboundRequest {
            activity: &follow,
            validated: false,
        };
        let rejection = policy.authorize(&request).await.unwrap_err();
        assert_eq!(rejection, Rejection::InvalidSignature);
        assert_eq!(rejection.reason(), "access denied");
    }

    #[tokio::test]
    async fn unsigned_announce_is_denied_without_resolving_sender() {
        let (policy, _) = policy(valid_config(), no_lookups()).await;
        let activity = announce();
        let request = InboundRequest {
            activity: &activity,
            validated: false,
        };

        assert_eq!(policy.authorize(&request).await, Err(Rejection::InvalidSignature));
    }

    #[tokio::test]
    async fn non_follow_requires_subscription() {
        let (policy, registry) = policy(valid_config(), resolving_sender()).await;
        let activity = announce();
        let request = InboundRequest {
            activity: &activity,
            validated: true,
        };

        assert_eq!(policy.authorize(&request).await, Err(Rejection::NotSubscribed));

        registry.add("https://remote.example/inbox").await.unwrap();
        assert!(policy.authorize(&request).await.is_ok());
    }

    #[tokio::test]
    async fn unresolved_sender_falls_back_to_conventional_inbox() {
        let mut resolver = MockResolve::new();
        resolver.expect_actor().times(1).returning(|_| None);
        let (policy, registry) = policy(valid_config(), resolver).await;
        registry.add("https://remote.example/inbox").await.unwrap();

        let activity = announce();
        let request = InboundRequest {
            activity: &activity,
            validated: true,
        };
        assert!(policy.authorize(&request).await.is_ok());
    }

    #[tokio::test]
    async fn whitelist_mode_refuses_unlisted_hosts() {
        let mut config = valid_config();
        config.ap.whitelist_enabled = true;
        config.ap.whitelist.insert("friendly.example".to_string());
        let (policy, _) = policy(config, no_lookups()).await;

        let follow = json!({"type": "Follow", "actor": "https://remote.example/actor"});
        let request = InboundRequest {
            activity: &follow,
            validated: true,
        };
        assert_eq!(policy.authorize(&request).await, Err(Rejection::NotWhitelisted));

        let follow = json!({"type": "Follow", "actor": "https://friendly.example/actor"});
        let request = InboundRequest {
            activity: &follow,
            validated: true,
        };
        assert!(policy.authorize(&request).await.is_ok());
    }

    #[test]
    fn rejection_maps_to_unauthorized() {
        match AppError::from(Rejection::NotSubscribed) {
            AppError::Unauthorized(reason) => assert_eq!(reason, "access denied"),
            other => panic!("expected unauthorized, got: {other:?}"),
        }
    }
}
