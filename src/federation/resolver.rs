//! Remote actor and software resolution
//!
//! Fetched actor documents are cached to reduce remote requests. Any fetch
//! or decode failure resolves to `None`; callers treat an unresolvable actor
//! the same as an absent one.

use std::sync::Arc;
use std::time::Duration;

use axum::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};

use crate::federation::signature::ACTIVITY_CONTENT_TYPE;

/// Link relation advertising a NodeInfo 2.0 document
pub const NODEINFO_20_REL: &str = "http://nodeinfo.diaspora.software/ns/schema/2.0";

const ACTOR_CACHE_CAPACITY: u64 = 512;
const ACTOR_CACHE_TTL: Duration = Duration::from_secs(3600);

/// The subset of a remote actor document the relay relies on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteActor {
    pub id: String,
    pub inbox: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<serde_json::Value>,
    #[serde(default, rename = "publicKey", skip_serializing_if = "Option::is_none")]
    pub public_key: Option<ActorPublicKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorPublicKey {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(rename = "publicKeyPem")]
    pub public_key_pem: String,
}

impl RemoteActor {
    /// Where activities for this actor are delivered: its shared inbox when
    /// advertised, its personal inbox otherwise.
    pub fn delivery_inbox(&self) -> &str {
        self.endpoints
            .as_ref()
            .and_then(|endpoints| endpoints.get("sharedInbox"))
            .and_then(|inbox| inbox.as_str())
            .unwrap_or(&self.inbox)
    }
}

/// Resolves remote actors and the software an instance runs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Fetch the actor document at `uri`.
    async fn actor(&self, uri: &str) -> Option<Arc<RemoteActor>>;

    /// NodeInfo software name advertised by `domain`.
    async fn software(&self, domain: &str) -> Option<String>;
}

/// Resolver backed by HTTP fetches
pub struct HttpResolver {
    http_client: Arc<reqwest::Client>,
    /// Cache storage: actor uri -> actor document
    actors: Cache<String, Arc<RemoteActor>>,
}

impl HttpResolver {
    pub fn new(http_client: Arc<reqwest::Client>) -> Self {
        let actors = Cache::builder()
            .max_capacity(ACTOR_CACHE_CAPACITY)
            .time_to_live(ACTOR_CACHE_TTL)
            .build();

        Self {
            http_client,
            actors,
        }
    }

    /// Resolve the software name of the instance served at `base_url`
    /// (scheme and authority, no trailing slash).
    pub async fn software_at(&self, base_url: &str) -> Option<String> {
        let well_known = self
            .fetch_json(&format!("{}/.well-known/nodeinfo", base_url), "application/json")
            .await?;

        let nodeinfo_url = well_known
            .get("links")?
            .as_array()?
            .iter()
            .find(|link| link.get("rel").and_then(|rel| rel.as_str()) == Some(NODEINFO_20_REL))?
            .get("href")?
            .as_str()?
            .to_string();

        let nodeinfo = self.fetch_json(&nodeinfo_url, "application/json").await?;
        nodeinfo
            .get("software")?
            .get("name")?
            .as_str()
            .map(|name| name.to_string())
    }

    async fn fetch_actor(&self, uri: &str) -> Option<Arc<RemoteActor>> {
        let document = self.fetch_json(uri, ACTIVITY_CONTENT_TYPE).await?;

        match serde_json::from_value::<RemoteActor>(document) {
            Ok(actor) => Some(Arc::new(actor)),
            Err(e) => {
                tracing::info!(uri = %uri, "Invalid actor document: {}", e);
                None
            }
        }
    }

    async fn fetch_json(&self, url: &str, accept: &str) -> Option<serde_json::Value> {
        let response = match self
            .http_client
            .get(url)
            .header("Accept", accept)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::info!(url = %url, "Fetch failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::info!(url = %url, status = %response.status(), "Fetch returned error status");
            return None;
        }

        match response.json().await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::info!(url = %url, "Fetch returned invalid JSON: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl Resolve for HttpResolver {
    async fn actor(&self, uri: &str) -> Option<Arc<RemoteActor>> {
        if let Some(actor) = self.actors.get(uri).await {
            tracing::debug!("Actor cache hit for {}", uri);
            return Some(actor);
        }

        tracing::debug!("Actor cache miss for {}, fetching...", uri);
        self.actors
            .optionally_get_with(uri.to_string(), self.fetch_actor(uri))
            .await
    }

    async fn software(&self, domain: &str) -> Option<String> {
        self.software_at(&format!("https://{}", domain)).await
    }
}
