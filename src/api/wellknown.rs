//! Well-known endpoints
//!
//! - /.well-known/webfinger
//! - /.well-known/nodeinfo
//! - /nodeinfo/2.0.json

use axum::{
    Router,
    extract::{Query, State},
    response::Json,
    routing::get,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::federation::{ACTIVITY_CONTENT_TYPE, NODEINFO_20_REL, host_of};

/// Username the relay actor answers to over WebFinger
const RELAY_USERNAME: &str = "relay";

/// Create well-known router
///
/// Routes:
/// - GET /.well-known/webfinger
/// - GET /.well-known/nodeinfo
/// - GET /nodeinfo/2.0.json
pub fn wellknown_router() -> Router<AppState> {
    Router::new()
        .route("/.well-known/webfinger", get(webfinger))
        .route("/.well-known/nodeinfo", get(nodeinfo_links))
        .route("/nodeinfo/2.0.json", get(nodeinfo))
}

/// WebFinger query parameters
#[derive(Debug, Deserialize)]
struct WebFingerQuery {
    resource: String,
}

/// GET /.well-known/webfinger
///
/// Query: ?resource=acct:relay@{host}
async fn webfinger(
    State(state): State<AppState>,
    Query(query): Query<WebFingerQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let resource = &query.resource;

    let Some(acct) = resource.strip_prefix("acct:") else {
        return Err(AppError::Validation(
            "Resource must start with 'acct:'".to_string(),
        ));
    };

    let Some((username, domain)) = acct.split_once('@') else {
        return Err(AppError::Validation("Invalid acct format".to_string()));
    };

    if username != RELAY_USERNAME || domain != state.config.ap.host {
        return Err(AppError::NotFound);
    }

    let actor_url = state.config.ap.actor_uri();
    Ok(Json(serde_json::json!({
        "subject": resource,
        "aliases": [actor_url.clone()],
        "links": [
            {
                "rel": "self",
                "type": ACTIVITY_CONTENT_TYPE,
                "href": actor_url
            }
        ]
    })))
}

/// GET /.well-known/nodeinfo
async fn nodeinfo_links(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "links": [
            {
                "rel": NODEINFO_20_REL,
                "href": format!("https://{}/nodeinfo/2.0.json", state.config.ap.host)
            }
        ]
    }))
}

/// GET /nodeinfo/2.0.json
///
/// Registered peers are listed by hostname under `metadata.peers`.
async fn nodeinfo(State(state): State<AppState>) -> Json<serde_json::Value> {
    let peers: Vec<String> = state
        .registry
        .list()
        .await
        .iter()
        .filter_map(|inbox| host_of(inbox))
        .collect();

    Json(serde_json::json!({
        "version": "2.0",
        "software": {
            "name": "activityrelay",
            "version": env!("CARGO_PKG_VERSION")
        },
        "protocols": ["activitypub"],
        "services": {
            "inbound": [],
            "outbound": []
        },
        "openRegistrations": true,
        "usage": {
            "users": {
                "total": 1
            },
            "localPosts": 0
        },
        "metadata": {
            "peers": peers
        }
    }))
}
