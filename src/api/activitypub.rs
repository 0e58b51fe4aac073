//! ActivityPub endpoints
//!
//! - Relay actor
//! - Inbox (activity receiving)

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::OriginalUri;
use axum::{
    Router,
    extract::State,
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::AppState;
use crate::error::AppError;
use crate::federation::{
    ACTIVITY_CONTENT_TYPE, InboundRequest, RemoteActor, activity_actor, verify_request,
};
use crate::metrics::{INBOX_REQUEST_DURATION_SECONDS, POLICY_REJECTIONS};

/// Create ActivityPub router
///
/// Routes:
/// - GET /actor - Relay actor document
/// - POST /inbox - Shared inbox
pub fn activitypub_router() -> Router<AppState> {
    Router::new()
        .route("/actor", get(actor))
        .route("/inbox", post(inbox))
}

fn activity_json(body: String) -> Response {
    ([(header::CONTENT_TYPE, ACTIVITY_CONTENT_TYPE)], body).into_response()
}

/// GET /actor
///
/// Returns the relay's Application actor. URLs are built from the request
/// `Host`, falling back to the configured host.
async fn actor(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(&state.config.ap.host);
    let actor_url = format!("https://{}/actor", host);

    let document = serde_json::json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "endpoints": {"sharedInbox": format!("https://{}/inbox", host)},
        "followers": format!("https://{}/followers", host),
        "following": format!("https://{}/following", host),
        "inbox": format!("https://{}/inbox", host),
        "name": "ActivityRelay",
        "type": "Application",
        "id": actor_url,
        "publicKey": state.identity.public_key_document(&actor_url),
        "summary": "ActivityRelay bot",
        "preferredUsername": "relay",
        "url": actor_url,
    });

    activity_json(document.to_string())
}

/// POST /inbox
///
/// Receives incoming ActivityPub activities.
///
/// # Steps
/// 1. Parse activity
/// 2. Verify HTTP Signature
/// 3. Apply inbound policy
/// 4. Resolve sender and process based on type
///
/// Background deliveries started by processing are not awaited.
async fn inbox(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let _timer = INBOX_REQUEST_DURATION_SECONDS.start_timer();

    // 1. Parse activity
    let activity: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Invalid JSON: {}", e)))?;
    if !activity.is_object() {
        return Err(AppError::Validation(
            "Activity must be a JSON object".to_string(),
        ));
    }

    // 2. Verify signature
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/inbox");
    let validated = verify_request(state.resolver.as_ref(), "POST", path, &headers, &body).await;

    // 3. Apply inbound policy
    let request = InboundRequest {
        activity: &activity,
        validated,
    };
    if let Err(rejection) = state.policy.authorize(&request).await {
        POLICY_REJECTIONS
            .with_label_values(&[rejection.rule()])
            .inc();
        tracing::info!(
            actor = ?activity_actor(&activity),
            rule = rejection.rule(),
            "Inbound activity rejected"
        );
        return Err(rejection.into());
    }

    // 4. Resolve sender and process
    let sender: Option<Arc<RemoteActor>> = match activity_actor(&activity) {
        Some(actor_uri) => state.resolver.actor(actor_uri).await,
        None => None,
    };
    let Some(sender) = sender else {
        tracing::info!(actor = ?activity_actor(&activity), "Failed to fetch actor");
        return Ok(activity_json("{}".to_string()));
    };

    tracing::debug!(payload = %activity, "Accepted activity");
    state.processor.process(&sender, &activity).await?;

    Ok(activity_json("{}".to_string()))
}
