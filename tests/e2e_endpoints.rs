//! E2E tests for the relay's public documents and basic server functionality

mod common;

use common::{Peer, RELAY_HOST, TestRelay};
use serde_json::Value;

#[tokio::test]
async fn test_health_check() {
    let relay = TestRelay::new().await;

    let (status, body) = relay.get("/health").await;

    assert_eq!(status, 200);
    assert_eq!(body, "OK");
}

#[tokio::test]
async fn test_404_for_unknown_routes() {
    let relay = TestRelay::new().await;

    let (status, _) = relay.get("/users/someone").await;

    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_actor_document() {
    let relay = TestRelay::new().await;

    let (status, body) = relay.get("/actor").await;
    assert_eq!(status, 200);

    let actor: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(actor["type"], "Application");
    assert_eq!(actor["id"], format!("https://{}/actor", RELAY_HOST));
    assert_eq!(actor["inbox"], format!("https://{}/inbox", RELAY_HOST));
    assert_eq!(actor["preferredUsername"], "relay");
    assert_eq!(
        actor["publicKey"]["publicKeyPem"],
        relay.state.identity.public_key_pem()
    );
}

#[tokio::test]
async fn test_actor_key_survives_restart() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let path = temp_dir.path().join("relay.db");

    let first = {
        let store = activityrelay::data::Database::connect(&path).await.unwrap();
        activityrelay::federation::RelayIdentity::load_or_generate(&store)
            .await
            .unwrap()
    };
    let second = {
        let store = activityrelay::data::Database::connect(&path).await.unwrap();
        activityrelay::federation::RelayIdentity::load_or_generate(&store)
            .await
            .unwrap()
    };

    assert_eq!(first.public_key_pem(), second.public_key_pem());
}

#[tokio::test]
async fn test_registry_survives_restart() {
    let relay = TestRelay::new().await;
    let alpha = Peer::spawn("alpha").await;
    relay.subscribe(&alpha).await;

    let store = activityrelay::data::Database::connect(&relay.state.config.database.path)
        .await
        .unwrap();
    let registry = activityrelay::data::SubscriberRegistry::load(std::sync::Arc::new(store))
        .await
        .unwrap();

    assert!(registry.contains(&alpha.inbox).await);
}

#[tokio::test]
async fn test_homepage_lists_instances() {
    let relay = TestRelay::new().await;
    let alpha = Peer::spawn("alpha").await;
    relay.subscribe(&alpha).await;

    let (status, body) = relay.get("/").await;

    assert_eq!(status, 200);
    assert!(body.contains("Test relay"));
    assert!(body.contains("List of 1 registered instances"));
    assert!(body.contains("127.0.0.1"));
}

#[tokio::test]
async fn test_nodeinfo_discovery() {
    let relay = TestRelay::new().await;

    let (status, body) = relay.get("/.well-known/nodeinfo").await;
    assert_eq!(status, 200);
    let links: Value = serde_json::from_str(&body).unwrap();
    let href = links["links"][0]["href"].as_str().unwrap();
    assert_eq!(href, format!("https://{}/nodeinfo/2.0.json", RELAY_HOST));

    let (status, body) = relay.get("/nodeinfo/2.0.json").await;
    assert_eq!(status, 200);
    let nodeinfo: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(nodeinfo["version"], "2.0");
    assert_eq!(nodeinfo["software"]["name"], "activityrelay");
}

#[tokio::test]
async fn test_webfinger() {
    let relay = TestRelay::new().await;

    let (status, body) = relay
        .get(&format!(
            "/.well-known/webfinger?resource=acct:relay@{}",
            RELAY_HOST
        ))
        .await;

    assert_eq!(status, 200);
    let jrd: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(jrd["links"][0]["rel"], "self");
    assert_eq!(jrd["links"][0]["href"], format!("https://{}/actor", RELAY_HOST));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    activityrelay::metrics::init_metrics();
    let relay = TestRelay::new().await;

    let (status, body) = relay.get("/metrics").await;

    assert_eq!(status, 200);
    assert!(body.contains("activityrelay_subscribers"));
}
