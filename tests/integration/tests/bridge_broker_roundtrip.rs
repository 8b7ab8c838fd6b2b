//! Exercises the full `C9 -> C8` path: a raw in-page message, validated and
//! forwarded by `ContentRelay`, reaching a live `BrokerContext`'s router —
//! the seam neither `pdm-bridge`'s nor `pdm-broker`'s own unit tests cross.

use std::sync::Arc;

use pdm_bridge::relay::{ContentRelay, InProcessTransport};
use pdm_broker::{BrokerContext, PdmConfig};
use pdm_storage_client::CredentialBlob;
use pdm_store::MemorySecretStore;
use serde_json::json;

fn broker() -> BrokerContext {
    let mut config = PdmConfig::default();
    config.inactivity_timeout_override_secs = Some(900);
    BrokerContext::with_store(config, Arc::new(MemorySecretStore::new()))
}

fn in_page_message(id: &str, origin: &str, action: &str, data: serde_json::Value) -> serde_json::Value {
    json!({ "source": "window", "origin": origin, "type": "request", "id": id, "action": action, "data": data })
}

#[tokio::test]
async fn relay_forwards_a_validated_message_to_a_live_broker() {
    let ctx = broker();
    ctx.session
        .store_credentials(
            "demo123",
            &CredentialBlob { api_key: "K".into(), private_key: Some("P".into()), user_id: None, app_id: "app".into() },
        )
        .expect("store credentials");

    let relay = ContentRelay::new(Box::new(InProcessTransport(ctx.router.clone())));

    let unlock = relay
        .handle(in_page_message("req-1", "https://page.example", "unlock", json!({ "password": "demo123" })), "https://page.example")
        .await;
    assert_eq!(unlock.id, "req-1");
    assert_eq!(unlock.data.unwrap()["unlocked"], json!(true));

    ctx.origin_policy.connect("https://page.example", &["store_data".into(), "get_user_data".into()], None);

    let stored = relay
        .handle(
            in_page_message(
                "req-2",
                "https://page.example",
                "store_data",
                json!({ "data": { "title": "note" }, "metadata": { "collectionId": "col1" } }),
            ),
            "https://page.example",
        )
        .await;
    let document_id = stored.data.unwrap()["documentId"].as_str().unwrap().to_string();

    let listed = relay.handle(in_page_message("req-3", "https://page.example", "get_user_data", json!({})), "https://page.example").await;
    let records = listed.data.unwrap();
    assert!(records.as_array().unwrap().iter().any(|r| r["documentId"] == json!(document_id)));
}

#[tokio::test]
async fn relay_rejects_a_spoofed_origin_before_it_ever_reaches_the_broker() {
    let ctx = broker();
    ctx.session
        .store_credentials(
            "demo123",
            &CredentialBlob { api_key: "K".into(), private_key: None, user_id: None, app_id: "app".into() },
        )
        .expect("store credentials");
    ctx.origin_policy.connect("https://page.example", &["ping".into()], None);

    let relay = ContentRelay::new(Box::new(InProcessTransport(ctx.router.clone())));

    // The envelope claims to be from a different origin than the relay's own
    // authoritative page origin; validation must fail before dispatch, so
    // the rejection can never be mistaken for an unconnected-origin error.
    let mut message = in_page_message("req-1", "https://evil.example", "ping", json!({}));
    message["origin"] = json!("https://evil.example");
    let response = relay.handle(message, "https://page.example").await;

    assert!(response.error.is_some());
    assert_eq!(response.id, "req-1");
}

#[tokio::test]
async fn relay_never_forwards_a_message_with_a_non_window_source() {
    let ctx = broker();
    let relay = ContentRelay::new(Box::new(InProcessTransport(ctx.router.clone())));

    let mut message = in_page_message("req-9", "https://page.example", "ping", json!({}));
    message["source"] = json!("not-window");
    let response = relay.handle(message, "https://page.example").await;
    assert!(response.error.is_some());
}

#[tokio::test]
async fn host_restart_id_is_stable_across_independent_relay_instances_sharing_a_broker() {
    let ctx = broker();
    let relay_a = ContentRelay::new(Box::new(InProcessTransport(ctx.router.clone())));
    let relay_b = ContentRelay::new(Box::new(InProcessTransport(ctx.router.clone())));

    // Each relay mints its own runtime id independently of the broker it
    // talks to; a page observing two different ids across reconnects is the
    // host-restart signal regardless of what the broker itself is doing.
    assert!(ContentRelay::host_restarted(relay_a.runtime_id(), relay_b.runtime_id()));
}
