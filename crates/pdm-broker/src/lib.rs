//! Wiring, configuration, and logging init for the PDM private-data
//! broker. Owns no component logic itself — [`BrokerContext`] assembles
//! `C1`-`C8` from the other workspace crates behind one explicit value.

mod config;
mod context;
mod logging;

pub use config::PdmConfig;
pub use context::BrokerContext;
pub use logging::init_tracing;

#[cfg(test)]
mod tests {
    use super::*;
    use pdm_router::{RequestEnvelope, RequestSender};
    use pdm_storage_client::CredentialBlob;
    use pdm_store::MemorySecretStore;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn context() -> BrokerContext {
        let mut config = PdmConfig::default();
        config.inactivity_timeout_override_secs = Some(900);
        BrokerContext::with_store(config, Arc::new(MemorySecretStore::new()))
    }

    fn seed_credentials(ctx: &BrokerContext) {
        ctx.session
            .store_credentials(
                "demo123",
                &CredentialBlob {
                    api_key: "K".into(),
                    private_key: Some("P".into()),
                    user_id: None,
                    app_id: "app".into(),
                },
            )
            .expect("store credentials");
    }

    fn sender() -> RequestSender {
        RequestSender { url: Some("https://a.example/app".into()), is_host_ui: false }
    }

    fn req(id: &str, action: &str, data: serde_json::Value, origin: &str) -> RequestEnvelope {
        RequestEnvelope { id: id.into(), action: action.into(), data, origin: origin.into(), ts: None }
    }

    /// Scenario 1 — unlock-then-ping.
    #[tokio::test]
    async fn scenario_unlock_then_ping() {
        let ctx = context();
        seed_credentials(&ctx);
        let sender = sender();

        let unlock = ctx
            .router
            .handle(req("1", "unlock", json!({ "password": "demo123" }), "https://a.example"), &sender)
            .await;
        assert_eq!(unlock.data.unwrap()["unlocked"], json!(true));

        ctx.origin_policy.connect("https://a.example", &[], None);
        let ping = ctx.router.handle(req("2", "ping", json!({}), "https://a.example"), &sender).await;
        assert_eq!(ping.data.unwrap()["status"], json!("pong"));
    }

    /// Scenario 2 — bad passphrase.
    #[tokio::test]
    async fn scenario_bad_passphrase() {
        let ctx = context();
        seed_credentials(&ctx);
        let sender = sender();

        let unlock = ctx
            .router
            .handle(req("1", "unlock", json!({ "password": "wrong" }), "https://a.example"), &sender)
            .await;
        assert!(unlock.error.unwrap().contains("Failed to unlock"));

        let is_unlocked = ctx.router.handle(req("2", "is_unlocked", json!({}), "https://a.example"), &sender).await;
        assert_eq!(is_unlocked.data.unwrap()["unlocked"], json!(false));
    }

    /// Scenario 3 — store, grant, revoke, delete.
    #[tokio::test]
    async fn scenario_store_grant_revoke_delete() {
        let ctx = context();
        seed_credentials(&ctx);
        let sender = sender();
        ctx.router.handle(req("1", "unlock", json!({ "password": "demo123" }), "https://a.example"), &sender).await;
        ctx.origin_policy.connect(
            "https://a.example",
            &[
                "store_data".into(),
                "grant_permission".into(),
                "list_permissions".into(),
                "revoke_permission".into(),
                "delete_data".into(),
            ],
            None,
        );

        let stored = ctx
            .router
            .handle(
                req(
                    "2",
                    "store_data",
                    json!({ "data": { "title": "T", "content": "C", "type": "note" }, "metadata": { "collectionId": "col1" } }),
                    "https://a.example",
                ),
                &sender,
            )
            .await;
        let document_id = stored.data.unwrap()["documentId"].as_str().unwrap().to_string();

        let granted = ctx
            .router
            .handle(
                req(
                    "3",
                    "grant_permission",
                    json!({ "dataId": document_id, "collectionId": "col1", "appDid": "did:nil:app", "permissions": ["read", "write"] }),
                    "https://a.example",
                ),
                &sender,
            )
            .await;
        let grant_id = granted.data.unwrap()["grantId"].as_str().unwrap().to_string();

        let listed = ctx.router.handle(req("4", "list_permissions", json!({}), "https://a.example"), &sender).await;
        assert!(listed.data.unwrap().as_array().unwrap().iter().any(|g| g["grantId"] == json!(grant_id)));

        ctx.router
            .handle(
                req(
                    "5",
                    "revoke_permission",
                    json!({ "dataId": document_id, "collectionId": "col1", "appDid": "did:nil:app", "permissionId": grant_id }),
                    "https://a.example",
                ),
                &sender,
            )
            .await;
        let listed = ctx.router.handle(req("6", "list_permissions", json!({}), "https://a.example"), &sender).await;
        assert!(listed.data.unwrap().as_array().unwrap().is_empty());

        let deleted = ctx
            .router
            .handle(
                req("7", "delete_data", json!({ "documentId": document_id, "collectionId": "col1" }), "https://a.example"),
                &sender,
            )
            .await;
        assert_eq!(deleted.data.unwrap()["deleted"], json!(true));
    }

    /// Scenario 4 — origin not allowed.
    #[tokio::test]
    async fn scenario_origin_not_allowed() {
        let ctx = context();
        seed_credentials(&ctx);
        let sender = sender();
        ctx.router.handle(req("1", "unlock", json!({ "password": "demo123" }), "https://a.example"), &sender).await;

        ctx.router
            .handle(req("2", "connect", json!({ "requestedActions": ["ping"] }), "https://a.example"), &sender)
            .await;
        let response = ctx
            .router
            .handle(
                req("3", "store_data", json!({ "data": {}, "metadata": { "collectionId": "c" } }), "https://a.example"),
                &sender,
            )
            .await;
        assert!(response.error.is_some());
    }

    /// Scenario 5 — rate limit, 50 admitted then the 51st rejected, then
    /// recovers after the window rolls over.
    #[tokio::test]
    async fn scenario_rate_limit() {
        let ctx = context();
        seed_credentials(&ctx);
        let sender = sender();
        ctx.router.handle(req("1", "unlock", json!({ "password": "demo123" }), "https://a.example"), &sender).await;
        ctx.origin_policy.connect(
            "https://a.example",
            &["ping".to_string()],
            Some(pdm_origin_policy::RateLimit { max_requests: 50, window_ms: 80 }),
        );

        for i in 0..50 {
            let response = ctx.router.handle(req(&i.to_string(), "ping", json!({}), "https://a.example"), &sender).await;
            assert!(response.error.is_none(), "request {i} should be admitted");
        }
        let rejected = ctx.router.handle(req("51", "ping", json!({}), "https://a.example"), &sender).await;
        assert!(rejected.error.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let recovered = ctx.router.handle(req("52", "ping", json!({}), "https://a.example"), &sender).await;
        assert!(recovered.error.is_none());
    }

    /// Scenario 6 — online-to-fallback transition on an unreachable
    /// server; store still returns a fresh id and the flag is persisted.
    #[tokio::test]
    async fn scenario_online_to_fallback_transition() {
        let ctx = context();
        seed_credentials(&ctx);
        let sender = sender();
        ctx.router.handle(req("1", "unlock", json!({ "password": "demo123" }), "https://a.example"), &sender).await;
        assert!(ctx.storage_client.is_fallback().await);

        ctx.origin_policy.connect("https://a.example", &["store_data".into(), "get_user_data".into()], None);
        let stored = ctx
            .router
            .handle(
                req("2", "store_data", json!({ "data": {"a": 1}, "metadata": { "collectionId": "col1" } }), "https://a.example"),
                &sender,
            )
            .await;
        let document_id = stored.data.unwrap()["documentId"].as_str().unwrap().to_string();

        let listed = ctx.router.handle(req("3", "get_user_data", json!({}), "https://a.example"), &sender).await;
        let records = listed.data.unwrap();
        assert!(records.as_array().unwrap().iter().any(|r| r["documentId"] == json!(document_id)));

        assert_eq!(
            ctx.store.get_persistent(pdm_store::keys::DEMO_MODE).unwrap(),
            Some(b"1".to_vec())
        );
    }

    #[tokio::test]
    async fn session_restore_after_simulated_restart() {
        let mut config = PdmConfig::default();
        config.inactivity_timeout_override_secs = Some(900);
        let store: Arc<dyn pdm_store::SecretStore> = Arc::new(MemorySecretStore::new());
        let first = BrokerContext::with_store(config.clone(), store.clone());
        seed_credentials(&first);
        first.session.unlock("demo123").await.expect("unlock");

        let restarted = BrokerContext::with_store(config, store);
        assert!(restarted.try_restore_session().await);
        assert!(restarted.session.is_unlocked().await);
    }

    #[tokio::test]
    async fn unknown_action_is_invalid_argument() {
        let ctx = context();
        seed_credentials(&ctx);
        let sender = sender();
        ctx.origin_policy.connect("https://a.example", &[], None);
        let response = ctx.router.handle(req("1", "not_a_real_action", json!({}), "https://a.example"), &sender).await;
        assert!(response.error.unwrap().contains("invalid argument"));
    }
}
