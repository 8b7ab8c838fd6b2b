//! Content relay (spec §4.9): validates the in-page envelope and forwards
//! it to its destination through a [`Transport`]. `InProcessTransport` is
//! the native/testing path — a direct call into
//! [`pdm_router::ActionRouter`] with no message-passing boundary at all.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use pdm_router::{RequestEnvelope, RequestSender, ResponseEnvelope};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::is_file_scheme_origin;

/// The relay's own timeout, distinct from the page shim's (spec §4.9).
pub const RELAY_TIMEOUT: Duration = Duration::from_secs(30);

const SOURCE_WINDOW: &str = "window";
const MESSAGE_TYPE_REQUEST: &str = "request";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("message source must be the page window")]
    InvalidSource,
    #[error("message origin does not match the page origin")]
    InvalidOrigin,
    #[error("message type must be 'request'")]
    InvalidType,
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
}

#[derive(Debug, Deserialize)]
struct InPageEnvelope {
    source: Option<String>,
    origin: Option<String>,
    #[serde(rename = "type")]
    message_type: Option<String>,
    id: Option<String>,
    action: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

/// Validates `source === this window`, `origin === page origin` (file
/// scheme exempted), `type === request`, and the presence of id/action,
/// exactly per §4.9/§6. The forwarded request's `origin` is always the
/// relay's own page-origin argument, never the envelope's claimed value —
/// a spoofed `origin` field cannot widen what the request is admitted as.
pub fn validate_in_page_message(
    raw: &serde_json::Value,
    page_origin: &str,
) -> Result<RequestEnvelope, RelayError> {
    let envelope: InPageEnvelope =
        serde_json::from_value(raw.clone()).map_err(|_| RelayError::MissingField("id/action"))?;

    if envelope.source.as_deref() != Some(SOURCE_WINDOW) {
        return Err(RelayError::InvalidSource);
    }
    if envelope.message_type.as_deref() != Some(MESSAGE_TYPE_REQUEST) {
        return Err(RelayError::InvalidType);
    }
    if !is_file_scheme_origin(page_origin) && envelope.origin.as_deref() != Some(page_origin) {
        return Err(RelayError::InvalidOrigin);
    }
    let id = envelope.id.filter(|v| !v.is_empty()).ok_or(RelayError::MissingField("id"))?;
    let action = envelope.action.filter(|v| !v.is_empty()).ok_or(RelayError::MissingField("action"))?;

    Ok(RequestEnvelope { id, action, data: envelope.data, origin: page_origin.to_string(), ts: None })
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn timeout_response(id: String) -> ResponseEnvelope {
    ResponseEnvelope { id, data: None, error: Some("PDM request timeout".into()), ts: now_ms() }
}

/// Carries an already-validated request to wherever the action router
/// actually lives. `?Send` because the wasm32 implementation is built on
/// non-`Send` JS futures.
#[async_trait(?Send)]
pub trait Transport {
    async fn forward(&self, request: RequestEnvelope, sender: RequestSender) -> ResponseEnvelope;
}

/// Native/testing transport: a direct call into the router, with the
/// relay's own 30s timeout applied around it.
pub struct InProcessTransport(pub std::sync::Arc<pdm_router::ActionRouter>);

#[cfg(not(target_arch = "wasm32"))]
#[async_trait(?Send)]
impl Transport for InProcessTransport {
    async fn forward(&self, request: RequestEnvelope, sender: RequestSender) -> ResponseEnvelope {
        let id = request.id.clone();
        match tokio::time::timeout(RELAY_TIMEOUT, self.0.handle(request, &sender)).await {
            Ok(response) => response,
            Err(_) => timeout_response(id),
        }
    }
}

/// One content relay per content-script instance. `runtime_id` is minted
/// once at construction; the page side compares it across calls to detect
/// that the host (background) context restarted underneath it.
pub struct ContentRelay {
    transport: Box<dyn Transport>,
    runtime_id: Uuid,
}

impl ContentRelay {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport, runtime_id: Uuid::new_v4() }
    }

    pub fn runtime_id(&self) -> Uuid {
        self.runtime_id
    }

    /// Validates and forwards a raw in-page message. Always returns a
    /// response envelope; a validation failure never reaches the router.
    pub async fn handle(&self, raw: serde_json::Value, page_origin: &str) -> ResponseEnvelope {
        let correlation_id = raw.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let request = match validate_in_page_message(&raw, page_origin) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(error = %err, "rejected in-page message");
                return ResponseEnvelope { id: correlation_id, data: None, error: Some(err.to_string()), ts: now_ms() };
            }
        };
        let sender = RequestSender { url: Some(page_origin.to_string()), is_host_ui: false };
        self.transport.forward(request, sender).await
    }

    /// True once the host's advertised runtime id no longer matches what
    /// the page last observed — the host process restarted.
    pub fn host_restarted(previous: Uuid, current: Uuid) -> bool {
        previous != current
    }

    /// The in-page notice injected when [`Self::host_restarted`] is true.
    pub fn reload_notice() -> serde_json::Value {
        serde_json::json!({
            "type": "PDM_HOST_RESTARTED",
            "message": "The PDM background service restarted; reload this page to continue.",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdm_net_adapter::NetworkAdapter;
    use pdm_origin_policy::OriginPolicy;
    use pdm_permissions::PermissionLedger;
    use pdm_router::ActionRouter;
    use pdm_session::Session;
    use pdm_storage_client::{CredentialBlob, StorageClient};
    use pdm_store::{MemorySecretStore, SecretStore};
    use serde_json::json;
    use std::sync::Arc;

    fn valid_envelope(id: &str, action: &str, origin: &str, data: serde_json::Value) -> serde_json::Value {
        json!({ "source": "window", "origin": origin, "type": "request", "id": id, "action": action, "data": data })
    }

    #[test]
    fn rejects_wrong_source() {
        let mut msg = valid_envelope("1", "ping", "https://a.example", json!({}));
        msg["source"] = json!("not-window");
        assert_eq!(validate_in_page_message(&msg, "https://a.example"), Err(RelayError::InvalidSource));
    }

    #[test]
    fn rejects_wrong_type() {
        let mut msg = valid_envelope("1", "ping", "https://a.example", json!({}));
        msg["type"] = json!("response");
        assert_eq!(validate_in_page_message(&msg, "https://a.example"), Err(RelayError::InvalidType));
    }

    #[test]
    fn rejects_mismatched_origin() {
        let msg = valid_envelope("1", "ping", "https://evil.example", json!({}));
        assert_eq!(validate_in_page_message(&msg, "https://a.example"), Err(RelayError::InvalidOrigin));
    }

    #[test]
    fn file_scheme_origin_is_exempt_from_the_origin_check() {
        let msg = valid_envelope("1", "ping", "anything-the-host-reports", json!({}));
        let request = validate_in_page_message(&msg, "null").expect("file-scheme page is exempt");
        assert_eq!(request.origin, "null");
    }

    #[test]
    fn missing_id_is_rejected() {
        let mut msg = valid_envelope("1", "ping", "https://a.example", json!({}));
        msg["id"] = json!("");
        assert_eq!(validate_in_page_message(&msg, "https://a.example"), Err(RelayError::MissingField("id")));
    }

    async fn router() -> Arc<ActionRouter> {
        let store: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
        let adapter = Arc::new(NetworkAdapter::new("http://127.0.0.1:1"));
        let storage_client = Arc::new(StorageClient::new(store.clone(), adapter));
        let session = Arc::new(Session::new(store, storage_client.clone()));
        let origin_policy = Arc::new(OriginPolicy::new());
        let permissions = Arc::new(PermissionLedger::new(storage_client.clone()));
        session
            .store_credentials(
                "demo123",
                &CredentialBlob { api_key: "K".into(), private_key: Some("P".into()), user_id: None, app_id: "app".into() },
            )
            .expect("store credentials");
        Arc::new(ActionRouter::new(session, origin_policy, storage_client, permissions))
    }

    #[tokio::test]
    async fn valid_message_is_forwarded_to_the_router() {
        let router = router().await;
        router
            .handle(
                pdm_router::RequestEnvelope {
                    id: "warm".into(),
                    action: "unlock".into(),
                    data: json!({ "password": "demo123" }),
                    origin: "https://a.example".into(),
                    ts: None,
                },
                &RequestSender { url: Some("https://a.example/app".into()), is_host_ui: false },
            )
            .await;
        let relay = ContentRelay::new(Box::new(InProcessTransport(router.clone())));

        let msg = valid_envelope("corr-1", "is_unlocked", "https://a.example", json!({}));
        let response = relay.handle(msg, "https://a.example").await;
        assert_eq!(response.id, "corr-1");
        assert_eq!(response.data.unwrap()["unlocked"], json!(true));
    }

    #[tokio::test]
    async fn invalid_message_never_reaches_the_router() {
        let relay = ContentRelay::new(Box::new(InProcessTransport(router().await)));
        let mut msg = valid_envelope("corr-2", "ping", "https://a.example", json!({}));
        msg["origin"] = json!("https://evil.example");
        let response = relay.handle(msg, "https://a.example").await;
        assert_eq!(response.error.unwrap(), RelayError::InvalidOrigin.to_string());
    }

    #[test]
    fn host_restart_is_detected_by_runtime_id_change() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        assert!(ContentRelay::host_restarted(first, second));
        assert!(!ContentRelay::host_restarted(first, first));
    }
}
