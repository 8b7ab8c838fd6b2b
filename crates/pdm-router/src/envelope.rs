//! `REQUEST`/`RESPONSE` and `PDM_MESSAGE`/`PDM_RESPONSE` wire shapes
//! (spec §6), shared with `pdm-bridge`.

use serde::{Deserialize, Serialize};

/// Inbound request envelope: `{id, action, data, origin, ts}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestEnvelope {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub origin: String,
    #[serde(default)]
    pub ts: Option<u64>,
}

/// Outbound response envelope: `{correlationId, data?, error?, ts}`. Field
/// is named `id` to match the wire shape's `id`/`correlationId` pairing
/// (the in-page shim correlates on this field).
#[derive(Debug, Clone, Serialize)]
pub struct ResponseEnvelope {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ts: u64,
}

/// Caller identity as seen by the host runtime at the message-passing
/// boundary: does the message declare a URL, and does it come from the
/// host-controlled UI surface (credential-entry form) rather than an
/// arbitrary extension-internal context?
#[derive(Debug, Clone, Default)]
pub struct RequestSender {
    pub url: Option<String>,
    pub is_host_ui: bool,
}
