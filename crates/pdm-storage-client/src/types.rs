use serde::{Deserialize, Serialize};

/// Plaintext credential material. Exists only transiently between the
/// session manager's unlock path and [`crate::StorageClient::initialize`];
/// never persisted in this form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialBlob {
    pub api_key: String,
    pub private_key: Option<String>,
    pub user_id: Option<String>,
    pub app_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Execute,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub document_id: String,
    pub collection_id: String,
    pub owner: String,
    pub payload: serde_json::Value,
    pub stored_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityGrant {
    pub grant_id: String,
    pub document_id: String,
    pub collection_id: String,
    pub grantee_id: String,
    pub permissions: Vec<Permission>,
    pub granted_at: u64,
}

pub(crate) fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
