//! Typed request variant replacing the source's string-keyed dispatch
//! (spec §9 design note 2). Each arm carries the payload shape its row of
//! the spec §4.8 table specifies.

use pdm_origin_policy::RateLimit;
use pdm_storage_client::Permission;
use serde::Deserialize;

use crate::RouterError;

#[derive(Debug, Deserialize)]
struct ConnectData {
    #[serde(default, rename = "requestedActions")]
    requested_actions: Vec<String>,
    #[serde(default, rename = "rateLimit")]
    rate_limit: Option<RateLimitPayload>,
}

#[derive(Debug, Deserialize)]
struct RateLimitPayload {
    #[serde(rename = "maxRequests")]
    max_requests: u32,
    #[serde(rename = "windowMs")]
    window_ms: u64,
}

impl From<RateLimitPayload> for RateLimit {
    fn from(p: RateLimitPayload) -> Self {
        RateLimit { max_requests: p.max_requests, window_ms: p.window_ms }
    }
}

#[derive(Debug, Deserialize)]
struct UnlockData {
    password: String,
}

#[derive(Debug, Deserialize)]
struct StoreDataMetadata {
    #[serde(rename = "collectionId")]
    collection_id: String,
}

#[derive(Debug, Deserialize)]
struct StoreDataRaw {
    data: serde_json::Value,
    metadata: StoreDataMetadata,
}

#[derive(Debug, Clone)]
pub struct StoreDataPayload {
    pub data: serde_json::Value,
    pub collection_id: String,
}

#[derive(Debug, Deserialize)]
struct DocumentRef {
    #[serde(rename = "documentId")]
    document_id: String,
    #[serde(rename = "collectionId")]
    collection_id: String,
}

#[derive(Debug, Deserialize)]
struct GrantRaw {
    #[serde(rename = "dataId")]
    data_id: String,
    #[serde(rename = "collectionId")]
    collection_id: String,
    #[serde(rename = "appDid")]
    app_did: String,
    permissions: Vec<Permission>,
}

#[derive(Debug, Clone)]
pub struct GrantPayload {
    pub document_id: String,
    pub collection_id: String,
    pub grantee_id: String,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Deserialize)]
struct RevokeRaw {
    #[serde(rename = "dataId")]
    data_id: String,
    #[serde(rename = "collectionId")]
    collection_id: String,
    #[serde(rename = "appDid")]
    app_did: String,
    #[serde(default, rename = "permissionId")]
    permission_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RevokePayload {
    pub document_id: String,
    pub collection_id: String,
    pub grantee_id: String,
    pub grant_id: Option<String>,
}

/// One arm per row of spec §4.8's action table.
#[derive(Debug, Clone)]
pub enum PdmAction {
    Ping,
    Connect { requested_actions: Vec<String>, rate_limit: Option<RateLimit> },
    Disconnect,
    Unlock { password: String },
    Lock,
    IsUnlocked,
    GetIdentity,
    StoreData(StoreDataPayload),
    RetrieveData { document_id: String, collection_id: String },
    DeleteData { document_id: String, collection_id: String },
    GetUserData,
    GrantPermission(GrantPayload),
    RevokePermission(RevokePayload),
    ListPermissions,
}

fn bad(action: &str, err: serde_json::Error) -> RouterError {
    RouterError::InvalidArgument(format!("malformed payload for action '{action}': {err}"))
}

pub fn parse(action: &str, data: &serde_json::Value) -> Result<PdmAction, RouterError> {
    match action {
        "ping" => Ok(PdmAction::Ping),
        "connect" => {
            let parsed: ConnectData = serde_json::from_value(data.clone()).map_err(|e| bad(action, e))?;
            Ok(PdmAction::Connect {
                requested_actions: parsed.requested_actions,
                rate_limit: parsed.rate_limit.map(RateLimit::from),
            })
        }
        "disconnect" => Ok(PdmAction::Disconnect),
        "unlock" => {
            let parsed: UnlockData = serde_json::from_value(data.clone()).map_err(|e| bad(action, e))?;
            Ok(PdmAction::Unlock { password: parsed.password })
        }
        "lock" => Ok(PdmAction::Lock),
        "is_unlocked" => Ok(PdmAction::IsUnlocked),
        "get_identity" => Ok(PdmAction::GetIdentity),
        "store_data" => {
            let parsed: StoreDataRaw = serde_json::from_value(data.clone()).map_err(|e| bad(action, e))?;
            Ok(PdmAction::StoreData(StoreDataPayload {
                data: parsed.data,
                collection_id: parsed.metadata.collection_id,
            }))
        }
        "retrieve_data" => {
            let parsed: DocumentRef = serde_json::from_value(data.clone()).map_err(|e| bad(action, e))?;
            Ok(PdmAction::RetrieveData { document_id: parsed.document_id, collection_id: parsed.collection_id })
        }
        "delete_data" => {
            let parsed: DocumentRef = serde_json::from_value(data.clone()).map_err(|e| bad(action, e))?;
            Ok(PdmAction::DeleteData { document_id: parsed.document_id, collection_id: parsed.collection_id })
        }
        "get_user_data" => Ok(PdmAction::GetUserData),
        "grant_permission" => {
            let parsed: GrantRaw = serde_json::from_value(data.clone()).map_err(|e| bad(action, e))?;
            if parsed.permissions.is_empty() {
                return Err(RouterError::InvalidArgument("permission set must be non-empty".into()));
            }
            Ok(PdmAction::GrantPermission(GrantPayload {
                document_id: parsed.data_id,
                collection_id: parsed.collection_id,
                grantee_id: parsed.app_did,
                permissions: parsed.permissions,
            }))
        }
        "revoke_permission" => {
            let parsed: RevokeRaw = serde_json::from_value(data.clone()).map_err(|e| bad(action, e))?;
            Ok(PdmAction::RevokePermission(RevokePayload {
                document_id: parsed.data_id,
                collection_id: parsed.collection_id,
                grantee_id: parsed.app_did,
                grant_id: parsed.permission_id,
            }))
        }
        "list_permissions" => Ok(PdmAction::ListPermissions),
        other => Err(RouterError::InvalidArgument(format!("unknown action '{other}'"))),
    }
}
