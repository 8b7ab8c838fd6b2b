//! `C8` — the action router: the single entry point for every externally
//! initiated action (spec §4.8).
//!
//! Replaces the source's string-keyed switch with a typed request variant,
//! [`PdmAction`], whose arms carry typed payloads (design note 2). The
//! `match` in [`ActionRouter::dispatch`] is exhaustive by construction:
//! adding an action without a dispatch arm is a compile error.

mod action;
mod envelope;
mod error;

pub use action::{GrantPayload, PdmAction, RevokePayload, StoreDataPayload};
pub use envelope::{RequestEnvelope, RequestSender, ResponseEnvelope};
pub use error::RouterError;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use pdm_origin_policy::{AdmitRejection, OriginPolicy};
use pdm_permissions::PermissionLedger;
use pdm_session::Session;
use pdm_storage_client::StorageBackend;
use serde_json::json;

pub const BROKER_VERSION: &str = env!("CARGO_PKG_VERSION");

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// `C8`. Holds no long-lived state of its own; reads C4-C7's contexts.
pub struct ActionRouter {
    session: Arc<Session>,
    origin_policy: Arc<OriginPolicy>,
    storage: Arc<dyn StorageBackend>,
    permissions: Arc<PermissionLedger>,
}

impl ActionRouter {
    pub fn new(
        session: Arc<Session>,
        origin_policy: Arc<OriginPolicy>,
        storage: Arc<dyn StorageBackend>,
        permissions: Arc<PermissionLedger>,
    ) -> Self {
        Self { session, origin_policy, storage, permissions }
    }

    /// Runs the full sequence from spec §4.8: structural validation,
    /// sender validation, admission, lock gate, activity, dispatch. Always
    /// returns a response envelope — never propagates an error past this
    /// boundary.
    pub async fn handle(&self, request: RequestEnvelope, sender: &RequestSender) -> ResponseEnvelope {
        match self.handle_inner(&request, sender).await {
            Ok(data) => ResponseEnvelope { id: request.id, data: Some(data), error: None, ts: now_ms() },
            Err(err) => {
                tracing::warn!(correlation_id = %request.id, action = %request.action, error = %err, "action rejected");
                ResponseEnvelope { id: request.id, data: None, error: Some(err.to_string()), ts: now_ms() }
            }
        }
    }

    async fn handle_inner(
        &self,
        request: &RequestEnvelope,
        sender: &RequestSender,
    ) -> Result<serde_json::Value, RouterError> {
        // 1. Structural validation.
        if request.id.is_empty() || request.action.is_empty() || request.origin.is_empty() {
            return Err(RouterError::InvalidArgument("correlationId, action, and origin are required".into()));
        }

        // 2. Sender validation: reject requests with no declared URL
        // unless they originate from the host-controlled UI surface.
        if !sender.is_host_ui && sender.url.is_none() {
            return Err(RouterError::InvalidArgument("request does not declare a sender url".into()));
        }

        let action = action::parse(&request.action, &request.data)?;

        // 3. Admission. `connect`/`disconnect` are the lifecycle actions
        // that create/remove the whitelist entry itself, so they bypass
        // admission rather than being gated by a set they are about to
        // define (see DESIGN.md). `unlock`/`lock`/`is_unlocked` are the
        // session-lifecycle trio exempt from the lock gate below; spec
        // scenario 1 runs `unlock` with no prior `connect`, so they must
        // bypass admission too or no origin could ever unlock.
        if !matches!(
            action,
            PdmAction::Connect { .. }
                | PdmAction::Disconnect
                | PdmAction::Unlock { .. }
                | PdmAction::Lock
                | PdmAction::IsUnlocked
        ) {
            match self.origin_policy.admit(&request.origin, &request.action) {
                Ok(()) => {}
                Err(AdmitRejection::RateLimited) => return Err(RouterError::RateLimited),
                Err(AdmitRejection::NotAllowed) | Err(AdmitRejection::Blocked) => {
                    return Err(RouterError::NotAllowed)
                }
            }
        }

        // 4 & 5. Lock gate + activity, except for the three exempt actions.
        if !matches!(action, PdmAction::Unlock { .. } | PdmAction::Lock | PdmAction::IsUnlocked) {
            self.session.touch_or_gate().await.map_err(|err| match err {
                pdm_session::SessionError::Locked => RouterError::Locked,
                pdm_session::SessionError::SessionExpired => RouterError::SessionExpired,
                other => RouterError::Internal(other.to_string()),
            })?;
        }

        // 6. Dispatch.
        self.dispatch(action, &request.origin).await
    }

    async fn dispatch(&self, action: PdmAction, origin: &str) -> Result<serde_json::Value, RouterError> {
        match action {
            PdmAction::Ping => Ok(json!({ "status": "pong", "ts": now_ms(), "version": BROKER_VERSION })),
            PdmAction::Connect { requested_actions, rate_limit } => {
                let config = self.origin_policy.connect(origin, &requested_actions, rate_limit);
                Ok(json!({ "allowedActions": config.allowed_actions }))
            }
            PdmAction::Disconnect => {
                self.origin_policy.disconnect(origin);
                Ok(json!({ "disconnected": true }))
            }
            PdmAction::Unlock { password } => {
                let user_did = self
                    .session
                    .unlock(&password)
                    .await
                    .map_err(|err| self.map_session_error(err))?;
                Ok(json!({ "unlocked": true, "userDid": user_did }))
            }
            PdmAction::Lock => {
                self.session.lock().await;
                Ok(json!({ "locked": true }))
            }
            PdmAction::IsUnlocked => Ok(json!({ "unlocked": self.session.is_unlocked().await })),
            PdmAction::GetIdentity => {
                let did = self.session.user_did().await.ok_or(RouterError::Locked)?;
                Ok(json!({ "userDid": did }))
            }
            PdmAction::StoreData(StoreDataPayload { data, collection_id }) => {
                let document_id = self
                    .storage
                    .store(data, &collection_id)
                    .await
                    .map_err(|err| self.map_storage_error(err))?;
                Ok(json!({ "documentId": document_id }))
            }
            PdmAction::RetrieveData { document_id, collection_id } => {
                let record = self
                    .storage
                    .read(&document_id, &collection_id)
                    .await
                    .map_err(|err| self.map_storage_error(err))?;
                serde_json::to_value(record).map_err(|e| RouterError::Internal(e.to_string()))
            }
            PdmAction::DeleteData { document_id, collection_id } => {
                self.storage
                    .delete(&document_id, &collection_id)
                    .await
                    .map_err(|err| self.map_storage_error(err))?;
                Ok(json!({ "deleted": true }))
            }
            PdmAction::GetUserData => {
                let records = self.storage.list().await.map_err(|err| self.map_storage_error(err))?;
                serde_json::to_value(records).map_err(|e| RouterError::Internal(e.to_string()))
            }
            PdmAction::GrantPermission(GrantPayload { document_id, collection_id, grantee_id, permissions }) => {
                let grant = self
                    .permissions
                    .grant(&document_id, &collection_id, &grantee_id, permissions)
                    .await
                    .map_err(|err| self.map_permission_error(err))?;
                serde_json::to_value(grant).map_err(|e| RouterError::Internal(e.to_string()))
            }
            PdmAction::RevokePermission(RevokePayload { document_id, collection_id, grantee_id, grant_id }) => {
                self.permissions
                    .revoke(&document_id, &collection_id, &grantee_id, grant_id.as_deref())
                    .await
                    .map_err(|err| self.map_permission_error(err))?;
                Ok(json!({ "revoked": true }))
            }
            PdmAction::ListPermissions => {
                let grants = self.permissions.list().await.map_err(|err| self.map_permission_error(err))?;
                serde_json::to_value(grants).map_err(|e| RouterError::Internal(e.to_string()))
            }
        }
    }

    fn map_session_error(&self, err: pdm_session::SessionError) -> RouterError {
        use pdm_session::SessionError::*;
        match err {
            BadPassphrase => RouterError::BadPassphrase,
            NoCredentials => RouterError::InvalidArgument("no credentials have been stored yet".into()),
            Locked => RouterError::Locked,
            SessionExpired => RouterError::SessionExpired,
            other => RouterError::Internal(other.to_string()),
        }
    }

    fn map_storage_error(&self, err: pdm_storage_client::StorageError) -> RouterError {
        use pdm_storage_client::StorageError::*;
        match err {
            Locked => RouterError::Locked,
            MissingCollectionId => RouterError::InvalidArgument("collectionId is required".into()),
            EmptyPermissionSet => RouterError::InvalidArgument("permission set must be non-empty".into()),
            NotFound => RouterError::NotFound,
            Upstream(adapter_err) => self.map_adapter_error(adapter_err),
            other => RouterError::Internal(other.to_string()),
        }
    }

    fn map_adapter_error(&self, err: pdm_net_adapter::AdapterError) -> RouterError {
        use pdm_net_adapter::AdapterError::*;
        match err {
            AdapterUnavailable => RouterError::AdapterUnavailable,
            Timeout => RouterError::Timeout,
            Upstream { status, error_text } => RouterError::UpstreamFailure { status, error_text },
        }
    }

    fn map_permission_error(&self, err: pdm_permissions::PermissionError) -> RouterError {
        match err {
            pdm_permissions::PermissionError::EmptyPermissionSet => {
                RouterError::InvalidArgument("permission set must be non-empty".into())
            }
            pdm_permissions::PermissionError::Storage(storage_err) => self.map_storage_error(storage_err),
        }
    }
}
