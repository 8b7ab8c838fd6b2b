//! Typed store/list/read/delete/grant/revoke operations against the remote
//! storage service, with a permanent local-persistence fallback.
//!
//! The client's mode is a sum type ([`ClientMode`]): there is exactly one
//! transition, `Online -> Fallback`, and it is never reversed within a
//! process (spec §4.4, §9 design note 3). Both arms implement
//! [`StorageBackend`] so callers never branch on mode themselves.

mod fallback;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use pdm_net_adapter::{AdapterError, CallEnvelope, NetworkAdapter};
use pdm_store::SecretStore;
use serde_json::json;
use thiserror::Error;
use tokio::sync::RwLock;

pub use types::{CapabilityGrant, CredentialBlob, DocumentRecord, Permission};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage client is not initialized")]
    Locked,
    #[error("collectionId is required")]
    MissingCollectionId,
    #[error("permission set must be non-empty")]
    EmptyPermissionSet,
    #[error("document or grant not found")]
    NotFound,
    #[error("remote storage call failed: {0}")]
    Upstream(#[from] AdapterError),
    #[error("local fallback store error: {0}")]
    Store(#[from] pdm_store::StoreError),
    #[error("malformed record: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A backend that can satisfy every storage operation, regardless of
/// whether it talks to the remote service or a local persisted ledger.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn store(&self, payload: serde_json::Value, collection_id: &str) -> Result<String, StorageError>;
    async fn list(&self) -> Result<Vec<DocumentRecord>, StorageError>;
    async fn read(&self, document_id: &str, collection_id: &str) -> Result<DocumentRecord, StorageError>;
    async fn delete(&self, document_id: &str, collection_id: &str) -> Result<(), StorageError>;
    async fn grant(
        &self,
        document_id: &str,
        collection_id: &str,
        grantee_id: &str,
        permissions: Vec<Permission>,
    ) -> Result<CapabilityGrant, StorageError>;
    async fn revoke(
        &self,
        document_id: &str,
        collection_id: &str,
        grantee_id: &str,
        grant_id: Option<&str>,
    ) -> Result<(), StorageError>;
    async fn list_grants(&self) -> Result<Vec<CapabilityGrant>, StorageError>;
}

fn require_collection_id(collection_id: &str) -> Result<(), StorageError> {
    if collection_id.is_empty() {
        return Err(StorageError::MissingCollectionId);
    }
    Ok(())
}

/// The online arm: talks to the remote service over [`NetworkAdapter`]
/// using the user's signing key.
pub struct OnlineState {
    adapter: Arc<NetworkAdapter>,
    user_private_key: String,
    user_did: String,
}

#[async_trait]
impl StorageBackend for OnlineState {
    async fn store(&self, payload: serde_json::Value, collection_id: &str) -> Result<String, StorageError> {
        require_collection_id(collection_id)?;
        let body = json!({
            "userPrivateKey": self.user_private_key,
            "collectionId": collection_id,
            "data": payload,
        });
        let response = self.adapter.call(CallEnvelope::post("/api/data/store", body)).await?;
        response
            .get("dataId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or(StorageError::NotFound)
    }

    async fn list(&self) -> Result<Vec<DocumentRecord>, StorageError> {
        let endpoint = format!("/api/data/list?userKey={}", self.user_did);
        let response = self.adapter.call(CallEnvelope::get(endpoint)).await?;
        let records = response.get("data").cloned().unwrap_or(serde_json::Value::Array(vec![]));
        Ok(serde_json::from_value(records)?)
    }

    async fn read(&self, document_id: &str, collection_id: &str) -> Result<DocumentRecord, StorageError> {
        require_collection_id(collection_id)?;
        let endpoint = format!(
            "/api/data/{document_id}?userKey={}&collection={collection_id}",
            self.user_did
        );
        let response = self.adapter.call(CallEnvelope::get(endpoint)).await?;
        Ok(serde_json::from_value(response)?)
    }

    async fn delete(&self, document_id: &str, collection_id: &str) -> Result<(), StorageError> {
        require_collection_id(collection_id)?;
        let endpoint = format!(
            "/api/data/{document_id}?userKey={}&collection={collection_id}",
            self.user_did
        );
        self.adapter.call(CallEnvelope::delete(endpoint)).await?;
        Ok(())
    }

    async fn grant(
        &self,
        document_id: &str,
        collection_id: &str,
        grantee_id: &str,
        permissions: Vec<Permission>,
    ) -> Result<CapabilityGrant, StorageError> {
        require_collection_id(collection_id)?;
        if permissions.is_empty() {
            return Err(StorageError::EmptyPermissionSet);
        }
        let body = json!({
            "userPrivateKey": self.user_private_key,
            "dataId": document_id,
            "collectionId": collection_id,
            "appDid": grantee_id,
            "permissions": permissions,
        });
        let response = self.adapter.call(CallEnvelope::post("/api/permissions/grant", body)).await?;
        Ok(serde_json::from_value(response)?)
    }

    async fn revoke(
        &self,
        document_id: &str,
        collection_id: &str,
        grantee_id: &str,
        _grant_id: Option<&str>,
    ) -> Result<(), StorageError> {
        require_collection_id(collection_id)?;
        let body = json!({
            "userPrivateKey": self.user_private_key,
            "dataId": document_id,
            "collectionId": collection_id,
            "appDid": grantee_id,
        });
        self.adapter.call(CallEnvelope::post("/api/permissions/revoke", body)).await?;
        Ok(())
    }

    async fn list_grants(&self) -> Result<Vec<CapabilityGrant>, StorageError> {
        let body = json!({ "userPrivateKey": self.user_private_key });
        let response = self.adapter.call(CallEnvelope::post("/api/permissions/list", body)).await?;
        let grants = response.get("data").cloned().unwrap_or(serde_json::Value::Array(vec![]));
        Ok(serde_json::from_value(grants)?)
    }
}

/// The fallback arm: the same contract against a JSON ledger in the
/// secret store's persistent namespace, keyed by user DID.
pub struct FallbackState {
    store: Arc<dyn SecretStore>,
    user_did: String,
    api_key: String,
}

#[async_trait]
impl StorageBackend for FallbackState {
    async fn store(&self, payload: serde_json::Value, collection_id: &str) -> Result<String, StorageError> {
        require_collection_id(collection_id)?;
        let mut documents = fallback::load_documents(&self.store, &self.user_did)?;
        let document_id = pdm_crypto::new_uuid().to_string();
        documents.push(DocumentRecord {
            document_id: document_id.clone(),
            collection_id: collection_id.to_string(),
            owner: self.user_did.clone(),
            payload,
            stored_at: types::current_unix_timestamp_ms(),
        });
        fallback::save_documents(&self.store, &self.user_did, &documents)?;
        tracing::warn!(user_did = %self.user_did, document_id, "stored document in fallback mode");
        Ok(document_id)
    }

    async fn list(&self) -> Result<Vec<DocumentRecord>, StorageError> {
        let documents = fallback::load_documents(&self.store, &self.user_did)?;
        if !documents.is_empty() {
            return Ok(documents);
        }
        let sibling_did = sibling_did_from_api_key(&self.api_key);
        if sibling_did == self.user_did {
            return Ok(documents);
        }
        fallback::migrate_from_sibling(&self.store, &self.user_did, &sibling_did)
    }

    async fn read(&self, document_id: &str, collection_id: &str) -> Result<DocumentRecord, StorageError> {
        require_collection_id(collection_id)?;
        let documents = fallback::load_documents(&self.store, &self.user_did)?;
        documents
            .into_iter()
            .find(|d| d.document_id == document_id && d.collection_id == collection_id)
            .ok_or(StorageError::NotFound)
    }

    async fn delete(&self, document_id: &str, collection_id: &str) -> Result<(), StorageError> {
        require_collection_id(collection_id)?;
        let mut documents = fallback::load_documents(&self.store, &self.user_did)?;
        documents.retain(|d| !(d.document_id == document_id && d.collection_id == collection_id));
        fallback::save_documents(&self.store, &self.user_did, &documents)
    }

    async fn grant(
        &self,
        document_id: &str,
        collection_id: &str,
        grantee_id: &str,
        permissions: Vec<Permission>,
    ) -> Result<CapabilityGrant, StorageError> {
        require_collection_id(collection_id)?;
        if permissions.is_empty() {
            return Err(StorageError::EmptyPermissionSet);
        }
        let mut grants = fallback::load_grants(&self.store, &self.user_did)?;
        let grant = CapabilityGrant {
            grant_id: pdm_crypto::new_uuid().to_string(),
            document_id: document_id.to_string(),
            collection_id: collection_id.to_string(),
            grantee_id: grantee_id.to_string(),
            permissions,
            granted_at: types::current_unix_timestamp_ms(),
        };
        grants.push(grant.clone());
        fallback::save_grants(&self.store, &self.user_did, &grants)?;
        Ok(grant)
    }

    async fn revoke(
        &self,
        document_id: &str,
        collection_id: &str,
        grantee_id: &str,
        grant_id: Option<&str>,
    ) -> Result<(), StorageError> {
        require_collection_id(collection_id)?;
        let mut grants = fallback::load_grants(&self.store, &self.user_did)?;
        match grant_id {
            Some(id) => grants.retain(|g| g.grant_id != id),
            None => grants.retain(|g| {
                !(g.document_id == document_id
                    && g.collection_id == collection_id
                    && g.grantee_id == grantee_id)
            }),
        }
        fallback::save_grants(&self.store, &self.user_did, &grants)
    }

    async fn list_grants(&self) -> Result<Vec<CapabilityGrant>, StorageError> {
        fallback::load_grants(&self.store, &self.user_did)
    }
}

fn sibling_did_from_api_key(api_key: &str) -> String {
    format!("did:pdm:{}", hex::encode(pdm_crypto::hash(api_key.as_bytes())))
}

/// Either arm of the mode sum type; [`StorageClient`] holds exactly one of
/// these behind a single transition point.
enum ClientMode {
    Online(OnlineState),
    Fallback(FallbackState),
}

/// `C4` — the storage client. Initialized once by the session manager's
/// unlock path; transitions `Online -> Fallback` at most once per process,
/// either at initialization (remote `did` lookup fails) or on the first
/// operation that hits an upstream failure once already online (spec §7,
/// §8 scenario 6).
pub struct StorageClient {
    mode: RwLock<Option<ClientMode>>,
    store: Arc<dyn SecretStore>,
    adapter: Arc<NetworkAdapter>,
    api_key: RwLock<String>,
}

impl StorageClient {
    pub fn new(store: Arc<dyn SecretStore>, adapter: Arc<NetworkAdapter>) -> Self {
        Self { mode: RwLock::new(None), store, adapter, api_key: RwLock::new(String::new()) }
    }

    /// Unlocks the credential blob's contents into a live backend. Queries
    /// the remote service for the user's `did`; on any failure falls back
    /// permanently to local persistence for the remainder of the process.
    pub async fn initialize(&self, credentials: CredentialBlob) -> Result<String, StorageError> {
        *self.api_key.write().await = credentials.api_key.clone();
        let private_key = credentials.private_key.clone().unwrap_or_default();
        let online_attempt = self
            .adapter
            .call(CallEnvelope::post(
                "/api/user/did",
                json!({ "userPrivateKey": private_key }),
            ))
            .await
            .ok()
            .and_then(|response| response.get("did").and_then(|v| v.as_str()).map(str::to_string));

        let user_did = match online_attempt {
            Some(did) => {
                self.store.put_persistent(pdm_store::keys::USER_DID, did.as_bytes())?;
                self.store.remove_persistent(pdm_store::keys::DEMO_MODE)?;
                let mut mode = self.mode.write().await;
                *mode = Some(ClientMode::Online(OnlineState {
                    adapter: self.adapter.clone(),
                    user_private_key: private_key,
                    user_did: did.clone(),
                }));
                tracing::info!(user_did = %did, "storage client online");
                did
            }
            None => {
                let did = self
                    .store
                    .get_persistent(pdm_store::keys::USER_DID)?
                    .and_then(|bytes| String::from_utf8(bytes).ok())
                    .unwrap_or_else(|| sibling_did_from_api_key(&credentials.api_key));
                self.store.put_persistent(pdm_store::keys::USER_DID, did.as_bytes())?;
                self.store.put_persistent(pdm_store::keys::DEMO_MODE, b"1")?;
                let mut mode = self.mode.write().await;
                *mode = Some(ClientMode::Fallback(FallbackState {
                    store: self.store.clone(),
                    user_did: did.clone(),
                    api_key: credentials.api_key.clone(),
                }));
                tracing::warn!(user_did = %did, "storage client entered fallback mode permanently for this process");
                did
            }
        };
        Ok(user_did)
    }

    pub async fn is_fallback(&self) -> bool {
        matches!(*self.mode.read().await, Some(ClientMode::Fallback(_)))
    }

    /// Builds a [`FallbackState`] from the current `Online` arm's `did`
    /// and the api key captured at `initialize`, persists the sticky
    /// `DEMO_MODE` flag, and swaps `mode` over to it. A no-op if `mode`
    /// is not currently `Online` (e.g. a racing caller already tripped
    /// the transition).
    async fn enter_fallback(&self) -> Result<(), StorageError> {
        let user_did = {
            let guard = self.mode.read().await;
            match guard.as_ref() {
                Some(ClientMode::Online(state)) => state.user_did.clone(),
                _ => return Ok(()),
            }
        };
        let api_key = self.api_key.read().await.clone();
        self.store.put_persistent(pdm_store::keys::DEMO_MODE, b"1")?;
        let mut mode = self.mode.write().await;
        if matches!(mode.as_ref(), Some(ClientMode::Online(_))) {
            *mode = Some(ClientMode::Fallback(FallbackState { store: self.store.clone(), user_did, api_key }));
            tracing::warn!("storage client transitioned online -> fallback after an operation failure");
        }
        Ok(())
    }

    /// Runs `f` against the live backend. If that backend is `Online` and
    /// `f` fails with an upstream error, transitions permanently to
    /// `Fallback` (spec §7, §9 design note 3) and retries `f` once against
    /// the new fallback backend before surfacing any error.
    async fn with_backend<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: for<'a> Fn(&'a dyn StorageBackend) -> BoxFuture<'a, Result<T, StorageError>>,
    {
        let (result, was_online) = {
            let guard = self.mode.read().await;
            match guard.as_ref() {
                Some(ClientMode::Online(state)) => (f(state).await, true),
                Some(ClientMode::Fallback(state)) => (f(state).await, false),
                None => return Err(StorageError::Locked),
            }
        };

        if was_online && matches!(result, Err(StorageError::Upstream(_))) {
            self.enter_fallback().await?;
            let guard = self.mode.read().await;
            if let Some(ClientMode::Fallback(state)) = guard.as_ref() {
                return f(state).await;
            }
        }
        result
    }
}

#[async_trait]
impl StorageBackend for StorageClient {
    async fn store(&self, payload: serde_json::Value, collection_id: &str) -> Result<String, StorageError> {
        let collection_id = collection_id.to_string();
        self.with_backend(move |b| {
            let payload = payload.clone();
            let collection_id = collection_id.clone();
            async move { b.store(payload, &collection_id).await }.boxed()
        })
        .await
    }

    async fn list(&self) -> Result<Vec<DocumentRecord>, StorageError> {
        self.with_backend(|b| async move { b.list().await }.boxed()).await
    }

    async fn read(&self, document_id: &str, collection_id: &str) -> Result<DocumentRecord, StorageError> {
        let document_id = document_id.to_string();
        let collection_id = collection_id.to_string();
        self.with_backend(move |b| {
            let document_id = document_id.clone();
            let collection_id = collection_id.clone();
            async move { b.read(&document_id, &collection_id).await }.boxed()
        })
        .await
    }

    async fn delete(&self, document_id: &str, collection_id: &str) -> Result<(), StorageError> {
        let document_id = document_id.to_string();
        let collection_id = collection_id.to_string();
        self.with_backend(move |b| {
            let document_id = document_id.clone();
            let collection_id = collection_id.clone();
            async move { b.delete(&document_id, &collection_id).await }.boxed()
        })
        .await
    }

    async fn grant(
        &self,
        document_id: &str,
        collection_id: &str,
        grantee_id: &str,
        permissions: Vec<Permission>,
    ) -> Result<CapabilityGrant, StorageError> {
        let document_id = document_id.to_string();
        let collection_id = collection_id.to_string();
        let grantee_id = grantee_id.to_string();
        self.with_backend(move |b| {
            let document_id = document_id.clone();
            let collection_id = collection_id.clone();
            let grantee_id = grantee_id.clone();
            let permissions = permissions.clone();
            async move { b.grant(&document_id, &collection_id, &grantee_id, permissions).await }.boxed()
        })
        .await
    }

    async fn revoke(
        &self,
        document_id: &str,
        collection_id: &str,
        grantee_id: &str,
        grant_id: Option<&str>,
    ) -> Result<(), StorageError> {
        let document_id = document_id.to_string();
        let collection_id = collection_id.to_string();
        let grantee_id = grantee_id.to_string();
        let grant_id = grant_id.map(str::to_string);
        self.with_backend(move |b| {
            let document_id = document_id.clone();
            let collection_id = collection_id.clone();
            let grantee_id = grantee_id.clone();
            let grant_id = grant_id.clone();
            async move { b.revoke(&document_id, &collection_id, &grantee_id, grant_id.as_deref()).await }.boxed()
        })
        .await
    }

    async fn list_grants(&self) -> Result<Vec<CapabilityGrant>, StorageError> {
        self.with_backend(|b| async move { b.list_grants().await }.boxed()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdm_store::MemorySecretStore;

    fn fallback_client() -> StorageClient {
        let store: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
        let adapter = Arc::new(NetworkAdapter::new("http://127.0.0.1:1"));
        StorageClient::new(store, adapter)
    }

    #[tokio::test]
    async fn uninitialized_client_returns_locked() {
        let client = fallback_client();
        let result = client.list().await;
        assert!(matches!(result, Err(StorageError::Locked)));
    }

    #[tokio::test]
    async fn unreachable_remote_enters_fallback_and_persists_flag() {
        let client = fallback_client();
        let creds = CredentialBlob {
            api_key: "K".into(),
            private_key: Some("P".into()),
            user_id: None,
            app_id: "app".into(),
        };
        client.initialize(creds).await.expect("initialize");
        assert!(client.is_fallback().await);
    }

    #[tokio::test]
    async fn missing_collection_id_is_invalid_argument() {
        let client = fallback_client();
        let creds = CredentialBlob {
            api_key: "K".into(),
            private_key: Some("P".into()),
            user_id: None,
            app_id: "app".into(),
        };
        client.initialize(creds).await.expect("initialize");
        let result = client.store(serde_json::json!({"a": 1}), "").await;
        assert!(matches!(result, Err(StorageError::MissingCollectionId)));
    }

    #[tokio::test]
    async fn store_then_read_round_trips_in_fallback_mode() {
        let client = fallback_client();
        let creds = CredentialBlob {
            api_key: "K".into(),
            private_key: Some("P".into()),
            user_id: None,
            app_id: "app".into(),
        };
        client.initialize(creds).await.expect("initialize");
        let payload = serde_json::json!({"title": "T", "content": "C"});
        let id = client.store(payload.clone(), "col1").await.expect("store");
        let record = client.read(&id, "col1").await.expect("read");
        assert_eq!(record.payload, payload);
        assert_eq!(record.collection_id, "col1");
    }

    #[tokio::test]
    async fn grant_then_revoke_by_id_removes_exactly_one() {
        let client = fallback_client();
        let creds = CredentialBlob {
            api_key: "K".into(),
            private_key: Some("P".into()),
            user_id: None,
            app_id: "app".into(),
        };
        client.initialize(creds).await.expect("initialize");
        let id = client.store(serde_json::json!({"a": 1}), "col1").await.unwrap();
        let grant_a = client
            .grant(&id, "col1", "did:pdm:app", vec![Permission::Read])
            .await
            .unwrap();
        let _grant_b = client
            .grant(&id, "col1", "did:pdm:app", vec![Permission::Write])
            .await
            .unwrap();
        client.revoke(&id, "col1", "did:pdm:app", Some(&grant_a.grant_id)).await.unwrap();
        let remaining = client.list_grants().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.iter().all(|g| g.grant_id != grant_a.grant_id));
    }

    #[tokio::test]
    async fn revoke_by_tuple_removes_all_matching_entries() {
        let client = fallback_client();
        let creds = CredentialBlob {
            api_key: "K".into(),
            private_key: Some("P".into()),
            user_id: None,
            app_id: "app".into(),
        };
        client.initialize(creds).await.expect("initialize");
        let id = client.store(serde_json::json!({"a": 1}), "col1").await.unwrap();
        client.grant(&id, "col1", "did:pdm:app", vec![Permission::Read]).await.unwrap();
        client.grant(&id, "col1", "did:pdm:app", vec![Permission::Write]).await.unwrap();
        client.revoke(&id, "col1", "did:pdm:app", None).await.unwrap();
        let remaining = client.list_grants().await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn empty_permission_set_is_rejected() {
        let client = fallback_client();
        let creds = CredentialBlob {
            api_key: "K".into(),
            private_key: Some("P".into()),
            user_id: None,
            app_id: "app".into(),
        };
        client.initialize(creds).await.expect("initialize");
        let id = client.store(serde_json::json!({"a": 1}), "col1").await.unwrap();
        let result = client.grant(&id, "col1", "did:pdm:app", vec![]).await;
        assert!(matches!(result, Err(StorageError::EmptyPermissionSet)));
    }
}
