//! `C6` — the capability-grant ledger.
//!
//! In Online mode this is a thin projection over the remote service; in
//! Fallback mode the same [`StorageBackend`] is the authoritative record
//! (spec §4.6). The ledger never duplicates storage state — it only
//! enforces the invariants common to both modes before delegating: a
//! non-empty permission set, and exact-id-vs-tuple revoke dispatch.

use std::sync::Arc;

use pdm_storage_client::{CapabilityGrant, Permission, StorageBackend, StorageError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("permission set must be non-empty")]
    EmptyPermissionSet,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// `C6`. Holds no state of its own beyond a handle to the storage backend.
pub struct PermissionLedger {
    backend: Arc<dyn StorageBackend>,
}

impl PermissionLedger {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Appends `(grantId = fresh uuid, ..., grantedAt = now)`. Duplicates
    /// over the same `(documentId, collectionId, granteeId)` are permitted
    /// by design (spec §3).
    pub async fn grant(
        &self,
        document_id: &str,
        collection_id: &str,
        grantee_id: &str,
        permissions: Vec<Permission>,
    ) -> Result<CapabilityGrant, PermissionError> {
        if permissions.is_empty() {
            return Err(PermissionError::EmptyPermissionSet);
        }
        let grant = self.backend.grant(document_id, collection_id, grantee_id, permissions).await?;
        tracing::debug!(
            grant_id = %grant.grant_id,
            document_id,
            collection_id,
            grantee_id,
            "permission granted"
        );
        Ok(grant)
    }

    /// Removes by `grantId` when supplied (exact match, at most one
    /// entry); otherwise removes every entry matching the
    /// `(documentId, collectionId, granteeId)` tuple.
    pub async fn revoke(
        &self,
        document_id: &str,
        collection_id: &str,
        grantee_id: &str,
        grant_id: Option<&str>,
    ) -> Result<(), PermissionError> {
        self.backend.revoke(document_id, collection_id, grantee_id, grant_id).await?;
        tracing::debug!(document_id, collection_id, grantee_id, grant_id, "permission revoked");
        Ok(())
    }

    /// All grants in insertion order (spec §9 open question 3: duplicate
    /// listing order is explicitly insertion order, not deduplicated).
    pub async fn list(&self) -> Result<Vec<CapabilityGrant>, PermissionError> {
        Ok(self.backend.list_grants().await?)
    }
}
