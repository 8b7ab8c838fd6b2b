//! Local-persistence mode: the same typed operations backed by JSON arrays
//! in the secret store's persistent namespace, keyed by user DID.

use std::sync::Arc;

use pdm_store::{keys, SecretStore};

use crate::types::{CapabilityGrant, DocumentRecord};
use crate::StorageError;

pub fn load_documents(
    store: &Arc<dyn SecretStore>,
    user_did: &str,
) -> Result<Vec<DocumentRecord>, StorageError> {
    let key = keys::demo_data_key(user_did);
    match store.get_persistent(&key)? {
        Some(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_default()),
        None => Ok(Vec::new()),
    }
}

pub fn save_documents(
    store: &Arc<dyn SecretStore>,
    user_did: &str,
    documents: &[DocumentRecord],
) -> Result<(), StorageError> {
    let key = keys::demo_data_key(user_did);
    let bytes = serde_json::to_vec(documents)?;
    store.put_persistent(&key, &bytes)?;
    Ok(())
}

pub fn load_grants(
    store: &Arc<dyn SecretStore>,
    user_did: &str,
) -> Result<Vec<CapabilityGrant>, StorageError> {
    let key = keys::permissions_key(user_did);
    match store.get_persistent(&key)? {
        Some(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_default()),
        None => Ok(Vec::new()),
    }
}

pub fn save_grants(
    store: &Arc<dyn SecretStore>,
    user_did: &str,
    grants: &[CapabilityGrant],
) -> Result<(), StorageError> {
    let key = keys::permissions_key(user_did);
    let bytes = serde_json::to_vec(grants)?;
    store.put_persistent(&key, &bytes)?;
    Ok(())
}

/// One-time best-effort migration from a sibling user-did key, attempted
/// only when `list()` finds an empty local document list.
pub fn migrate_from_sibling(
    store: &Arc<dyn SecretStore>,
    user_did: &str,
    sibling_did: &str,
) -> Result<Vec<DocumentRecord>, StorageError> {
    let sibling = load_documents(store, sibling_did)?;
    if sibling.is_empty() {
        return Ok(Vec::new());
    }
    save_documents(store, user_did, &sibling)?;
    tracing::info!(user_did, sibling_did, count = sibling.len(), "migrated fallback documents from sibling did");
    Ok(sibling)
}
