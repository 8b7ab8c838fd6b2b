//! `C5` — the inactivity-gated session. Holds derived secrets in volatile
//! memory and mirrors a restore token into ephemeral storage so a short
//! process restart does not force re-unlock (spec §4.5).
//!
//! Modeled as an explicit state machine (design note 1: ambient singleton
//! -> explicit context value) rather than a loose bag of booleans.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pdm_crypto::{decrypt, derive};
use pdm_storage_client::{CredentialBlob, StorageClient};
use pdm_store::{keys, SecretStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no credential blob has been stored yet")]
    NoCredentials,
    #[error("failed to unlock: incorrect passphrase")]
    BadPassphrase,
    #[error("session is locked")]
    Locked,
    #[error("session expired from inactivity")]
    SessionExpired,
    #[error("malformed credential blob: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("secret store error: {0}")]
    Store(#[from] pdm_store::StoreError),
    #[error("storage client initialization failed: {0}")]
    Storage(#[from] pdm_storage_client::StorageError),
}

/// On-disk form of the Credential Blob: `(salt, iv, ciphertext)`, persisted
/// only in this ciphertext form (spec §3).
#[derive(Debug, Serialize, Deserialize)]
struct EncryptedCredentialBlob {
    salt: String,
    iv: String,
    data: String,
}

/// The ephemeral mirror used to restore a session across a short process
/// restart: `(passphrase, lastActivityAt)`. Never the sole source of
/// truth — `Session::lock` and the 15-minute timeout always win.
#[derive(Debug, Serialize, Deserialize)]
struct RestoreToken {
    passphrase: String,
    last_activity_ms: u64,
}

enum SessionState {
    Locked,
    Unlocked { passphrase: String, user_did: String, last_activity_ms: u64 },
}

/// The session manager. `unlock`/`lock`/`is_unlocked` are exempt from the
/// lock gate every other action goes through (spec §4.8 step 4).
pub struct Session {
    state: RwLock<SessionState>,
    store: Arc<dyn SecretStore>,
    storage_client: Arc<StorageClient>,
    timeout: Duration,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

impl Session {
    pub fn new(store: Arc<dyn SecretStore>, storage_client: Arc<StorageClient>) -> Self {
        Self { state: RwLock::new(SessionState::Locked), store, storage_client, timeout: INACTIVITY_TIMEOUT }
    }

    /// Overrides the inactivity timeout. Only ever driven by a config
    /// override meant for tests — never by an untrusted caller at runtime
    /// (spec §4.5).
    pub fn with_timeout(store: Arc<dyn SecretStore>, storage_client: Arc<StorageClient>, timeout: Duration) -> Self {
        Self { state: RwLock::new(SessionState::Locked), store, storage_client, timeout }
    }

    /// Encrypts `credentials` under a key derived from `passphrase` and a
    /// fresh salt, and persists the ciphertext blob. Mutation path used by
    /// the (out-of-scope) credential-entry UI via `CHECK_CREDENTIALS`/
    /// `STORE_CREDENTIALS`; exposed here because it is the only writer of
    /// the Credential Blob's at-rest representation.
    pub fn store_credentials(&self, passphrase: &str, credentials: &CredentialBlob) -> Result<(), SessionError> {
        let salt = pdm_crypto::random_salt();
        let key = derive(passphrase, &salt);
        let plaintext = serde_json::to_vec(credentials)?;
        let envelope = pdm_crypto::encrypt(&key, &plaintext).map_err(|_| SessionError::BadPassphrase)?;
        let blob = EncryptedCredentialBlob {
            salt: BASE64.encode(salt),
            iv: BASE64.encode(envelope.nonce),
            data: BASE64.encode(envelope.ciphertext),
        };
        self.store.put_persistent(keys::NILLION_CREDENTIALS, &serde_json::to_vec(&blob)?)?;
        Ok(())
    }

    pub fn has_credentials(&self) -> Result<bool, SessionError> {
        Ok(self.store.get_persistent(keys::NILLION_CREDENTIALS)?.is_some())
    }

    /// `Locked --unlock(passphrase)--> Unlocked` on success, or
    /// `Locked --unlock(bad)---------> Locked + fail(BadPassphrase)`.
    pub async fn unlock(&self, passphrase: &str) -> Result<String, SessionError> {
        let raw = self
            .store
            .get_persistent(keys::NILLION_CREDENTIALS)?
            .ok_or(SessionError::NoCredentials)?;
        let blob: EncryptedCredentialBlob = serde_json::from_slice(&raw)?;
        let salt: [u8; pdm_crypto::SALT_LEN] = BASE64
            .decode(&blob.salt)
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or(SessionError::BadPassphrase)?;
        let nonce: [u8; pdm_crypto::NONCE_LEN] = BASE64
            .decode(&blob.iv)
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or(SessionError::BadPassphrase)?;
        let ciphertext = BASE64.decode(&blob.data).map_err(|_| SessionError::BadPassphrase)?;

        let key = derive(passphrase, &salt);
        let plaintext = decrypt(&key, &nonce, &ciphertext).map_err(|_| SessionError::BadPassphrase)?;
        let credentials: CredentialBlob = serde_json::from_slice(&plaintext)?;

        let user_did = self.storage_client.initialize(credentials).await?;

        let last_activity_ms = now_ms();
        *self.state.write().await = SessionState::Unlocked {
            passphrase: passphrase.to_string(),
            user_did: user_did.clone(),
            last_activity_ms,
        };
        self.mirror_ephemeral(passphrase, last_activity_ms);
        tracing::info!(user_did = %user_did, "session unlocked");
        Ok(user_did)
    }

    /// `Unlocked --explicit lock----> Locked`.
    pub async fn lock(&self) {
        *self.state.write().await = SessionState::Locked;
        self.clear_ephemeral();
        tracing::info!("session locked");
    }

    /// Returns the current state without any side effect.
    pub async fn is_unlocked(&self) -> bool {
        matches!(*self.state.read().await, SessionState::Unlocked { .. })
    }

    pub async fn user_did(&self) -> Option<String> {
        match &*self.state.read().await {
            SessionState::Unlocked { user_did, .. } => Some(user_did.clone()),
            SessionState::Locked => None,
        }
    }

    /// Enforces the lock gate for every action other than unlock/lock/
    /// is_unlocked (spec §4.8 step 4): locks and reports `SessionExpired`
    /// if idle past the timeout, reports `Locked` if already locked,
    /// otherwise bumps `lastActivityAt` and reports success.
    pub async fn touch_or_gate(&self) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        match &*state {
            SessionState::Locked => Err(SessionError::Locked),
            SessionState::Unlocked { last_activity_ms, passphrase, .. } => {
                let idle = now_ms().saturating_sub(*last_activity_ms);
                if Duration::from_millis(idle) > self.timeout {
                    *state = SessionState::Locked;
                    drop(state);
                    self.clear_ephemeral();
                    tracing::info!("session expired from inactivity");
                    return Err(SessionError::SessionExpired);
                }
                let passphrase = passphrase.clone();
                let now = now_ms();
                if let SessionState::Unlocked { last_activity_ms, .. } = &mut *state {
                    *last_activity_ms = now;
                }
                drop(state);
                self.mirror_ephemeral(&passphrase, now);
                Ok(())
            }
        }
    }

    /// `Locked --restore token valid->Unlocked` / `Locked --restore token
    /// stale->Locked + clear token`. Re-derives the session by replaying
    /// the unlock path with the mirrored passphrase; a short process
    /// restart therefore does not require the user to re-type it.
    pub async fn restore_from_ephemeral(&self) -> Result<bool, SessionError> {
        let Some(raw) = self.store.get_ephemeral(keys::SESSION_ACTIVE) else {
            return Ok(false);
        };
        let token: RestoreToken = match serde_json::from_slice(&raw) {
            Ok(t) => t,
            Err(_) => {
                self.clear_ephemeral();
                return Ok(false);
            }
        };
        let age = now_ms().saturating_sub(token.last_activity_ms);
        if Duration::from_millis(age) > self.timeout {
            self.clear_ephemeral();
            return Ok(false);
        }
        self.unlock(&token.passphrase).await?;
        Ok(true)
    }

    fn mirror_ephemeral(&self, passphrase: &str, last_activity_ms: u64) {
        let token = RestoreToken { passphrase: passphrase.to_string(), last_activity_ms };
        if let Ok(bytes) = serde_json::to_vec(&token) {
            self.store.put_ephemeral(keys::SESSION_ACTIVE, &bytes);
            self.store.put_ephemeral(keys::SESSION_PASSWORD, passphrase.as_bytes());
            self.store.put_ephemeral(keys::LAST_ACTIVITY, &last_activity_ms.to_le_bytes());
        }
    }

    fn clear_ephemeral(&self) {
        self.store.remove_ephemeral(keys::SESSION_ACTIVE);
        self.store.remove_ephemeral(keys::SESSION_PASSWORD);
        self.store.remove_ephemeral(keys::LAST_ACTIVITY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdm_net_adapter::NetworkAdapter;
    use pdm_store::MemorySecretStore;

    fn build() -> Session {
        let store: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
        let adapter = Arc::new(NetworkAdapter::new("http://127.0.0.1:1"));
        let storage_client = Arc::new(StorageClient::new(store.clone(), adapter));
        Session::new(store, storage_client)
    }

    fn creds() -> CredentialBlob {
        CredentialBlob {
            api_key: "K".into(),
            private_key: Some("P".into()),
            user_id: None,
            app_id: "app".into(),
        }
    }

    #[tokio::test]
    async fn unlock_then_is_unlocked() {
        let session = build();
        session.store_credentials("demo123", &creds()).expect("store");
        session.unlock("demo123").await.expect("unlock");
        assert!(session.is_unlocked().await);
    }

    #[tokio::test]
    async fn bad_passphrase_fails_and_stays_locked() {
        let session = build();
        session.store_credentials("demo123", &creds()).expect("store");
        let result = session.unlock("wrong").await;
        assert!(matches!(result, Err(SessionError::BadPassphrase)));
        assert!(!session.is_unlocked().await);
    }

    #[tokio::test]
    async fn touch_or_gate_rejects_when_locked() {
        let session = build();
        let result = session.touch_or_gate().await;
        assert!(matches!(result, Err(SessionError::Locked)));
    }

    #[tokio::test]
    async fn touch_or_gate_bumps_activity_when_unlocked() {
        let session = build();
        session.store_credentials("demo123", &creds()).expect("store");
        session.unlock("demo123").await.expect("unlock");
        session.touch_or_gate().await.expect("touch");
        assert!(session.is_unlocked().await);
    }

    #[tokio::test]
    async fn explicit_lock_clears_unlocked_state() {
        let session = build();
        session.store_credentials("demo123", &creds()).expect("store");
        session.unlock("demo123").await.expect("unlock");
        session.lock().await;
        assert!(!session.is_unlocked().await);
    }

    #[tokio::test]
    async fn idle_past_timeout_locks_and_reports_expired() {
        let store: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
        let adapter = Arc::new(NetworkAdapter::new("http://127.0.0.1:1"));
        let storage_client = Arc::new(StorageClient::new(store.clone(), adapter));
        let session = Session::with_timeout(store, storage_client, Duration::from_millis(5));
        session.store_credentials("demo123", &creds()).expect("store");
        session.unlock("demo123").await.expect("unlock");
        tokio::time::sleep(Duration::from_millis(50)).await;
        let result = session.touch_or_gate().await;
        assert!(matches!(result, Err(SessionError::SessionExpired)));
        assert!(!session.is_unlocked().await);
    }

    #[tokio::test]
    async fn restore_from_ephemeral_re_unlocks_within_timeout() {
        let store: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
        let adapter = Arc::new(NetworkAdapter::new("http://127.0.0.1:1"));
        let storage_client = Arc::new(StorageClient::new(store.clone(), adapter));
        let session = Session::new(store.clone(), storage_client.clone());
        session.store_credentials("demo123", &creds()).expect("store");
        session.unlock("demo123").await.expect("unlock");

        // Simulate a fresh process: a new Session sharing the same stores.
        let restarted = Session::new(store, storage_client);
        let restored = restarted.restore_from_ephemeral().await.expect("restore");
        assert!(restored);
        assert!(restarted.is_unlocked().await);
    }

    #[tokio::test]
    async fn restore_from_ephemeral_is_noop_without_prior_unlock() {
        let session = build();
        let restored = session.restore_from_ephemeral().await.expect("restore");
        assert!(!restored);
        assert!(!session.is_unlocked().await);
    }
}
