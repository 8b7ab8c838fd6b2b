//! `BrokerContext`: the single explicit value that replaces the source's
//! ambient process-wide singletons (spec §9 design note 1). Constructed
//! once at process start and passed explicitly, so test substitution is
//! trivial and there is no import-order hazard.

use std::sync::Arc;

use pdm_net_adapter::NetworkAdapter;
use pdm_origin_policy::OriginPolicy;
use pdm_permissions::PermissionLedger;
use pdm_router::ActionRouter;
use pdm_session::Session;
use pdm_storage_client::{StorageBackend, StorageClient};
use pdm_store::{FileSecretStore, SecretStore};

use crate::config::PdmConfig;

pub struct BrokerContext {
    pub config: PdmConfig,
    pub store: Arc<dyn SecretStore>,
    pub adapter: Arc<NetworkAdapter>,
    pub storage_client: Arc<StorageClient>,
    pub session: Arc<Session>,
    pub origin_policy: Arc<OriginPolicy>,
    pub permissions: Arc<PermissionLedger>,
    pub router: Arc<ActionRouter>,
}

impl BrokerContext {
    /// Production constructor: a file-backed secret store rooted at
    /// `config.secret_store_dir`.
    pub fn new(config: PdmConfig) -> Self {
        let store: Arc<dyn SecretStore> = Arc::new(FileSecretStore::new(config.secret_store_dir.clone()));
        Self::with_store(config, store)
    }

    /// Test/embedding constructor: caller supplies the secret store (e.g.
    /// an in-memory one), so unit and integration tests never touch disk.
    pub fn with_store(config: PdmConfig, store: Arc<dyn SecretStore>) -> Self {
        let adapter = Arc::new(NetworkAdapter::new(config.server_url.clone()));
        let storage_client = Arc::new(StorageClient::new(store.clone(), adapter.clone()));
        let session = Arc::new(Session::with_timeout(
            store.clone(),
            storage_client.clone(),
            config.inactivity_timeout(),
        ));
        let origin_policy = Arc::new(OriginPolicy::new());
        let permissions = Arc::new(PermissionLedger::new(storage_client.clone() as Arc<dyn StorageBackend>));
        let router = Arc::new(ActionRouter::new(
            session.clone(),
            origin_policy.clone(),
            storage_client.clone() as Arc<dyn StorageBackend>,
            permissions.clone(),
        ));

        Self { config, store, adapter, storage_client, session, origin_policy, permissions, router }
    }

    /// Best-effort restore of a session across a short process restart
    /// (spec §4.5's ephemeral restore token path). Call once at startup,
    /// after constructing the context.
    pub async fn try_restore_session(&self) -> bool {
        match self.session.restore_from_ephemeral().await {
            Ok(restored) => restored,
            Err(err) => {
                tracing::warn!(error = %err, "session restore from ephemeral token failed");
                false
            }
        }
    }
}
