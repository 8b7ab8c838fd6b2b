//! Two-lifetime keyed secret storage: persistent (survives process
//! restart, ciphertext only) and ephemeral (cleared on process exit).

mod atomic_io;
pub mod keys;

use std::collections::BTreeMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("key '{0}' contains characters unsafe for the file-backed namespace")]
    UnsafeKey(String),
}

/// Two-lifetime keyed store. Implementors must keep persistent and
/// ephemeral namespaces disjoint; callers never mix the two.
pub trait SecretStore: Send + Sync {
    fn put_persistent(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
    fn get_persistent(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn remove_persistent(&self, key: &str) -> Result<(), StoreError>;
    /// Bulk get-all for migration/diagnostics.
    fn get_all_persistent(&self) -> Result<BTreeMap<String, Vec<u8>>, StoreError>;

    fn put_ephemeral(&self, key: &str, bytes: &[u8]);
    fn get_ephemeral(&self, key: &str) -> Option<Vec<u8>>;
    fn remove_ephemeral(&self, key: &str);
}

/// File-backed persistent namespace (one file per key, atomic write) plus
/// an in-memory ephemeral namespace. Suitable for a long-lived broker
/// process; the ephemeral half never touches disk.
pub struct FileSecretStore {
    base_dir: PathBuf,
    ephemeral: Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl FileSecretStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ephemeral: Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() || key.contains(['/', '\\', '\0']) {
            return Err(StoreError::UnsafeKey(key.to_string()));
        }
        Ok(self.base_dir.join(format!("{key}.bin")))
    }
}

impl SecretStore for FileSecretStore {
    fn put_persistent(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        atomic_io::write_bytes_atomic(&path, bytes)?;
        tracing::debug!(key, bytes = bytes.len(), "persisted secret-store key");
        Ok(())
    }

    fn get_persistent(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn remove_persistent(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn get_all_persistent(&self) -> Result<BTreeMap<String, Vec<u8>>, StoreError> {
        let mut out = BTreeMap::new();
        let entries = match std::fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(source) => return Err(StoreError::Io { path: self.base_dir.clone(), source }),
        };
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io { path: self.base_dir.clone(), source })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let bytes = std::fs::read(&path).map_err(|source| StoreError::Io { path: path.clone(), source })?;
            out.insert(stem.to_string(), bytes);
        }
        Ok(out)
    }

    fn put_ephemeral(&self, key: &str, bytes: &[u8]) {
        self.ephemeral.lock().insert(key.to_string(), bytes.to_vec());
    }

    fn get_ephemeral(&self, key: &str) -> Option<Vec<u8>> {
        self.ephemeral.lock().get(key).cloned()
    }

    fn remove_ephemeral(&self, key: &str) {
        self.ephemeral.lock().remove(key);
    }
}

/// Fully in-memory store (both lifetimes), used by tests and by embedders
/// that provide their own durable persistence out of process.
#[derive(Default)]
pub struct MemorySecretStore {
    persistent: Mutex<std::collections::HashMap<String, Vec<u8>>>,
    ephemeral: Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn put_persistent(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.persistent.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get_persistent(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.persistent.lock().get(key).cloned())
    }

    fn remove_persistent(&self, key: &str) -> Result<(), StoreError> {
        self.persistent.lock().remove(key);
        Ok(())
    }

    fn get_all_persistent(&self) -> Result<BTreeMap<String, Vec<u8>>, StoreError> {
        Ok(self.persistent.lock().iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn put_ephemeral(&self, key: &str, bytes: &[u8]) {
        self.ephemeral.lock().insert(key.to_string(), bytes.to_vec());
    }

    fn get_ephemeral(&self, key: &str) -> Option<Vec<u8>> {
        self.ephemeral.lock().get(key).cloned()
    }

    fn remove_ephemeral(&self, key: &str) {
        self.ephemeral.lock().remove(key);
    }
}
