//! `PdmConfig`: the one configuration surface the broker core has (spec
//! §6's CLI/environment surface — `PDM_SERVER_URL` is the only deployment
//! knob the core itself reserves; everything else here is test/embedding
//! convenience, not part of the spec's external interface).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_server_url() -> String {
    "https://api.nillion-storage.example".to_string()
}

fn default_secret_store_dir() -> PathBuf {
    directories_fallback_home().join(".pdm")
}

fn directories_fallback_home() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdmConfig {
    /// Base directory for the file-backed secret store's persistent
    /// namespace.
    #[serde(default = "default_secret_store_dir")]
    pub secret_store_dir: PathBuf,

    /// The remote storage service's base URL (spec §6's one CLI/env
    /// surface, `PDM_SERVER_URL`).
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Inactivity timeout override. `None` uses
    /// [`pdm_session::INACTIVITY_TIMEOUT`]; only ever set by tests, never
    /// by an untrusted caller (spec §4.5).
    #[serde(default)]
    pub inactivity_timeout_override_secs: Option<u64>,

    #[serde(default = "default_max_requests")]
    pub default_rate_limit_max_requests: u32,
    #[serde(default = "default_window_ms")]
    pub default_rate_limit_window_ms: u64,
}

fn default_max_requests() -> u32 {
    pdm_origin_policy::DEFAULT_MAX_REQUESTS
}

fn default_window_ms() -> u64 {
    pdm_origin_policy::DEFAULT_WINDOW_MS
}

impl Default for PdmConfig {
    fn default() -> Self {
        Self {
            secret_store_dir: default_secret_store_dir(),
            server_url: default_server_url(),
            inactivity_timeout_override_secs: None,
            default_rate_limit_max_requests: default_max_requests(),
            default_rate_limit_window_ms: default_window_ms(),
        }
    }
}

impl PdmConfig {
    /// Builds config from environment variables, falling back to
    /// defaults. Library embedders that don't want `clap` use this path.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("PDM_SECRET_STORE_DIR") {
            config.secret_store_dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var("PDM_SERVER_URL") {
            config.server_url = url;
        }
        config
    }

    /// Loads a TOML config file and overlays `PDM_SERVER_URL` if set, so
    /// the one reserved env var always wins over a checked-in file.
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&text)?;
        if let Ok(url) = std::env::var("PDM_SERVER_URL") {
            config.server_url = url;
        }
        Ok(config)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        match self.inactivity_timeout_override_secs {
            Some(secs) => Duration::from_secs(secs),
            None => pdm_session::INACTIVITY_TIMEOUT,
        }
    }
}
