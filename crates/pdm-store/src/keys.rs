//! Persisted-state key layout, matching the broker's external interface
//! table verbatim so every component addresses the same namespace.

/// Prefix reserved to the broker within the persistent keyed namespace.
pub const PREFIX: &str = "pdm_";

pub const NILLION_CREDENTIALS: &str = "pdm_nillion_credentials";
pub const USER_IDENTITY: &str = "pdm_user_identity";
pub const ORIGIN_CONFIGS: &str = "pdm_origin_configs";
pub const USER_DID: &str = "pdm_user_did";
pub const DEMO_MODE: &str = "pdm_demo_mode";

pub fn demo_data_key(user_did: &str) -> String {
    format!("pdm_demo_data_{user_did}")
}

pub fn permissions_key(user_did: &str) -> String {
    format!("pdm_permissions_{user_did}")
}

/// Ephemeral-only keys: never written via `put_persistent`.
pub const SESSION_ACTIVE: &str = "pdm_session_active";
pub const SESSION_PASSWORD: &str = "pdm_session_password";
pub const LAST_ACTIVITY: &str = "pdm_last_activity";
