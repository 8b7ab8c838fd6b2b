//! The fixed external error-kind taxonomy (spec §7). Every internal error
//! enum across the workspace is mapped onto exactly one of these by
//! [`crate::ActionRouter`]; no internal `Display` impl leaks to the wire.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Failed to unlock: incorrect passphrase")]
    BadPassphrase,
    #[error("locked")]
    Locked,
    #[error("session expired")]
    SessionExpired,
    #[error("not allowed")]
    NotAllowed,
    #[error("rate limited")]
    RateLimited,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("PDM request timeout")]
    Timeout,
    #[error("adapter unavailable")]
    AdapterUnavailable,
    #[error("upstream failure: status {status}, {error_text}")]
    UpstreamFailure { status: u16, error_text: String },
    #[error("not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(String),
}
