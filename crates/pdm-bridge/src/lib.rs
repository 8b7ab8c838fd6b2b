//! `C9` — the injected bridge: the in-page capability surface and the
//! content relay that tunnels it to [`pdm_router::ActionRouter`] (spec
//! §4.9). Two contexts, two modules:
//!
//! - [`page`] — compiled only for `wasm32-unknown-unknown`, the
//!   `wasm-bindgen` shim a web page actually calls.
//! - [`relay`] — compiled for every target; validates in-page envelopes
//!   and forwards them, in-process when embedded natively for testing,
//!   over `window.postMessage` to the background when built for wasm.
//!
//! The file-scheme exemption is a single guard shared by both sides so it
//! can never drift between them.

pub mod relay;

#[cfg(target_arch = "wasm32")]
pub mod page;

/// Browsers report a `file://` page's origin as the literal string
/// `"null"`; both the shim and the relay treat that — and any explicit
/// `file://` origin — as the documented wildcard-target, relaxed-check
/// exemption (spec §4.9/§6).
pub fn is_file_scheme_origin(origin: &str) -> bool {
    origin == "null" || origin.starts_with("file://")
}
