//! Process-wide tracing subscriber init, matching the teacher workspace's
//! `bootstrap_helpers::init_tracing` idiom: an `EnvFilter` with a sane
//! default directive, compact formatting, no target noise.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber from `PDM_LOG` (falls back to `info`).
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("PDM_LOG")
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .try_init();
}
