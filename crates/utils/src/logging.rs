//! Process-wide tracing setup.
//!
//! Every binary in this workspace (the manager facade, the in-container
//! runtime, the training-environment service) calls [`init_tracing`] exactly
//! once at the top of `main`. The subscriber reads `RUST_LOG`, defaulting to
//! `info`, and writes formatted, leveled lines to stderr so they interleave
//! correctly with a supervisor's own log capture.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs the global tracing subscriber. Idempotent: a second call is a
/// harmless no-op (logged at debug, not panicked), since some binaries share
/// startup code with test harnesses that may have already installed one.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true));

    if registry.try_init().is_err() {
        tracing::debug!("tracing subscriber already installed, skipping re-init");
    }
}
