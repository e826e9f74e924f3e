// src/logging.rs
//
// Structured logging setup. Deliberately the simpler of the teacher's two
// logging modules (plain `fmt` + `EnvFilter`, not the OpenTelemetry/Jaeger
// setup) — this crate has no real deployment target to export traces to.

use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber. `level` is used as the
/// default filter directive when `RUST_LOG` isn't set, e.g. `"info"` or
/// `"dhtsim=debug"`.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}
