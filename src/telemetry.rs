//! Logging setup
//!
//! Structured logging via `tracing`. `RUST_LOG` controls the filter
//! (default `info`); `LOG_FORMAT=json` switches the human-readable output
//! to machine-parseable JSON for log aggregation.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber
///
/// Call once at startup, before constructing the manager. A second call
/// panics inside `tracing`, so hosts embedding their own subscriber should
/// skip this and configure `tracing` themselves.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}
