//! Telemetry helpers for structured logging and tracing.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset: admission decisions at `info`,
/// everything else at `warn`.
pub const DEFAULT_LOG_FILTER: &str = "warn,prometheus_resource_groups=info";

/// Install a fmt subscriber driven by `RUST_LOG` (falling back to
/// [`DEFAULT_LOG_FILTER`]). Does nothing if the host already installed one.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
