//! Telemetry helpers for structured logging.

/// Install a default env-filter fmt subscriber when no tracing subscriber
/// has been set. Embedding applications that install their own keep it.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
