//! Log output for tests and benches, filtered by `RUST_LOG`

use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber once; later calls are no-ops
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_test_writer()
        .try_init();
}
