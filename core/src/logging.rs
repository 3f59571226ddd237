//! Subscriber setup for the binary and for tests

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT_TEST_LOGGING: Once = Once::new();

/// Install the process-wide fmt subscriber.
///
/// `RUST_LOG` wins over `default_level` when it is set. Calling this twice
/// is harmless; the second call keeps the first subscriber.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Route `tracing` output through the test harness's capture.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_logging() {
    INIT_TEST_LOGGING.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dgi_core=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_line_number(true)
            .with_ansi(false)
            .try_init();
    });
}
