//! Tracing setup for test binaries.

use tracing_subscriber::EnvFilter;

/// Log a runtime command or its raw output: at info when the harness is
/// verbose, at debug otherwise.
macro_rules! log_command {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

/// Install a fmt subscriber that writes through the test harness's capture.
///
/// Honors `RUST_LOG`, defaulting to `fdbtest=info`. Safe to call from every
/// test; only the first call installs anything.
pub fn init_test_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fdbtest=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .with_target(false)
        .try_init();
}
