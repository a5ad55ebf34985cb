//! Logging bootstrap
//!
//! The crate emits `tracing` events and never installs a subscriber on its
//! own. Applications without one can call [`init_logging`].
//!
//! ```bash
//! # Default level passed to init_logging
//! cargo run
//!
//! # Trace only the I/O layer
//! RUST_LOG=simple_networking::io=trace cargo run
//! ```

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install a formatted subscriber writing to stdout
///
/// `RUST_LOG` takes precedence over `default_level` when set.
///
/// # Returns
/// `false` if a global subscriber was already installed
///
/// # Examples
/// ```no_run
/// use simple_networking::logging::init_logging;
/// use tracing::Level;
///
/// init_logging(Level::INFO);
/// ```
pub fn init_logging(default_level: Level) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_str().to_ascii_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}
