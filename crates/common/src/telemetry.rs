//! Global `tracing` subscriber setup
//!
//! Library code only emits events; binaries call [`init_tracing`] once at
//! startup. `RUST_LOG` wins over the configured level when set.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingSettings};

const FALLBACK_LEVEL: &str = "info";

/// Build the event filter for `settings`
pub fn env_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_LEVEL))
}

/// Install the global subscriber
///
/// Returns `false` when a subscriber was already installed, which leaves the
/// existing one in place.
pub fn init_tracing(settings: &LoggingSettings) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(settings))
        .with_target(true)
        .with_writer(std::io::stderr);

    let installed = match settings.format {
        LogFormat::Plain => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    };

    if installed {
        tracing::debug!(level = %settings.level, format = ?settings.format, "tracing initialised");
    }
    installed
}
