//! Structured logging setup
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the host process, which can call `init_tracing` once at startup.

pub mod config;

pub use config::{LogFormat, LoggingConfig};

use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber.
///
/// Returns `false` if one was already installed (for example by an earlier
/// test); the existing subscriber is left in place.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);

    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    result.is_ok()
}
