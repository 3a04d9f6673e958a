//! Tracing subscriber bootstrap

use std::str::FromStr;

use tracing::warn;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::{GatewayError, Result};

/// Parse a log level name, falling back to `info`.
///
/// Returns the level and whether `level` was recognised.
pub fn resolve_level(level: &str) -> (LevelFilter, bool) {
    match LevelFilter::from_str(level.trim()) {
        Ok(filter) => (filter, true),
        Err(_) => (LevelFilter::INFO, false),
    }
}

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` applies. Calling
/// this twice returns [`GatewayError::Telemetry`] instead of panicking.
pub fn init_tracing(default_level: &str) -> Result<()> {
    let (level, recognised) = resolve_level(default_level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| GatewayError::Telemetry(e.to_string()))?;

    if !recognised {
        warn!(requested = %default_level, "Invalid log level, using info");
    }
    Ok(())
}
