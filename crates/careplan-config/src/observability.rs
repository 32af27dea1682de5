//! Global subscriber setup. The filter sits behind a reload layer so the
//! level can follow configuration changes without a restart.

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::settings::LoggingConfig;

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

/// Directive used when a configured level does not parse.
const FALLBACK_DIRECTIVE: &str = "info";

pub fn init_tracing_from(logging: &LoggingConfig) {
    init_tracing(&logging.level);
}

/// Install the global subscriber once. `RUST_LOG`, when set and valid,
/// takes precedence over `level`.
pub fn init_tracing(level: &str) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) => from_env,
        Err(_) => engine_filter(level),
    };

    let (filter_layer, handle) = reload::Layer::new(filter);
    if FILTER_HANDLE.set(handle).is_err() {
        return;
    }

    let installed = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok();
    if !installed {
        tracing::debug!("A global subscriber was already installed");
    }
}

/// Swap the active filter. False when tracing was not initialized here
/// or the new level does not parse.
pub fn apply_logging_level(level: &str) -> bool {
    let Some(handle) = FILTER_HANDLE.get() else {
        return false;
    };
    let Ok(filter) = EnvFilter::try_new(level) else {
        tracing::warn!(level, "Ignoring unparsable log level");
        return false;
    };
    let swapped = handle.reload(filter).is_ok();
    if swapped {
        tracing::info!(level, "Log level changed");
    }
    swapped
}

fn engine_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(FALLBACK_DIRECTIVE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_filter_falls_back_on_garbage() {
        assert_eq!(engine_filter("careplan=verbose").to_string(), FALLBACK_DIRECTIVE);
    }
}
