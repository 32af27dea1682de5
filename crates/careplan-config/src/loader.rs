use config::{Config, Environment, File};
use std::path::PathBuf;
use tracing::debug;

use crate::settings::{AppConfig, ConfigError};

/// File read when no path is given.
pub const CONFIG_FILE: &str = "careplan.toml";

/// Environment overrides use this prefix with `__` separators,
/// e.g. `CAREPLAN__ENGINE__MAX_CONDITION_DEPTH=8`.
pub const ENV_PREFIX: &str = "CAREPLAN";

pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();
    let file = PathBuf::from(path.unwrap_or(CONFIG_FILE));
    if file.exists() {
        debug!(path = %file.display(), "Loading configuration file");
        builder = builder.add_source(File::from(file));
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .separator("__"),
    );

    let cfg = builder
        .build()
        .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?;
    let merged: AppConfig = cfg
        .try_deserialize()
        .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))?;
    merged.validate()?;
    Ok(merged)
}

impl AppConfig {
    /// Same as [`load_config`].
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        load_config(path)
    }
}
