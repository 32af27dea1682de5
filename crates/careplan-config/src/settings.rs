use careplan_core::DurationSpec;
use careplan_reactive::EvaluatorConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub suggestions: SuggestionsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Parse a TOML document, filling unset fields with defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = toml::from_str(content).map_err(|e| ConfigError::Load(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_condition_depth == 0 {
            return Err(ConfigError::Validation(
                "engine.max_condition_depth must be > 0".into(),
            ));
        }
        if self.engine.delay_poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "engine.delay_poll_interval_ms must be > 0".into(),
            ));
        }
        if self.engine.default_dedup_window_minutes == Some(0) {
            return Err(ConfigError::Validation(
                "engine.default_dedup_window_minutes must be > 0 when set".into(),
            ));
        }
        if self.suggestions.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "suggestions.timeout_ms must be > 0".into(),
            ));
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Deepest allowed `Condition` nesting
    #[serde(default = "default_max_condition_depth")]
    pub max_condition_depth: usize,
    /// How often the delay driver looks for due continuations
    #[serde(default = "default_delay_poll_interval_ms")]
    pub delay_poll_interval_ms: u64,
    /// Deduplication window for `CreateTask` actions that set none
    #[serde(default)]
    pub default_dedup_window_minutes: Option<u32>,
}

fn default_max_condition_depth() -> usize {
    careplan_reactive::DEFAULT_MAX_CONDITION_DEPTH
}

fn default_delay_poll_interval_ms() -> u64 {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_condition_depth: default_max_condition_depth(),
            delay_poll_interval_ms: default_delay_poll_interval_ms(),
            default_dedup_window_minutes: None,
        }
    }
}

impl EngineConfig {
    pub fn evaluator_config(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            max_condition_depth: self.max_condition_depth,
            default_dedup_window: self.default_dedup_window_minutes.map(DurationSpec::minutes),
        }
    }

    pub fn delay_poll_interval(&self) -> Duration {
        Duration::from_millis(self.delay_poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionsConfig {
    /// Simulated latency of the mock backend
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_latency_ms() -> u64 {
    800
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for SuggestionsConfig {
    fn default() -> Self {
        Self {
            latency_ms: default_latency_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl SuggestionsConfig {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.max_condition_depth, 16);
        assert_eq!(cfg.engine.delay_poll_interval(), Duration::from_secs(1));
        assert_eq!(cfg.suggestions.latency(), Duration::from_millis(800));
        assert_eq!(cfg.suggestions.timeout(), Duration::from_secs(10));
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = AppConfig::from_toml_str(
            r#"
[engine]
max_condition_depth = 4
default_dedup_window_minutes = 60
"#,
        )
        .unwrap();
        assert_eq!(cfg.engine.max_condition_depth, 4);
        assert_eq!(cfg.engine.delay_poll_interval_ms, 1000);

        let evaluator = cfg.engine.evaluator_config();
        assert_eq!(evaluator.max_condition_depth, 4);
        assert_eq!(evaluator.default_dedup_window, Some(DurationSpec::minutes(60)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let err = AppConfig::from_toml_str("[engine]\nmax_condition_depth = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let err = AppConfig::from_toml_str("[logging]\nlevel = \"loud\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let err = AppConfig::from_toml_str("[engine\n").unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
