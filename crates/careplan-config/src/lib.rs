pub mod loader;
pub mod observability;
pub mod settings;

pub use loader::{CONFIG_FILE, ENV_PREFIX, load_config};
pub use observability::{apply_logging_level, init_tracing, init_tracing_from};
pub use settings::{AppConfig, ConfigError, EngineConfig, LoggingConfig, SuggestionsConfig};
