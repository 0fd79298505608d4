// Configuration management module
// TOML settings for the embedding service, retrieval tuning and schema locations

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{Config, ConfigError, OllamaConfig, SCHEMA_PATH_ENV, SchemaConfig};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_dir()
}
