// Configuration management module
// TOML settings in the config directory, overlaid by environment variables

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    ChatConfig, Config, ConfigError, Credentials, IngestConfig, OpenAiConfig, StoreBackend,
    StoreConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_dir()
}
