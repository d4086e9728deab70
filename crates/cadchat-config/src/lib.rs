pub mod config;
pub mod manager;

pub use config::{
    AgentSettings, CompilerConfig, Config, ConfigError, ConfigResult, DedupMode, LlmConfig, LogLevel,
    LoggingConfig, OnshapeConfig, PipelineConfig, PipelineMode, ServerConfig, StorageConfig, ToolConfig,
};
pub use manager::ConfigManager;

use std::path::PathBuf;

/// cadchat data directory (~/.cadchat)
pub fn cadchat_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".cadchat"))
}

pub fn default_config_path() -> Option<PathBuf> {
    cadchat_dir().map(|dir| dir.join("config.json"))
}

pub fn default_sessions_dir() -> Option<PathBuf> {
    cadchat_dir().map(|dir| dir.join("sessions"))
}

/// Expand a leading `~/` to the home directory
pub fn expand_tilde(path: &str) -> Option<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
        None => Some(PathBuf::from(path)),
    }
}
