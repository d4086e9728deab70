use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub agent: AgentSettings,
    pub tool: ToolConfig,
    pub pipeline: PipelineConfig,
    pub compiler: CompilerConfig,
    pub onshape: OnshapeConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
            agent: AgentSettings::default(),
            tool: ToolConfig::default(),
            pipeline: PipelineConfig::default(),
            compiler: CompilerConfig::default(),
            onshape: OnshapeConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Onshape requests one local conversion makes: create, upload, import
pub const ONSHAPE_REQUESTS_PER_CONVERSION: u64 = 3;

impl Config {
    /// Longest a single conversion can take under the configured timeouts
    pub fn conversion_budget_seconds(&self) -> u64 {
        match self.pipeline.mode {
            PipelineMode::Local => {
                self.compiler.timeout_seconds
                    + ONSHAPE_REQUESTS_PER_CONVERSION * self.onshape.timeout_seconds
            }
            PipelineMode::Remote => self.pipeline.timeout_seconds,
        }
    }
}

/// HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            host: "127.0.0.1".to_string(),
            cors: true,
        }
    }
}

/// OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Bound on establishing the response stream
    pub timeout_seconds: u64,
    /// Longest silence tolerated between two stream chunks
    pub idle_timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key: None,
            timeout_seconds: 120,
            idle_timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentSettings {
    pub max_rounds: u32,
    /// Replaces the built-in system instruction when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            system_prompt: None,
        }
    }
}

/// How repeated model-creation requests are handled
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DedupMode {
    /// Every accepted call creates a new remote document
    #[default]
    AlwaysCreate,
    /// Identical source and name reuse the earlier document
    ContentHash,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolConfig {
    pub max_source_length: usize,
    pub dedup: DedupMode,
    pub call_timeout_seconds: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            max_source_length: 100_000,
            dedup: DedupMode::AlwaysCreate,
            call_timeout_seconds: 180,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Compile and import in-process
    #[default]
    Local,
    /// Delegate to a conversion service at `pipeline.url`
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: PipelineMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::Local,
            url: None,
            timeout_seconds: 150,
        }
    }
}

/// OpenSCAD executable
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompilerConfig {
    pub executable: String,
    pub timeout_seconds: u64,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            executable: "openscad".to_string(),
            timeout_seconds: 30,
        }
    }
}

/// Onshape REST credentials and endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OnshapeConfig {
    pub api_url: String,
    pub app_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for OnshapeConfig {
    fn default() -> Self {
        Self {
            api_url: "https://cad.onshape.com/api/v12".to_string(),
            app_url: "https://cad.onshape.com".to_string(),
            access_key: None,
            secret_key: None,
            timeout_seconds: 45,
        }
    }
}

impl OnshapeConfig {
    pub fn has_credentials(&self) -> bool {
        matches!((&self.access_key, &self.secret_key), (Some(a), Some(s)) if !a.is_empty() && !s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one JSON file per session
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "~/.cadchat/sessions".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::Validation(format!("Invalid log level: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
