use crate::config::{Config, ConfigError, ConfigResult, PipelineMode};
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Loads, overrides and validates the configuration file
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// Load configuration from `path`, writing a default file if it is missing
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        let config = if path.exists() {
            info!("Loading config from {:?}", path);
            let content = tokio::fs::read_to_string(path).await?;
            let content = Self::expand_env_vars(&content)?;
            serde_json::from_str(&content)?
        } else {
            info!("Config file not found, creating default config at {:?}", path);
            let default_config = Config::default();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let content = serde_json::to_string_pretty(&default_config)?;
            tokio::fs::write(path, &content).await?;
            default_config
        };

        Ok(Self {
            path: path.to_path_buf(),
            config,
        })
    }

    /// Load from ~/.cadchat/config.json
    pub async fn load_default() -> ConfigResult<Self> {
        let config_path = Self::default_config_path()?;
        Self::load(&config_path).await
    }

    pub fn default_config_path() -> ConfigResult<PathBuf> {
        crate::default_config_path()
            .ok_or_else(|| ConfigError::InvalidPath("Could not find home directory".to_string()))
    }

    pub fn new(config: Config, path: PathBuf) -> Self {
        Self { path, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply the recognized environment options from the process environment
    pub fn apply_env_overrides(&mut self) {
        Self::apply_overrides_from(&mut self.config, |key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` to read variables
    pub fn apply_overrides_from<F>(config: &mut Config, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("LLM_API_KEY") {
            debug!("LLM_API_KEY set from environment");
            config.llm.api_key = Some(key);
        }
        if let Some(url) = get("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Some(model) = get("LLM_MODEL") {
            config.llm.model = model;
        }
        if let Some(key) = get("ONSHAPE_ACCESS_KEY") {
            config.onshape.access_key = Some(key);
        }
        if let Some(key) = get("ONSHAPE_SECRET_KEY") {
            config.onshape.secret_key = Some(key);
        }
        if let Some(url) = get("ONSHAPE_API_URL") {
            config.onshape.api_url = url;
        }
        if let Some(path) = get("OPENSCAD_PATH") {
            config.compiler.executable = path;
        }
    }

    pub fn validate(config: &Config) -> ConfigResult<()> {
        if config.server.port == 0 {
            return Err(ConfigError::Validation(
                "Server port cannot be 0".to_string(),
            ));
        }

        if config.agent.max_rounds == 0 {
            return Err(ConfigError::Validation(
                "Agent max_rounds must be greater than 0".to_string(),
            ));
        }

        for (name, value) in [
            ("llm.timeout_seconds", config.llm.timeout_seconds),
            ("llm.idle_timeout_seconds", config.llm.idle_timeout_seconds),
            ("tool.call_timeout_seconds", config.tool.call_timeout_seconds),
            ("pipeline.timeout_seconds", config.pipeline.timeout_seconds),
            ("compiler.timeout_seconds", config.compiler.timeout_seconds),
            ("onshape.timeout_seconds", config.onshape.timeout_seconds),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{} must be greater than 0", name)));
            }
        }

        let budget = config.conversion_budget_seconds();
        if config.tool.call_timeout_seconds <= budget {
            return Err(ConfigError::Validation(format!(
                "tool.call_timeout_seconds ({}) must exceed the {:?} pipeline's own timeouts ({}s)",
                config.tool.call_timeout_seconds, config.pipeline.mode, budget
            )));
        }

        if config.tool.max_source_length == 0 {
            return Err(ConfigError::Validation(
                "tool.max_source_length must be greater than 0".to_string(),
            ));
        }

        if config.pipeline.mode == PipelineMode::Remote
            && config.pipeline.url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "pipeline.url is required when pipeline.mode is remote".to_string(),
            ));
        }

        if config.storage.path.trim().is_empty() {
            return Err(ConfigError::Validation("storage.path cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Expand `${VAR}` or `${VAR:-default}`
    fn expand_env_vars(content: &str) -> ConfigResult<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let full_match = &cap[0];
            let var_expr = &cap[1];

            let (var_name, default_value) = match var_expr.split_once(":-") {
                Some((name, default)) => (name, Some(default)),
                None => (var_expr, None),
            };

            let replacement = match (std::env::var(var_name), default_value) {
                (Ok(val), _) => val,
                (Err(_), Some(default)) => default.to_string(),
                (Err(_), None) => return Err(ConfigError::EnvVarNotFound(var_name.to_string())),
            };

            result = result.replace(full_match, &replacement);
        }

        Ok(result)
    }
}
