//! Shared application state

use std::sync::Arc;
use std::time::Duration;

use cadchat_agent::{AgentConfig, Orchestrator};
use cadchat_config::{Config, DedupMode, PipelineMode};
use cadchat_llm::{LLMProvider, OpenAiProvider, ProviderConfig};
use cadchat_pipeline::{
    ConversionPipeline, HttpPipeline, LocalPipeline, OnshapeClient, OnshapeSettings, OpenScadCompiler,
};
use cadchat_session::{JsonFileStore, SessionRegistry};
use cadchat_tool::{CreateModelTool, DedupPolicy, ToolGateway, ToolRegistry};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::StartupError;

/// State shared by every handler.
///
/// Cloning is cheap; all members are reference counted.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<SessionRegistry>,
    /// Set only when conversions run in this process
    pub conversion: Option<Arc<dyn ConversionPipeline>>,
    pub max_source_length: usize,
    /// Cancellation handle of the turn currently running per session
    pub active_turns: Arc<DashMap<String, CancellationToken>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            orchestrator,
            registry,
            conversion: None,
            max_source_length: cadchat_tool::create_model::DEFAULT_MAX_SOURCE_LENGTH,
            active_turns: Arc::new(DashMap::new()),
        }
    }

    /// Serve `POST /api/v1/models` with this pipeline
    pub fn with_conversion(mut self, pipeline: Arc<dyn ConversionPipeline>, max_source_length: usize) -> Self {
        self.conversion = Some(pipeline);
        self.max_source_length = max_source_length;
        self
    }

    /// Wire the provider, pipeline, tool gateway, session store and
    /// orchestrator described by `config`.
    pub async fn from_config(config: &Config) -> Result<Self, StartupError> {
        let provider = build_provider(config)?;

        let (pipeline, local) = build_pipeline(config)?;
        let dedup = match config.tool.dedup {
            DedupMode::AlwaysCreate => DedupPolicy::AlwaysCreate,
            DedupMode::ContentHash => DedupPolicy::ContentHash,
        };
        let create_model = CreateModelTool::new(pipeline.clone())
            .with_max_source_length(config.tool.max_source_length)
            .with_dedup(dedup);
        let gateway = ToolGateway::new(ToolRegistry::with_tools(vec![Arc::new(create_model)]))
            .with_timeout(Duration::from_secs(config.tool.call_timeout_seconds));
        info!(tools = ?gateway.registry().names(), dedup = ?dedup, "tool gateway ready");

        let storage_path = cadchat_config::expand_tilde(&config.storage.path)
            .ok_or_else(|| StartupError::Invalid(format!("cannot resolve storage path {}", config.storage.path)))?;
        let store = JsonFileStore::new(&storage_path).await?;
        info!("session storage at {:?}", storage_path);
        let registry = Arc::new(SessionRegistry::new(Arc::new(store)));

        let mut agent_config = AgentConfig::new(&config.llm.model)
            .with_max_rounds(config.agent.max_rounds as usize)
            .with_model_timeout(Duration::from_secs(config.llm.timeout_seconds))
            .with_idle_timeout(Duration::from_secs(config.llm.idle_timeout_seconds));
        if let Some(prompt) = config.agent.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            agent_config = agent_config.with_system_prompt(prompt);
        }

        let orchestrator = Arc::new(Orchestrator::new(provider, Arc::new(gateway), agent_config));
        let state = Self::new(orchestrator, registry);

        Ok(if local {
            state.with_conversion(pipeline, config.tool.max_source_length)
        } else {
            state
        })
    }
}

fn build_provider(config: &Config) -> Result<Arc<dyn LLMProvider>, StartupError> {
    let mut provider_config = ProviderConfig::new("openai", &config.llm.base_url)
        .with_timeout(Duration::from_secs(config.llm.timeout_seconds));
    match config.llm.api_key.as_deref() {
        Some(key) if !key.is_empty() => provider_config = provider_config.with_api_key(key),
        _ => tracing::warn!("LLM_API_KEY is not set; requests to {} are unauthenticated", config.llm.base_url),
    }
    Ok(Arc::new(OpenAiProvider::with_config(provider_config)?))
}

/// Returns the pipeline and whether it runs in-process
fn build_pipeline(config: &Config) -> Result<(Arc<dyn ConversionPipeline>, bool), StartupError> {
    match config.pipeline.mode {
        PipelineMode::Remote => {
            let url = config
                .pipeline
                .url
                .clone()
                .ok_or_else(|| StartupError::Invalid("pipeline.url is required in remote mode".to_string()))?;
            info!(%url, "using remote conversion service");
            let pipeline = HttpPipeline::new(url, Duration::from_secs(config.pipeline.timeout_seconds))?;
            Ok((Arc::new(pipeline), false))
        }
        PipelineMode::Local => {
            let (access_key, secret_key) = match (&config.onshape.access_key, &config.onshape.secret_key) {
                (Some(access), Some(secret)) if config.onshape.has_credentials() => (access, secret),
                _ => {
                    return Err(StartupError::Invalid(
                        "ONSHAPE_ACCESS_KEY and ONSHAPE_SECRET_KEY are required in local pipeline mode".to_string(),
                    ))
                }
            };
            let settings = OnshapeSettings::new(access_key, secret_key)
                .with_api_url(&config.onshape.api_url)
                .with_app_url(&config.onshape.app_url)
                .with_timeout(Duration::from_secs(config.onshape.timeout_seconds));
            let compiler = OpenScadCompiler::new(
                &config.compiler.executable,
                Duration::from_secs(config.compiler.timeout_seconds),
            );
            info!(
                compiler = %config.compiler.executable,
                onshape = %config.onshape.api_url,
                "using local conversion pipeline"
            );
            let pipeline = LocalPipeline::new(Arc::new(compiler), Arc::new(OnshapeClient::new(settings)?));
            Ok((Arc::new(pipeline), true))
        }
    }
}
