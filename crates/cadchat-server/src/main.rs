use std::path::PathBuf;

use anyhow::Context;
use cadchat_config::ConfigManager;
use cadchat_server::{init_logging, run_server, AppState};
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug, Clone)]
#[command(name = "cadchat-server")]
#[command(about = "Conversational OpenSCAD to Onshape assistant")]
#[command(version)]
struct Cli {
    /// Server port (overrides config)
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Bind address (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// LLM API base URL (overrides config)
    #[arg(long, env = "LLM_BASE_URL")]
    llm_base_url: Option<String>,

    /// LLM model name (overrides config)
    #[arg(long, env = "LLM_MODEL")]
    model: Option<String>,

    /// Log level (overrides config)
    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    log_json: bool,

    /// Config file path
    #[arg(long, env = "CADCHAT_CONFIG", default_value = "~/.cadchat/config.json")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config_path = cadchat_config::expand_tilde(&cli.config).unwrap_or_else(|| PathBuf::from(&cli.config));
    let mut manager = ConfigManager::load(&config_path)
        .await
        .with_context(|| format!("failed to load config from {:?}", config_path))?;
    manager.apply_env_overrides();

    let config = manager.config_mut();
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(url) = cli.llm_base_url {
        config.llm.base_url = url;
    }
    if let Some(model) = cli.model {
        config.llm.model = model;
    }
    if cli.log_json {
        config.logging.json = true;
    }
    ConfigManager::validate(config).context("invalid configuration")?;
    let config = manager.into_config();

    let level = cli
        .log_level
        .unwrap_or_else(|| config.logging.level.as_str().to_string());
    init_logging(&level, config.logging.json).context("failed to initialize logging")?;

    info!("Starting cadchat server on {}:{}", config.server.host, config.server.port);
    info!("  Config: {:?}", config_path);
    info!("  LLM: {} ({})", config.llm.model, config.llm.base_url);
    info!("  Pipeline: {:?}", config.pipeline.mode);
    info!("  Agent max rounds: {}", config.agent.max_rounds);

    let state = AppState::from_config(&config)
        .await
        .context("failed to assemble server")?;

    run_server(state, &config.server.host, config.server.port, config.server.cors)
        .await
        .context("server error")?;
    Ok(())
}
