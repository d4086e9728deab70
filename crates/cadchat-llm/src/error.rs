use thiserror::Error;

/// Unified error type for model calls
#[derive(Error, Debug)]
pub enum LLMError {
    #[error("network error: {0}")]
    Network(String),

    #[error("api error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("transform error: {0}")]
    Transform(#[from] ConversionError),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("request timed out after {0}s")]
    Timeout(u64),
}

impl LLMError {
    /// Short machine-readable code used in client error frames
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network(_) => "model_network_error",
            Self::Api { .. } => "model_api_error",
            Self::Auth(_) => "model_auth_error",
            Self::Transform(_) => "model_protocol_error",
            Self::Stream(_) => "model_stream_error",
            Self::Config(_) => "model_config_error",
            Self::RateLimited { .. } => "model_rate_limited",
            Self::Timeout(_) => "model_timeout",
        }
    }
}

/// Error during schema transformation
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

pub type Result<T> = std::result::Result<T, LLMError>;
