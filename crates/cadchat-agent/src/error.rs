use cadchat_core::ProtocolError;
use cadchat_llm::LLMError;
use cadchat_session::SessionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("session storage failed: {0}")]
    Storage(#[from] SessionError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("model error: {0}")]
    Llm(#[from] LLMError),

    #[error("model did not answer within {0}s")]
    ModelTimeout(u64),

    #[error("model stream was idle for {0}s")]
    IdleTimeout(u64),

    #[error("turn stopped after {0} model rounds")]
    MaxRounds(usize),
}

impl AgentError {
    /// Code carried by the client-facing error frame
    pub fn code(&self) -> &'static str {
        match self {
            Self::Storage(_) => "storage_error",
            Self::Protocol(_) => "protocol_error",
            Self::Llm(e) => e.code(),
            Self::ModelTimeout(_) => "model_timeout",
            Self::IdleTimeout(_) => "model_idle_timeout",
            Self::MaxRounds(_) => "max_rounds_exceeded",
        }
    }

    /// Only storage failures abort a request
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
