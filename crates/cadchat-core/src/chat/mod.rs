pub mod request;
pub mod chunk;

pub use request::{ChatRequest, ChatOptions};
pub use chunk::{ChatChunk, FinishReason};
