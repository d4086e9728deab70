//! Conversational orchestrator.
//!
//! Runs one turn of a session: streams the model's answer, dispatches the
//! tool calls it emits, folds the results back into the history and resumes
//! generation until the model stops asking for tools.

pub mod accumulator;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod projection;
pub mod prompt;

pub use accumulator::ResponseAccumulator;
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use orchestrator::{Orchestrator, TurnOutcome};
pub use prompt::DEFAULT_SYSTEM_PROMPT;
