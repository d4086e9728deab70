pub mod events;
pub mod state;

pub use events::{AgentEvent, TokenUsage};
pub use state::{TurnMachine, TurnState};
