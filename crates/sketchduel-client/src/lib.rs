pub mod agent;
pub mod bot;
pub mod error;

pub use agent::{AgentCommand, AgentConfig, AgentEvent, AgentHandle, ClientAgent};
pub use error::AgentError;
