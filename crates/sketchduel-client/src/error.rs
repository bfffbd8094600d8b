/// Errors surfaced to the owner of an [`AgentHandle`](crate::AgentHandle).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// The URL is not a `ws://` or `wss://` URL.
    InvalidUrl(String),
    /// The agent task has stopped and no longer accepts commands.
    Closed,
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUrl(url) => write!(f, "not a WebSocket URL: {url}"),
            Self::Closed => write!(f, "agent has stopped"),
        }
    }
}

impl std::error::Error for AgentError {}
