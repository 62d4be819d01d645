use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("provider error: {0}")]
    Provider(#[from] cortex_providers::ProviderError),

    #[error("router error: {0}")]
    Router(#[from] cortex_providers::RouterError),

    #[error("session error: {0}")]
    Session(#[from] cortex_sessions::SessionError),

    #[error("memory error: {0}")]
    Memory(#[from] cortex_memory::MemoryError),

    #[error("iteration limit ({0}) exceeded")]
    IterationLimitExceeded(usize),

    #[error("session not found: {0}")]
    SessionNotFound(String),
}

impl AgentError {
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Provider(_) => "AGENT_PROVIDER_ERROR",
            AgentError::Router(_) => "AGENT_ROUTER_ERROR",
            AgentError::Session(_) => "AGENT_SESSION_ERROR",
            AgentError::Memory(_) => "AGENT_MEMORY_ERROR",
            AgentError::IterationLimitExceeded(_) => "AGENT_ITERATION_LIMIT",
            AgentError::SessionNotFound(_) => "AGENT_SESSION_NOT_FOUND",
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
