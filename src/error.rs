//! Top-level error type for the `cortexd` binary. Lives here rather than in
//! `cortex-core` (which sits below every other crate in the dependency
//! graph and can't depend back up on them) — the aggregation the design
//! notes describe happens at the one point that already depends on
//! everything: the bin crate itself.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CortexError {
    #[error("core error: {0}")]
    Core(#[from] cortex_core::CoreError),

    #[error(transparent)]
    Agent(#[from] cortex_agent::AgentError),

    #[error(transparent)]
    Memory(#[from] cortex_memory::MemoryError),

    #[error(transparent)]
    Session(#[from] cortex_sessions::SessionError),

    #[error(transparent)]
    Scheduler(#[from] cortex_scheduler::SchedulerError),

    #[error(transparent)]
    Provider(#[from] cortex_providers::ProviderError),

    #[error(transparent)]
    Router(#[from] cortex_providers::RouterError),

    #[error(transparent)]
    Gardener(#[from] cortex_gardener::GardenerError),

    #[error(transparent)]
    Proactive(#[from] cortex_proactive::ProactiveError),

    #[error("session not found: {0}")]
    SessionNotFound(String),
}

impl CortexError {
    pub fn code(&self) -> &'static str {
        match self {
            CortexError::Core(e) => e.code(),
            CortexError::Agent(e) => e.code(),
            CortexError::Memory(e) => e.code(),
            CortexError::Session(e) => e.code(),
            CortexError::Scheduler(e) => e.code(),
            CortexError::Provider(_) => "PROVIDER_ERROR",
            CortexError::Router(e) => e.code(),
            CortexError::Gardener(e) => e.code(),
            CortexError::Proactive(e) => e.code(),
            CortexError::SessionNotFound(_) => "SESSION_NOT_FOUND",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            CortexError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            CortexError::Router(cortex_providers::RouterError::BudgetExceeded) => StatusCode::TOO_MANY_REQUESTS,
            CortexError::Agent(cortex_agent::AgentError::IterationLimitExceeded(_)) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CortexError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.to_string(), "code": self.code() }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, CortexError>;
