use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProactiveError {
    #[error("session error: {0}")]
    Session(#[from] cortex_sessions::SessionError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] cortex_scheduler::SchedulerError),

    #[error("core error: {0}")]
    Core(#[from] cortex_core::CoreError),
}

impl ProactiveError {
    pub fn code(&self) -> &'static str {
        match self {
            ProactiveError::Session(_) => "PROACTIVE_SESSION_ERROR",
            ProactiveError::Scheduler(_) => "PROACTIVE_SCHEDULER_ERROR",
            ProactiveError::Core(_) => "PROACTIVE_CORE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProactiveError>;
