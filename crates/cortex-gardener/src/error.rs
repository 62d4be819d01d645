use thiserror::Error;

#[derive(Debug, Error)]
pub enum GardenerError {
    #[error("memory error: {0}")]
    Memory(#[from] cortex_memory::MemoryError),

    #[error("session error: {0}")]
    Session(#[from] cortex_sessions::SessionError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] cortex_scheduler::SchedulerError),

    #[error("core error: {0}")]
    Core(#[from] cortex_core::CoreError),
}

impl GardenerError {
    pub fn code(&self) -> &'static str {
        match self {
            GardenerError::Memory(_) => "GARDENER_MEMORY_ERROR",
            GardenerError::Session(_) => "GARDENER_SESSION_ERROR",
            GardenerError::Scheduler(_) => "GARDENER_SCHEDULER_ERROR",
            GardenerError::Core(_) => "GARDENER_CORE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, GardenerError>;
