use thiserror::Error;

/// Errors that can occur within the scheduled-item queue.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("scheduled item not found: {id}")]
    ItemNotFound { id: String },
}

impl SchedulerError {
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Database(_) => "database_error",
            SchedulerError::Serialization(_) => "serialization_error",
            SchedulerError::InvalidPayload(_) => "invalid_payload",
            SchedulerError::ItemNotFound { .. } => "item_not_found",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
