use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotFound(_) => "SESSION_NOT_FOUND",
            SessionError::Database(_) => "SESSION_DB_ERROR",
            SessionError::Serialization(_) => "SESSION_SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
