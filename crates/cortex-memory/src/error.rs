use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("memory not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("provider error: {0}")]
    Provider(#[from] cortex_providers::ProviderError),
}

impl MemoryError {
    pub fn code(&self) -> &'static str {
        match self {
            MemoryError::Database(_) => "MEMORY_DB_ERROR",
            MemoryError::NotFound(_) => "MEMORY_NOT_FOUND",
            MemoryError::Serialization(_) => "MEMORY_SERIALIZATION_ERROR",
            MemoryError::Embedding(_) => "MEMORY_EMBEDDING_ERROR",
            MemoryError::Provider(_) => "MEMORY_PROVIDER_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
