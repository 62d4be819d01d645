use thiserror::Error;

pub use crate::provider::ProviderError;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Database(_) => "LEDGER_DATABASE_ERROR",
        }
    }
}

/// Error taxonomy for the Router / Budget Gate, per spec.md §7.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("over budget; try again after reset")]
    BudgetExceeded,

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("no provider configured for tier {tier}")]
    NoProviderForTier { tier: String },
}

impl RouterError {
    pub fn code(&self) -> &'static str {
        match self {
            RouterError::BudgetExceeded => "BUDGET_EXCEEDED",
            RouterError::Provider(_) => "PROVIDER_UNAVAILABLE",
            RouterError::Ledger(_) => "LEDGER_ERROR",
            RouterError::NoProviderForTier { .. } => "NO_PROVIDER_FOR_TIER",
        }
    }
}
