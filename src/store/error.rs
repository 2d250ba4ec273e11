//! Store Errors

use crate::domain::DomainError;

/// Errors raised by ledger stores
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Business rule rejected the mutation
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Database error (includes lock timeouts and deadlocks)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Storage constraint violated (e.g. numeric overflow)
    #[error("Constraint violated: {0}")]
    Constraint(String),
}

impl StoreError {
    /// Domain error carried by this failure, if any
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            StoreError::Domain(err) => Some(err),
            _ => None,
        }
    }
}
