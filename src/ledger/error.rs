//! Ledger Errors

use crate::domain::DomainError;
use crate::store::StoreError;

/// Errors returned by the coordinator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    /// Business rule violation, surfaced unchanged
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Store or transport failure, lock timeout, or panicked unit
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Internal failures may succeed when retried; domain errors never will.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Internal(_))
    }

    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            LedgerError::Domain(err) => Some(err),
            LedgerError::Internal(_) => None,
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Domain(domain) => LedgerError::Domain(domain),
            other => {
                tracing::error!(error = ?other, "store failure");
                LedgerError::Internal(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_domain_error_passes_through() {
        let err = LedgerError::from(StoreError::from(DomainError::AccountNotFound(4)));
        assert_eq!(err, LedgerError::Domain(DomainError::AccountNotFound(4)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_store_failure_is_internal() {
        let err = LedgerError::from(StoreError::Database(sqlx::Error::PoolTimedOut));
        assert!(matches!(err, LedgerError::Internal(_)));
        assert!(err.is_retryable());
        assert!(err.as_domain().is_none());
    }
}
