#![forbid(unsafe_code)]

use phaseout_engines::canon::CanonError;
use phaseout_kernel_contracts::ContractViolation;
use phaseout_storage::param_store::StorageError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    NotFound(String),
    #[error("transaction conflict")]
    TransactionConflict,
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl ServiceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::TransactionConflict)
    }
}

impl From<CanonError> for ServiceError {
    fn from(err: CanonError) -> Self {
        ServiceError::InvalidInput(err.to_string())
    }
}

impl From<ContractViolation> for ServiceError {
    fn from(v: ContractViolation) -> Self {
        ServiceError::InvalidInput(v.to_string())
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Busy { .. } | StorageError::DuplicateKey { .. } => {
                ServiceError::TransactionConflict
            }
            StorageError::ContractViolation(v) => ServiceError::InvalidInput(v.to_string()),
            StorageError::NotFound { .. } => ServiceError::NotFound(err.to_string()),
            StorageError::ForeignKeyViolation { .. }
            | StorageError::Timeout { .. }
            | StorageError::Unavailable { .. }
            | StorageError::JournalCorrupt { .. } => {
                ServiceError::StoreUnavailable(err.to_string())
            }
        }
    }
}
