use thiserror::Error;
use uuid::Uuid;

use crate::domain::booking::BookingStatus;

#[derive(Error, Debug)]
pub enum MarketplaceError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Illegal transition: cannot {operation} a booking in status {from}")]
    IllegalTransition {
        from: BookingStatus,
        operation: &'static str,
    },
    #[error("Invalid payment signature")]
    InvalidSignature,
    #[error("Payment gateway error: {0}")]
    GatewayError(String),
    #[error("Payment gateway did not answer in time")]
    GatewayTimeout,
    #[error("Fee configuration is not available")]
    PricingUnavailable,
    #[error("No schedule found for booking {0}")]
    ScheduleNotFound(Uuid),
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDBError(#[from] rocksdb::Error),
}

impl MarketplaceError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Whether the caller may retry the whole operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GatewayError(_) | Self::GatewayTimeout | Self::StorageError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MarketplaceError>;
