//! # Engine Error Types
//!
//! What callers of the engine see.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────────┐  ┌─────────────────┐  ┌─────────────────────┐ │
//! │  │  Business (4xx)     │  │ Persistence     │  │  Operational        │ │
//! │  │                     │  │                 │  │                     │ │
//! │  │  VALIDATION         │  │ PERSISTENCE     │  │  TIMEOUT            │ │
//! │  │  NOT_FOUND          │  │ CONSISTENCY     │  │  CONFIGURATION      │ │
//! │  │  INSUFFICIENT_STOCK │  │                 │  │                     │ │
//! │  │  RETURN_EXCEEDS_... │  │                 │  │                     │ │
//! │  │  REFUND_EXCEEDS_... │  │                 │  │                     │ │
//! │  │  INVALID_STATE      │  │                 │  │                     │ │
//! │  │  CREDIT_LIMIT_...   │  │                 │  │                     │ │
//! │  └─────────────────────┘  └─────────────────┘  └─────────────────────┘ │
//! │                                                                         │
//! │  Nothing here is retried by the engine. Every failure is terminal for  │
//! │  the request and the transaction has already been rolled back.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::Serialize;
use thiserror::Error;

use tally_core::{CoreError, ValidationError};
use tally_db::DbError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A business rule was violated.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The datastore failed.
    #[error("Persistence failure: {0}")]
    Db(#[from] DbError),

    /// The operation did not finish within the configured deadline.
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    /// Stored state contradicts itself (e.g. a guarded write that should
    /// have matched did not).
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        EngineError::Core(CoreError::Validation(err))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

/// Machine-readable error category.
///
/// Serializes as `SCREAMING_SNAKE_CASE`, e.g. `"INSUFFICIENT_STOCK"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InsufficientStock,
    ReturnExceedsAvailable,
    RefundExceedsAvailable,
    InvalidState,
    CreditLimitExceeded,
    Persistence,
    Consistency,
    Timeout,
    Configuration,
}

impl ErrorKind {
    /// Business-rule failures: surfaced verbatim, caller's fault.
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            ErrorKind::Validation
                | ErrorKind::NotFound
                | ErrorKind::InsufficientStock
                | ErrorKind::ReturnExceedsAvailable
                | ErrorKind::RefundExceedsAvailable
                | ErrorKind::InvalidState
                | ErrorKind::CreditLimitExceeded
        )
    }
}

impl EngineError {
    /// Categorizes this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Core(core) => match core {
                CoreError::ProductNotFound(_)
                | CoreError::ProductNotInShop { .. }
                | CoreError::SaleNotFound(_)
                | CoreError::SaleItemNotFound { .. }
                | CoreError::CustomerNotFound(_) => ErrorKind::NotFound,
                CoreError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
                CoreError::ReturnExceedsAvailable { .. } => ErrorKind::ReturnExceedsAvailable,
                CoreError::RefundExceedsAvailable { .. } => ErrorKind::RefundExceedsAvailable,
                CoreError::InvalidSaleStatus { .. } => ErrorKind::InvalidState,
                CoreError::CreditLimitExceeded { .. } => ErrorKind::CreditLimitExceeded,
                CoreError::Validation(_) => ErrorKind::Validation,
            },
            EngineError::Db(db) => match db {
                // Duplicate SKU or sale number: the caller sent a clashing value
                DbError::UniqueViolation { .. } => ErrorKind::Validation,
                DbError::Conflict { .. } | DbError::CheckViolation { .. } => {
                    ErrorKind::Consistency
                }
                _ => ErrorKind::Persistence,
            },
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::Consistency(_) => ErrorKind::Consistency,
            EngineError::Config(_) => ErrorKind::Configuration,
        }
    }

    /// Shorthand for `self.kind().is_business()`.
    pub fn is_business(&self) -> bool {
        self.kind().is_business()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_kinds() {
        let err: EngineError = CoreError::InsufficientStock {
            product_id: "p-1".into(),
            available: "0".into(),
            requested: "1".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert!(err.is_business());

        let err: EngineError = CoreError::ProductNotInShop {
            product_id: "p-1".into(),
            shop_id: "s-2".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_validation_converts_through_core() {
        let err: EngineError = ValidationError::Required {
            field: "items".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "Validation error: items is required");
    }

    #[test]
    fn test_operational_kinds_are_not_business() {
        let timeout = EngineError::Timeout {
            operation: "create_sale".into(),
            after_ms: 50,
        };
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert!(!timeout.is_business());

        let db: EngineError = DbError::PoolExhausted.into();
        assert_eq!(db.kind(), ErrorKind::Persistence);

        let conflict: EngineError = DbError::conflict("CostLayer", "l-1").into();
        assert_eq!(conflict.kind(), ErrorKind::Consistency);
    }

    #[test]
    fn test_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorKind::RefundExceedsAvailable).unwrap();
        assert_eq!(json, "\"REFUND_EXCEEDS_AVAILABLE\"");
    }
}
