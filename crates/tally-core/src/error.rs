//! # Error Types
//!
//! Domain-specific error types for tally-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tally-core errors (this file)                                         │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Malformed input                                │
//! │                                                                         │
//! │  tally-db errors (separate crate)                                      │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  tally-engine errors                                                   │
//! │  └── EngineError      - What callers see (adds Timeout, Consistency)   │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → caller              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Business errors are terminal for the request and never retried.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Product does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Product exists but belongs to another shop.
    #[error("Product {product_id} does not belong to shop {shop_id}")]
    ProductNotInShop { product_id: String, shop_id: String },

    /// Sale does not exist (or belongs to another shop).
    #[error("Sale not found: {0}")]
    SaleNotFound(String),

    /// Sale item is not part of the given sale.
    #[error("Sale item {item_id} not found on sale {sale_id}")]
    SaleItemNotFound { sale_id: String, item_id: String },

    /// Customer does not exist (or belongs to another shop).
    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    /// Insufficient stock to complete sale.
    ///
    /// ## User Workflow
    /// ```text
    /// Sale line (qty: 5)
    ///      │
    ///      ▼
    /// Check stock: available=3
    ///      │
    ///      ▼
    /// InsufficientStock { product_id, available: 3, requested: 5 }
    /// ```
    #[error("Insufficient stock for {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: String,
        requested: String,
    },

    /// Return quantity is larger than what is left on the line.
    #[error("Cannot return {requested} of item {item_id}: only {available} returnable")]
    ReturnExceedsAvailable {
        item_id: String,
        available: String,
        requested: String,
    },

    /// Refund amount is larger than what is left on the sale.
    #[error("Cannot refund {requested} on sale {sale_id}: only {available} refundable")]
    RefundExceedsAvailable {
        sale_id: String,
        available: String,
        requested: String,
    },

    /// Sale is not in a state that allows the requested operation.
    ///
    /// ## When This Occurs
    /// - Cancelling an already cancelled sale
    /// - Returning items from a cancelled sale
    /// - Refunding a cancelled sale
    #[error("Sale {sale_id} is {current_status}, cannot perform operation")]
    InvalidSaleStatus {
        sale_id: String,
        current_status: String,
    },

    /// Credit sale would push the customer over their credit limit.
    #[error("Credit limit exceeded for {customer_id}: limit {limit}, would owe {attempted}")]
    CreditLimitExceeded {
        customer_id: String,
        limit: String,
        attempted: String,
    },

    /// Input failed shape validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Malformed or out-of-range request data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Also used for a payment larger than the balance owed.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    #[error("{field} must be positive")]
    MustBePositive { field: String },

    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., invalid UUID, invalid characters).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Result of a pure business-rule check.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            product_id: "p-1".to_string(),
            available: "3".to_string(),
            requested: "5".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for p-1: available 3, requested 5"
        );

        let err = CoreError::InvalidSaleStatus {
            sale_id: "s-1".to_string(),
            current_status: "cancelled".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Sale s-1 is cancelled, cannot perform operation"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "items".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
