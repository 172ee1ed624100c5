//! # Validation Module
//!
//! Shape validation for engine inputs.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Caller (API / UI, outside this workspace)                    │
//! │  └── Request parsing, auth, basic format checks                        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                   │
//! │  └── Shapes: non-empty items, positive quantities, non-negative money  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Engine                                                        │
//! │  └── Business invariants: stock, ownership, return/refund bounds       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 4: SQLite CHECK / UNIQUE / FOREIGN KEY constraints              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use tally_core::validation::{validate_quantity, validate_sku};
//! use tally_core::Quantity;
//!
//! validate_sku("RICE-5KG").unwrap();
//! validate_quantity("quantity", Quantity::from_milli(1)).unwrap();
//! assert!(validate_quantity("quantity", Quantity::zero()).is_err());
//! ```

use crate::error::ValidationError;
use crate::money::Money;
use crate::quantity::Quantity;
use crate::types::{CreateSaleInput, NewCustomer, NewProduct, PartialRefundInput, ReturnItemInput};
use crate::{MAX_AMOUNT_CENTS, MAX_LINE_UNITS, MAX_SALE_LINES};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a SKU.
///
/// ## Rules
/// - Must not be empty
/// - At most 50 characters
/// - Letters, numbers, hyphens and underscores only
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    let sku = sku.trim();

    if sku.is_empty() {
        return Err(ValidationError::Required {
            field: "sku".to_string(),
        });
    }

    if sku.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "sku".to_string(),
            max: 50,
        });
    }

    if !sku
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "sku".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a display name (product or customer), 1-200 characters.
pub fn validate_name(field: &str, name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if name.len() > 200 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 200,
        });
    }

    Ok(())
}

/// Validates an entity id or scoping id (shop, actor).
pub fn validate_id(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if id.len() > 64 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 64,
        });
    }

    Ok(())
}

/// Validates free text (notes, reasons), at most 500 characters.
pub fn validate_note(field: &str, note: Option<&str>) -> ValidationResult<()> {
    match note {
        Some(text) if text.len() > 500 => Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 500,
        }),
        _ => Ok(()),
    }
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity.
///
/// ## Rules
/// - Must be positive (at least 0.001)
/// - Must not exceed [`MAX_LINE_UNITS`]
pub fn validate_quantity(field: &str, qty: Quantity) -> ValidationResult<()> {
    if !qty.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }

    if qty > Quantity::from_units(MAX_LINE_UNITS) {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_LINE_UNITS,
        });
    }

    Ok(())
}

fn validate_amount_ceiling(field: &str, amount: Money, min: i64) -> ValidationResult<()> {
    if amount.cents() > MAX_AMOUNT_CENTS {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min,
            max: MAX_AMOUNT_CENTS,
        });
    }

    Ok(())
}

/// Validates an amount that may be zero (prices, discounts, tax).
///
/// At most [`MAX_AMOUNT_CENTS`].
pub fn validate_amount(field: &str, amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }

    validate_amount_ceiling(field, amount, 0)
}

/// Validates an amount that must be strictly positive (refunds, payments).
pub fn validate_positive_amount(field: &str, amount: Money) -> ValidationResult<()> {
    if !amount.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }

    validate_amount_ceiling(field, amount, 1)
}

fn sale_total_out_of_range() -> ValidationError {
    ValidationError::InvalidFormat {
        field: "items".to_string(),
        reason: "sale total out of range".to_string(),
    }
}

// =============================================================================
// Operation Validators
// =============================================================================

/// Validates a sale request.
///
/// ## Rules
/// - 1..=[`MAX_SALE_LINES`] items
/// - Every line: product id, positive quantity, non-negative price and
///   discount, line total not negative
/// - Sale discount and tax not negative, final amount not negative
/// - Every amount at most [`MAX_AMOUNT_CENTS`]
pub fn validate_sale_input(input: &CreateSaleInput) -> ValidationResult<()> {
    if input.items.is_empty() {
        return Err(ValidationError::Required {
            field: "items".to_string(),
        });
    }

    if input.items.len() > MAX_SALE_LINES {
        return Err(ValidationError::OutOfRange {
            field: "items".to_string(),
            min: 1,
            max: MAX_SALE_LINES as i64,
        });
    }

    for line in &input.items {
        validate_id("product_id", &line.product_id)?;
        validate_quantity("quantity", line.quantity)?;
        validate_amount("unit_price", line.unit_price)?;
        validate_amount("item discount", line.discount_amount)?;
        let line_total = line.checked_line_total().ok_or_else(sale_total_out_of_range)?;
        if line_total.is_negative() {
            return Err(ValidationError::InvalidFormat {
                field: "item discount".to_string(),
                reason: "exceeds the line amount".to_string(),
            });
        }
    }

    validate_amount("discount", input.discount_amount)?;
    validate_amount("tax", input.tax_amount)?;
    let final_amount = input.checked_final_amount().ok_or_else(sale_total_out_of_range)?;
    if final_amount.is_negative() {
        return Err(ValidationError::InvalidFormat {
            field: "discount".to_string(),
            reason: "exceeds the sale total".to_string(),
        });
    }

    if let Some(customer_id) = input.customer_id.as_deref() {
        validate_id("customer_id", customer_id)?;
    }
    if let Some(number) = input.sale_number.as_deref() {
        validate_id("sale_number", number)?;
    }
    validate_note("notes", input.notes.as_deref())?;

    Ok(())
}

/// Validates a partial item return request.
pub fn validate_return_input(input: &ReturnItemInput) -> ValidationResult<()> {
    validate_id("sale_item_id", &input.sale_item_id)?;
    validate_quantity("quantity", input.quantity)?;
    validate_note("reason", input.reason.as_deref())
}

/// Validates a partial refund request.
pub fn validate_refund_input(input: &PartialRefundInput) -> ValidationResult<()> {
    validate_positive_amount("amount", input.amount)?;
    validate_note("reason", input.reason.as_deref())
}

/// Validates a new product.
pub fn validate_new_product(input: &NewProduct) -> ValidationResult<()> {
    validate_sku(&input.sku)?;
    validate_name("name", &input.name)?;
    validate_amount("cost_price", input.cost_price)?;
    validate_amount("selling_price", input.selling_price)?;
    if input.initial_stock.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "initial_stock".to_string(),
        });
    }
    Ok(())
}

/// Validates a new customer.
pub fn validate_new_customer(input: &NewCustomer) -> ValidationResult<()> {
    validate_name("name", &input.name)?;
    if let Some(limit) = input.credit_limit {
        validate_amount("credit_limit", limit)?;
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
