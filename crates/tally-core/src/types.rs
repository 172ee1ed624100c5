//! # Domain Types
//!
//! Core domain types used throughout the engine.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │   CostLayer     │   │ StockMovement   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  stock_quantity │◄──│  product_id     │   │  action         │       │
//! │  │  cost_price     │   │  unit_cost      │   │  delta          │       │
//! │  │  version        │   │  remaining      │   │  prev → new     │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Sale       │──►│    SaleItem     │   │ SaleReturn      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │ SaleRefund      │       │
//! │  │  final_amount   │   │  cost_basis     │   │ (append-only)   │       │
//! │  │  refunded       │   │  returned_qty   │   └─────────────────┘       │
//! │  │  status         │   └─────────────────┘                              │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Amounts are stored as `*_cents: i64` and quantities as milli-units `i64`,
//! matching the database columns one to one. Accessors wrap them in
//! [`Money`] and [`Quantity`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::money::Money;
use crate::quantity::Quantity;

// =============================================================================
// Product
// =============================================================================

/// A product owned by a shop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    pub id: String,

    /// Shop owning this product; every engine operation is shop-scoped.
    pub shop_id: String,

    pub sku: String,
    pub name: String,

    /// Current stock in milli-units. Never negative.
    pub stock_quantity: i64,

    /// Fallback unit cost when no cost layer data exists.
    pub cost_price_cents: i64,

    pub selling_price_cents: i64,

    /// Bumped on every stock change (optimistic concurrency).
    pub version: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    #[inline]
    pub fn stock(&self) -> Quantity {
        Quantity::from_milli(self.stock_quantity)
    }

    #[inline]
    pub fn cost_price(&self) -> Money {
        Money::from_cents(self.cost_price_cents)
    }

    #[inline]
    pub fn selling_price(&self) -> Money {
        Money::from_cents(self.selling_price_cents)
    }
}

// =============================================================================
// Cost Layers
// =============================================================================

/// What created a cost layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum CostSourceType {
    /// Stock received from a supplier.
    Purchase,
    /// Stock restored by a cancellation or item return.
    Return,
    /// Opening stock or a positive manual adjustment.
    InitialStock,
}

impl CostSourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostSourceType::Purchase => "purchase",
            CostSourceType::Return => "return",
            CostSourceType::InitialStock => "initial_stock",
        }
    }
}

/// A batch of stock that entered inventory at one unit cost.
///
/// Layers are drained by sales and never deleted. Reversals create a new
/// layer instead of refilling the original one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CostLayer {
    pub id: String,
    pub product_id: String,
    pub shop_id: String,
    pub unit_cost_cents: i64,
    pub initial_quantity: i64,
    /// 0 ≤ remaining ≤ initial.
    pub remaining_quantity: i64,
    pub source_type: CostSourceType,
    /// Id of the operation that created this layer.
    pub source_id: Option<String>,
    /// FIFO order key (ties broken by `created_at`).
    pub received_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl CostLayer {
    #[inline]
    pub fn unit_cost(&self) -> Money {
        Money::from_cents(self.unit_cost_cents)
    }

    #[inline]
    pub fn remaining(&self) -> Quantity {
        Quantity::from_milli(self.remaining_quantity)
    }

    #[inline]
    pub fn initial(&self) -> Quantity {
        Quantity::from_milli(self.initial_quantity)
    }
}

/// One `{quantity, unit_cost}` fragment of a sale line's cost.
///
/// `layer_id` is `None` when the fragment was costed at the product's
/// `cost_price` because the layers ran out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostFragment {
    pub quantity: i64,
    pub unit_cost_cents: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_id: Option<String>,
}

impl CostFragment {
    #[inline]
    pub fn quantity(&self) -> Quantity {
        Quantity::from_milli(self.quantity)
    }

    #[inline]
    pub fn unit_cost(&self) -> Money {
        Money::from_cents(self.unit_cost_cents)
    }

    pub fn is_fallback(&self) -> bool {
        self.layer_id.is_none()
    }
}

// =============================================================================
// Stock Movements
// =============================================================================

/// Cause of a stock quantity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum MovementAction {
    Purchase,
    Sale,
    Adjustment,
    Return,
}

impl MovementAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementAction::Purchase => "purchase",
            MovementAction::Sale => "sale",
            MovementAction::Adjustment => "adjustment",
            MovementAction::Return => "return",
        }
    }
}

/// Immutable record of one stock quantity change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockMovement {
    /// Append position; strictly increasing.
    pub seq: i64,
    pub id: String,
    pub product_id: String,
    pub shop_id: String,
    pub action: MovementAction,
    pub quantity_delta: i64,
    pub previous_quantity: i64,
    pub new_quantity: i64,
    pub actor_id: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for appending a stock movement.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStockMovement {
    pub product_id: String,
    pub shop_id: String,
    pub action: MovementAction,
    pub quantity_delta: Quantity,
    pub previous_quantity: Quantity,
    pub new_quantity: Quantity,
    pub actor_id: String,
    pub notes: Option<String>,
}

// =============================================================================
// Sale Status / Payment Method
// =============================================================================

/// The status of a sale.
///
/// ```text
/// completed ──cancel──► cancelled (terminal)
/// ```
/// Returns and refunds never change the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    #[default]
    Completed,
    Cancelled,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Completed => "completed",
            SaleStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    MobileMoney,
    BankTransfer,
    Card,
    /// Customer pays later; the amount goes on their credit balance.
    Credit,
}

impl PaymentMethod {
    #[inline]
    pub fn is_credit(&self) -> bool {
        matches!(self, PaymentMethod::Credit)
    }
}

// =============================================================================
// Sale
// =============================================================================

/// A sale header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Sale {
    pub id: String,
    pub shop_id: String,
    pub customer_id: Option<String>,
    /// Unique display number.
    pub sale_number: String,
    /// Sum of line totals.
    pub total_amount_cents: i64,
    /// Sale-level discount.
    pub discount_amount_cents: i64,
    pub tax_amount_cents: i64,
    /// total − discount + tax.
    pub final_amount_cents: i64,
    /// 0 ≤ refunded ≤ final.
    pub refunded_amount_cents: i64,
    pub payment_method: PaymentMethod,
    pub status: SaleStatus,
    pub notes: Option<String>,
    pub actor_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Sale {
    #[inline]
    pub fn final_amount(&self) -> Money {
        Money::from_cents(self.final_amount_cents)
    }

    #[inline]
    pub fn refunded_amount(&self) -> Money {
        Money::from_cents(self.refunded_amount_cents)
    }

    /// Amount that can still be refunded.
    pub fn refundable(&self) -> Money {
        self.final_amount() - self.refunded_amount()
    }

    pub fn is_completed(&self) -> bool {
        self.status == SaleStatus::Completed
    }
}

// =============================================================================
// Sale Item
// =============================================================================

/// A line item in a sale, with its FIFO cost breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub discount_amount_cents: i64,
    /// quantity × unit_price − discount.
    pub total_price_cents: i64,
    /// 0 ≤ returned ≤ quantity.
    pub returned_quantity: i64,
    /// FIFO cost of goods for the line.
    pub cost_total_cents: i64,
    /// cost_total / quantity; used as the unit cost for every reversal.
    pub avg_cost_cents: i64,
    /// Layers consumed, in FIFO order.
    pub cost_basis: Vec<CostFragment>,
    /// Portion costed at the product's `cost_price` because layers ran out.
    pub fallback_quantity: i64,
    pub created_at: DateTime<Utc>,
}

impl SaleItem {
    #[inline]
    pub fn quantity(&self) -> Quantity {
        Quantity::from_milli(self.quantity)
    }

    #[inline]
    pub fn returned(&self) -> Quantity {
        Quantity::from_milli(self.returned_quantity)
    }

    /// Quantity that can still be returned.
    pub fn returnable(&self) -> Quantity {
        self.quantity() - self.returned()
    }

    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    #[inline]
    pub fn avg_cost(&self) -> Money {
        Money::from_cents(self.avg_cost_cents)
    }

    #[inline]
    pub fn cost_total(&self) -> Money {
        Money::from_cents(self.cost_total_cents)
    }
}

// =============================================================================
// Returns & Refunds
// =============================================================================

/// One partial item return. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SaleReturn {
    pub id: String,
    pub sale_id: String,
    pub sale_item_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub amount_cents: i64,
    pub reason: Option<String>,
    pub actor_id: String,
    pub created_at: DateTime<Utc>,
}

/// One monetary-only refund. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SaleRefund {
    pub id: String,
    pub sale_id: String,
    pub amount_cents: i64,
    /// Always false: refunds have no inventory effect.
    pub affects_stock: bool,
    pub reason: Option<String>,
    pub actor_id: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Customer
// =============================================================================

/// A customer with an outstanding credit balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Customer {
    pub id: String,
    pub shop_id: String,
    pub name: String,
    pub phone: Option<String>,
    /// ≥ 0 by policy.
    pub credit_balance_cents: i64,
    /// `None` means no limit.
    pub credit_limit_cents: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    #[inline]
    pub fn credit_balance(&self) -> Money {
        Money::from_cents(self.credit_balance_cents)
    }

    pub fn credit_limit(&self) -> Option<Money> {
        self.credit_limit_cents.map(Money::from_cents)
    }
}

// =============================================================================
// Operation Inputs
// =============================================================================

/// One requested sale line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleLineInput {
    pub product_id: String,
    pub quantity: Quantity,
    pub unit_price: Money,
    #[serde(default)]
    pub discount_amount: Money,
}

impl SaleLineInput {
    /// quantity × unit_price − discount.
    pub fn line_total(&self) -> Money {
        self.unit_price.times(self.quantity) - self.discount_amount
    }

    /// [`line_total`](Self::line_total), or `None` outside the `i64` range.
    pub fn checked_line_total(&self) -> Option<Money> {
        self.unit_price
            .checked_times(self.quantity)?
            .checked_sub(self.discount_amount)
    }
}

/// Input for creating a sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSaleInput {
    #[serde(default)]
    pub customer_id: Option<String>,
    pub items: Vec<SaleLineInput>,
    #[serde(default)]
    pub discount_amount: Money,
    #[serde(default)]
    pub tax_amount: Money,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub notes: Option<String>,
    /// Externally generated display number; generated when absent.
    #[serde(default)]
    pub sale_number: Option<String>,
}

impl CreateSaleInput {
    /// Sum of line totals.
    pub fn total_amount(&self) -> Money {
        self.items.iter().map(SaleLineInput::line_total).sum()
    }

    /// total − discount + tax.
    pub fn final_amount(&self) -> Money {
        self.total_amount() - self.discount_amount + self.tax_amount
    }

    /// [`final_amount`](Self::final_amount), or `None` outside the `i64` range.
    pub fn checked_final_amount(&self) -> Option<Money> {
        let mut total = Money::zero();
        for line in &self.items {
            total = total.checked_add(line.checked_line_total()?)?;
        }
        total
            .checked_sub(self.discount_amount)?
            .checked_add(self.tax_amount)
    }
}

/// Input for a partial item return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnItemInput {
    pub sale_item_id: String,
    pub quantity: Quantity,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Input for a monetary-only refund.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialRefundInput {
    pub amount: Money,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Input for creating a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub cost_price: Money,
    pub selling_price: Money,
    #[serde(default)]
    pub initial_stock: Quantity,
}

/// Input for creating a customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCustomer {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub credit_limit: Option<Money>,
}

// =============================================================================
// Composed Views
// =============================================================================

/// A sale with everything a presentation layer needs, no further joins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleView {
    pub sale: Sale,
    pub items: Vec<SaleItem>,
    pub customer: Option<Customer>,
    pub returns: Vec<SaleReturn>,
    pub refunds: Vec<SaleRefund>,
}

impl SaleView {
    /// Finds an item by id.
    pub fn item(&self, item_id: &str) -> Option<&SaleItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    /// Total FIFO cost of goods across all lines.
    pub fn cost_of_goods(&self) -> Money {
        self.items.iter().map(SaleItem::cost_total).sum()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn line(qty: i64, price: i64, discount: i64) -> SaleLineInput {
        SaleLineInput {
            product_id: "p".to_string(),
            quantity: Quantity::from_units(qty),
            unit_price: Money::from_cents(price),
            discount_amount: Money::from_cents(discount),
        }
    }

    #[test]
    fn test_sale_status_default() {
        assert_eq!(SaleStatus::default(), SaleStatus::Completed);
        assert_eq!(SaleStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_sale_input_amounts() {
        let input = CreateSaleInput {
            customer_id: None,
            items: vec![line(2, 1000, 100), line(1, 500, 0)],
            discount_amount: Money::from_cents(200),
            tax_amount: Money::from_cents(150),
            payment_method: PaymentMethod::Cash,
            notes: None,
            sale_number: None,
        };

        assert_eq!(input.total_amount().cents(), 2400);
        assert_eq!(input.final_amount().cents(), 2350);
    }

    #[test]
    fn test_payment_method_serde() {
        let json = serde_json::to_string(&PaymentMethod::MobileMoney).unwrap();
        assert_eq!(json, "\"mobile_money\"");
        assert!(PaymentMethod::Credit.is_credit());
        assert!(!PaymentMethod::Card.is_credit());
    }

    #[test]
    fn test_cost_fragment_serde_omits_missing_layer() {
        let fragment = CostFragment {
            quantity: 3_000,
            unit_cost_cents: 1200,
            layer_id: None,
        };
        let json = serde_json::to_string(&fragment).unwrap();
        assert_eq!(json, r#"{"quantity":3000,"unit_cost_cents":1200}"#);
        assert!(fragment.is_fallback());
    }
}
