//! # tally-core: Pure Business Logic for the Tally Engine
//!
//! This crate holds the domain model of the inventory costing & sale
//! transaction engine as pure data and pure functions.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tally Architecture                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 tally-engine (SaleEngine)                       │   │
//! │  │    create_sale, cancel_sale, return_sale_item, partial refund   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tally-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │  costing  │  │ validation│  │   │
//! │  │   │  Product  │  │   Money   │  │ FIFO plan │  │   rules   │  │   │
//! │  │   │   Sale    │  │ Quantity  │  │  basis    │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    tally-db (Database Layer)                    │   │
//! │  │              SQLite queries, migrations, repositories           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, CostLayer, Sale, SaleItem, ...)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`quantity`] - Quantity type in thousandths of a unit
//! - [`costing`] - FIFO cost-layer planning
//! - [`error`] - Domain error types
//! - [`validation`] - Input shape validation
//!
//! ## Example Usage
//!
//! ```rust
//! use tally_core::costing::{plan_fifo, LayerBalance};
//! use tally_core::{Money, Quantity};
//!
//! let layers = vec![
//!     LayerBalance::new("l1", Money::from_cents(1000), Quantity::from_units(5)),
//!     LayerBalance::new("l2", Money::from_cents(1200), Quantity::from_units(10)),
//! ];
//!
//! let plan = plan_fifo(&layers, Quantity::from_units(8), Money::from_cents(900));
//! assert_eq!(plan.cost_total.cents(), 8600);
//! assert_eq!(plan.avg_cost.cents(), 1075);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod costing;
pub mod error;
pub mod money;
pub mod quantity;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use quantity::Quantity;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum number of lines allowed on a single sale.
pub const MAX_SALE_LINES: usize = 500;

/// Maximum quantity of a single line, in whole units.
///
/// Guards against typos such as 100000 instead of 100.
pub const MAX_LINE_UNITS: i64 = 1_000_000;

/// Largest single amount (price, discount, tax, refund, credit limit), in cents.
///
/// 100,000,000.00. With [`MAX_LINE_UNITS`] and [`MAX_SALE_LINES`] a whole
/// sale stays inside `i64` cents.
pub const MAX_AMOUNT_CENTS: i64 = 10_000_000_000;
