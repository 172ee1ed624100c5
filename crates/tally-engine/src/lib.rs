//! # tally-engine: Inventory Costing & Sale Transaction Engine
//!
//! Records sales against FIFO-costed inventory and reverses them through
//! cancellations, item returns and partial refunds, keeping stock, cost
//! layers, the movement log and customer credit consistent.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          tally-engine                                   │
//! │                                                                         │
//! │  ┌───────────────────────────────────────────────────────────────────┐ │
//! │  │                          SaleEngine                               │ │
//! │  │  create_sale · cancel_sale · return_sale_item · partial refund    │ │
//! │  │  one transaction per call · operation_timeout                     │ │
//! │  └──────┬──────────────┬──────────────────┬──────────────┬──────────┘ │
//! │         │              │                  │              │            │
//! │  ┌──────▼──────┐ ┌─────▼──────────┐ ┌─────▼─────────┐ ┌──▼─────────┐ │
//! │  │ ProductCat- │ │ CostLayerLedger│ │ StockMovement │ │ Customer   │ │
//! │  │ alog        │ │ FIFO draws,    │ │ Log           │ │ Credit     │ │
//! │  │ stock, cost │ │ return layers  │ │ best-effort   │ │ Ledger     │ │
//! │  └─────────────┘ └────────────────┘ └───────────────┘ └────────────┘ │
//! │                                                                         │
//! │                tally-db repositories  ·  tally-core rules              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use tally_engine::{EngineConfig, SaleEngine};
//!
//! tally_engine::init_tracing();
//! let engine = SaleEngine::connect(EngineConfig::load(None)?).await?;
//!
//! let view = engine.create_sale("shop-1", "cashier-7", input).await?;
//! println!("{} cost {}", view.sale.sale_number, view.cost_of_goods());
//! ```

pub mod catalog;
pub mod config;
pub mod credit;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod movements;
pub mod numbering;

pub use catalog::ProductCatalog;
pub use config::{DatabaseSettings, EngineConfig, EngineSettings};
pub use credit::CustomerCreditLedger;
pub use engine::SaleEngine;
pub use error::{EngineError, EngineResult, ErrorKind};
pub use ledger::{CostLayerLedger, NewCostLayer, Valuation};
pub use movements::{MovementHistory, StockMovementLog};
pub use numbering::{PrefixedSaleNumbers, SaleNumberGenerator};

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`.
///
/// Falls back to `info,tally=debug,sqlx=warn`. Does nothing if a global
/// subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tally=debug,sqlx=warn"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
