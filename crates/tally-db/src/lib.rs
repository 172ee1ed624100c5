//! # tally-db: Database Layer for Tally
//!
//! SQLite storage for the inventory costing and sale engine, via sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Tally Data Flow                                │
//! │                                                                         │
//! │  SaleEngine::create_sale (tally-engine)                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     tally-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ Product       │    │              │  │   │
//! │  │   │ SqlitePool    │    │ CostLayer     │    │ 001_initial  │  │   │
//! │  │   │ begin()       │◄───│ Movement      │    │   _schema    │  │   │
//! │  │   │ acquire()     │    │ Sale/Reversal │    │              │  │   │
//! │  │   │               │    │ Customer      │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_db::{Database, DbConfig, ProductRepository};
//!
//! let db = Database::new(DbConfig::new("tally.db")).await?;
//!
//! let mut tx = db.begin().await?;
//! let change = ProductRepository::new(&mut tx)
//!     .try_decrement_stock(&product_id, &shop_id, qty)
//!     .await?;
//! tx.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::cost_layer::CostLayerRepository;
pub use repository::customer::{BalanceChange, CustomerRepository};
pub use repository::movement::MovementRepository;
pub use repository::product::{ProductRepository, StockChange};
pub use repository::reversal::ReversalRepository;
pub use repository::sale::SaleRepository;
