//! # Repository Module
//!
//! SQL for every table lives here and nowhere else.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Connection-Borrowing Repositories                    │
//! │                                                                         │
//! │  let mut tx = db.begin().await?;                                       │
//! │       │                                                                 │
//! │       ├── ProductRepository::new(&mut tx).try_decrement_stock(..)      │
//! │       ├── CostLayerRepository::new(&mut tx).draw(..)                   │
//! │       ├── SaleRepository::new(&mut tx).insert_sale(..)                 │
//! │       └── MovementRepository::new(&mut tx).insert(..)                  │
//! │       │                                                                 │
//! │  tx.commit().await?;                                                   │
//! │                                                                         │
//! │  Repositories borrow a connection instead of owning a pool, so the     │
//! │  same code runs inside a transaction or on a plain pooled connection.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarded Writes
//!
//! Methods named `try_*` are compare-and-set updates: the invariant is part
//! of the `WHERE` clause and they return `None`/`false` when it would break.
//! The caller then reads the row to say exactly why.
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`](product::ProductRepository) - products and stock counters
//! - [`CostLayerRepository`](cost_layer::CostLayerRepository) - FIFO cost layers
//! - [`MovementRepository`](movement::MovementRepository) - stock movement log
//! - [`SaleRepository`](sale::SaleRepository) - sales and sale items
//! - [`ReversalRepository`](reversal::ReversalRepository) - returns and refunds
//! - [`CustomerRepository`](customer::CustomerRepository) - customers and credit

pub mod cost_layer;
pub mod customer;
pub mod movement;
pub mod product;
pub mod reversal;
pub mod sale;
