//! # Stock Movement Log
//!
//! Append-only audit trail of stock quantity changes.
//!
//! ## Recording Policy
//! - [`StockMovementLog::record`] is **best-effort**: a failed append is
//!   logged with `warn!` and swallowed, never failing the enclosing
//!   operation.
//! - [`StockMovementLog::try_record`] is the strict variant.
//!
//! ## History
//! ```text
//! history(product, limit=5), page_size=2
//!
//!   next() ─► fetch seq < ∞   LIMIT 2 ─► [s9, s8]   yield s9
//!   next()                               buffered   yield s8
//!   next() ─► fetch seq < s8  LIMIT 2 ─► [s6, s5]   yield s6
//!   next()                               buffered   yield s5
//!   next() ─► fetch seq < s5  LIMIT 1 ─► [s2]       yield s2
//!   next()                               limit hit  None
//! ```
//! Pages are fetched on demand; `restart()` starts over from the newest row.

use std::collections::VecDeque;

use sqlx::SqliteConnection;
use tracing::{debug, warn};

use tally_core::{NewStockMovement, StockMovement};
use tally_db::{Database, MovementRepository};

use crate::error::EngineResult;

/// Stock movement log.
#[derive(Debug, Clone)]
pub struct StockMovementLog {
    db: Database,
    page_size: u32,
}

impl StockMovementLog {
    pub fn new(db: Database, page_size: u32) -> Self {
        StockMovementLog {
            db,
            page_size: page_size.max(1),
        }
    }

    /// Appends a movement, best-effort.
    ///
    /// Returns `None` if the append failed; the failure has been logged.
    pub async fn record(
        &self,
        conn: &mut SqliteConnection,
        movement: NewStockMovement,
    ) -> Option<StockMovement> {
        match self.try_record(conn, movement.clone()).await {
            Ok(row) => Some(row),
            Err(e) => {
                warn!(
                    product_id = %movement.product_id,
                    action = movement.action.as_str(),
                    delta = %movement.quantity_delta,
                    error = %e,
                    "Stock movement not recorded"
                );
                None
            }
        }
    }

    /// Appends a movement, propagating failures.
    pub async fn try_record(
        &self,
        conn: &mut SqliteConnection,
        movement: NewStockMovement,
    ) -> EngineResult<StockMovement> {
        Ok(MovementRepository::new(conn).insert(&movement).await?)
    }

    /// Up to `limit` movements of a product, newest first, read lazily.
    pub fn history(&self, product_id: &str, limit: usize) -> MovementHistory {
        MovementHistory {
            db: self.db.clone(),
            product_id: product_id.to_string(),
            limit,
            page_size: self.page_size,
            cursor: None,
            buffer: VecDeque::new(),
            yielded: 0,
            exhausted: false,
            pages_fetched: 0,
        }
    }
}

/// Lazy, finite, restartable reader over a product's movements.
#[derive(Debug)]
pub struct MovementHistory {
    db: Database,
    product_id: String,
    limit: usize,
    page_size: u32,
    /// `seq` of the last row fetched.
    cursor: Option<i64>,
    buffer: VecDeque<StockMovement>,
    yielded: usize,
    exhausted: bool,
    pages_fetched: usize,
}

impl MovementHistory {
    /// Next movement, or `None` once `limit` rows were read or none are left.
    pub async fn next(&mut self) -> EngineResult<Option<StockMovement>> {
        if self.yielded >= self.limit {
            return Ok(None);
        }

        if self.buffer.is_empty() {
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_page().await?;
        }

        match self.buffer.pop_front() {
            Some(movement) => {
                self.yielded += 1;
                Ok(Some(movement))
            }
            None => Ok(None),
        }
    }

    /// Reads everything left up to the limit.
    pub async fn collect_remaining(&mut self) -> EngineResult<Vec<StockMovement>> {
        let mut out = Vec::new();
        while let Some(movement) = self.next().await? {
            out.push(movement);
        }
        Ok(out)
    }

    /// Starts over from the newest movement.
    pub fn restart(&mut self) {
        self.cursor = None;
        self.buffer.clear();
        self.yielded = 0;
        self.exhausted = false;
    }

    /// Number of database reads so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    async fn fetch_page(&mut self) -> EngineResult<()> {
        let want = (self.limit - self.yielded).min(self.page_size as usize) as u32;

        let mut conn = self.db.acquire().await?;
        let page = MovementRepository::new(&mut conn)
            .page(&self.product_id, self.cursor, want)
            .await?;
        self.pages_fetched += 1;

        debug!(
            product_id = %self.product_id,
            rows = page.len(),
            "Fetched movement history page"
        );

        if (page.len() as u32) < want {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.cursor = Some(last.seq);
        }
        self.buffer.extend(page);

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use tally_core::{MovementAction, Quantity};
    use tally_db::ProductRepository;

    async fn seeded(db: &Database, log: &StockMovementLog, count: i64) -> String {
        let product = testing::product("shop-1", "SOAP", count, 100);
        let mut conn = db.acquire().await.unwrap();
        ProductRepository::new(&mut conn).insert(&product).await.unwrap();

        for i in 0..count {
            log.try_record(
                &mut conn,
                NewStockMovement {
                    product_id: product.id.clone(),
                    shop_id: "shop-1".to_string(),
                    action: MovementAction::Sale,
                    quantity_delta: Quantity::from_units(-1),
                    previous_quantity: Quantity::from_units(count - i),
                    new_quantity: Quantity::from_units(count - i - 1),
                    actor_id: "cashier-1".to_string(),
                    notes: Some(format!("sale {i}")),
                },
            )
            .await
            .unwrap();
        }
        product.id
    }

    #[tokio::test]
    async fn test_history_is_lazy_and_newest_first() {
        let db = testing::database().await;
        let log = StockMovementLog::new(db.clone(), 2);
        let product_id = seeded(&db, &log, 5).await;

        let mut history = log.history(&product_id, 10);
        assert_eq!(history.pages_fetched(), 0);

        let first = history.next().await.unwrap().unwrap();
        assert_eq!(first.notes.as_deref(), Some("sale 4"));
        assert_eq!(first.new_quantity, 0);
        assert_eq!(history.pages_fetched(), 1);

        let rest = history.collect_remaining().await.unwrap();
        assert_eq!(rest.len(), 4);
        assert!(rest.windows(2).all(|w| w[0].seq > w[1].seq));
        assert!(history.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_stops_at_limit_and_restarts() {
        let db = testing::database().await;
        let log = StockMovementLog::new(db.clone(), 50);
        let product_id = seeded(&db, &log, 5).await;

        let mut history = log.history(&product_id, 3);
        let taken = history.collect_remaining().await.unwrap();
        assert_eq!(taken.len(), 3);
        assert!(history.next().await.unwrap().is_none());

        history.restart();
        let again = history.collect_remaining().await.unwrap();
        assert_eq!(again, taken);
    }

    #[tokio::test]
    async fn test_best_effort_record_swallows_failure() {
        let db = testing::database().await;
        let log = StockMovementLog::new(db.clone(), 10);
        let mut conn = db.acquire().await.unwrap();

        // Unknown product violates the foreign key
        let recorded = log
            .record(
                &mut conn,
                NewStockMovement {
                    product_id: "missing".to_string(),
                    shop_id: "shop-1".to_string(),
                    action: MovementAction::Adjustment,
                    quantity_delta: Quantity::from_units(1),
                    previous_quantity: Quantity::zero(),
                    new_quantity: Quantity::from_units(1),
                    actor_id: "admin".to_string(),
                    notes: None,
                },
            )
            .await;
        assert!(recorded.is_none());

        let strict = log
            .try_record(
                &mut conn,
                NewStockMovement {
                    product_id: "missing".to_string(),
                    shop_id: "shop-1".to_string(),
                    action: MovementAction::Adjustment,
                    quantity_delta: Quantity::from_units(1),
                    previous_quantity: Quantity::zero(),
                    new_quantity: Quantity::from_units(1),
                    actor_id: "admin".to_string(),
                    notes: None,
                },
            )
            .await;
        assert!(strict.is_err());
    }
}
