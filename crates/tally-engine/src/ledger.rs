//! # Cost Layer Ledger
//!
//! FIFO cost layers per product.
//!
//! ## Consumption
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  consume_fifo(product, 8 units)                                        │
//! │                                                                         │
//! │  open layers (oldest first)        draws          basis                │
//! │  ┌──────────────────────┐                                              │
//! │  │ L1  5 @ 10.00        │ ──────► 5 from L1 ──► {5, 10.00, L1}         │
//! │  ├──────────────────────┤                                              │
//! │  │ L2 10 @ 12.00        │ ──────► 3 from L2 ──► {3, 12.00, L2}         │
//! │  └──────────────────────┘                                              │
//! │                                                                         │
//! │  cost_total = 86.00   avg_cost = 10.75                                 │
//! │                                                                         │
//! │  Layers run out   → shortfall costed at product.cost_price (warn!)     │
//! │  Layers unreadable → whole quantity at cost_price (warn!)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Reversal
//! Reversals never refill a drained layer. They add a new `return` layer
//! priced at the sale item's `avg_cost`, so reversing is cost-neutral no
//! matter what happened to the ledger since the sale.

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{debug, warn};
use uuid::Uuid;

use tally_core::costing::{extended_cost, fallback_plan, plan_fifo, FifoPlan, LayerBalance};
use tally_core::{
    CostFragment, CostLayer, CostSourceType, Money, Product, Quantity, ValidationError,
};
use tally_db::{CostLayerRepository, Database};

use crate::catalog::load_product;
use crate::error::EngineResult;

/// A stock-increasing event to record as a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCostLayer {
    pub product_id: String,
    pub shop_id: String,
    pub unit_cost: Money,
    pub quantity: Quantity,
    pub source_type: CostSourceType,
    pub source_id: Option<String>,
}

/// Remaining quantity and value of a product's open layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Valuation {
    pub quantity: Quantity,
    pub value: Money,
}

impl Valuation {
    /// Weighted average unit cost of what is left.
    pub fn unit_cost(&self) -> Money {
        self.value.per_unit(self.quantity)
    }
}

/// FIFO cost layer ledger.
#[derive(Debug, Clone)]
pub struct CostLayerLedger {
    db: Database,
}

impl CostLayerLedger {
    pub fn new(db: Database) -> Self {
        CostLayerLedger { db }
    }

    /// Consumes `needed` from the product's layers, oldest first.
    ///
    /// Runs on the caller's connection so the draws commit or roll back
    /// together with the stock decrement.
    pub async fn consume_fifo(
        &self,
        conn: &mut SqliteConnection,
        product: &Product,
        needed: Quantity,
    ) -> EngineResult<FifoPlan> {
        if !needed.is_positive() {
            return Err(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            }
            .into());
        }

        let mut repo = CostLayerRepository::new(conn);

        let layers = match repo.open_layers(&product.id).await {
            Ok(layers) => layers,
            Err(e) => {
                warn!(
                    product_id = %product.id,
                    quantity = %needed,
                    error = %e,
                    "Cost layers unavailable, costing at cost price"
                );
                return Ok(fallback_plan(needed, product.cost_price()));
            }
        };

        let balances: Vec<LayerBalance> = layers.iter().map(LayerBalance::from).collect();
        let plan = plan_fifo(&balances, needed, product.cost_price());

        for draw in &plan.draws {
            repo.draw(&draw.layer_id, draw.quantity).await?;
        }

        if plan.used_fallback() {
            warn!(
                product_id = %product.id,
                fallback_quantity = %plan.fallback_quantity,
                cost_price = %product.cost_price(),
                "Cost layers exhausted, shortfall costed at cost price"
            );
        }

        debug!(
            product_id = %product.id,
            quantity = %needed,
            layers = plan.draws.len(),
            cost_total = %plan.cost_total,
            "FIFO consumption planned and applied"
        );

        Ok(plan)
    }

    /// Adds a `return` layer for stock coming back from a sale.
    ///
    /// No-op (returns `None`) when `quantity` is not positive.
    pub async fn restore_from_reversal(
        &self,
        conn: &mut SqliteConnection,
        product_id: &str,
        shop_id: &str,
        quantity: Quantity,
        unit_cost: Money,
        source_id: &str,
    ) -> EngineResult<Option<CostLayer>> {
        if !quantity.is_positive() {
            return Ok(None);
        }

        let layer = self
            .record_layer(
                conn,
                NewCostLayer {
                    product_id: product_id.to_string(),
                    shop_id: shop_id.to_string(),
                    unit_cost,
                    quantity,
                    source_type: CostSourceType::Return,
                    source_id: Some(source_id.to_string()),
                },
            )
            .await?;

        Ok(Some(layer))
    }

    /// Records any stock-increasing event as a full layer.
    pub async fn record_layer(
        &self,
        conn: &mut SqliteConnection,
        new: NewCostLayer,
    ) -> EngineResult<CostLayer> {
        let now = Utc::now();
        let layer = CostLayer {
            id: Uuid::new_v4().to_string(),
            product_id: new.product_id,
            shop_id: new.shop_id,
            unit_cost_cents: new.unit_cost.cents(),
            initial_quantity: new.quantity.milli(),
            remaining_quantity: new.quantity.milli(),
            source_type: new.source_type,
            source_id: new.source_id,
            received_at: now,
            created_at: now,
        };

        CostLayerRepository::new(conn).insert(&layer).await?;
        Ok(layer)
    }

    /// Open layers of a shop's product, oldest first.
    pub async fn open_layers(
        &self,
        shop_id: &str,
        product_id: &str,
    ) -> EngineResult<Vec<CostLayer>> {
        let mut conn = self.db.acquire().await?;
        load_product(&mut conn, shop_id, product_id).await?;

        Ok(CostLayerRepository::new(&mut conn)
            .open_layers(product_id)
            .await?)
    }

    /// Every layer of a shop's product, drained ones included.
    pub async fn layers(&self, shop_id: &str, product_id: &str) -> EngineResult<Vec<CostLayer>> {
        let mut conn = self.db.acquire().await?;
        load_product(&mut conn, shop_id, product_id).await?;

        Ok(CostLayerRepository::new(&mut conn)
            .all_layers(product_id)
            .await?)
    }

    /// What the open layers of a product are worth.
    pub async fn valuation(&self, shop_id: &str, product_id: &str) -> EngineResult<Valuation> {
        let layers = self.open_layers(shop_id, product_id).await?;

        let fragments: Vec<CostFragment> = layers
            .iter()
            .map(|l| CostFragment {
                quantity: l.remaining_quantity,
                unit_cost_cents: l.unit_cost_cents,
                layer_id: Some(l.id.clone()),
            })
            .collect();

        Ok(Valuation {
            quantity: layers
                .iter()
                .fold(Quantity::zero(), |acc, l| acc + l.remaining()),
            value: extended_cost(&fragments),
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use chrono::Duration;
    use tally_db::ProductRepository;

    async fn product_with_layers(db: &Database, layers: &[(i64, i64)]) -> Product {
        let product = testing::product("shop-1", "FLOUR", layers.iter().map(|l| l.0).sum(), 900);
        let mut conn = db.acquire().await.unwrap();
        ProductRepository::new(&mut conn).insert(&product).await.unwrap();

        let base = Utc::now() - Duration::days(30);
        for (i, (units, cost)) in layers.iter().enumerate() {
            let at = base + Duration::days(i as i64);
            CostLayerRepository::new(&mut conn)
                .insert(&CostLayer {
                    id: Uuid::new_v4().to_string(),
                    product_id: product.id.clone(),
                    shop_id: product.shop_id.clone(),
                    unit_cost_cents: *cost,
                    initial_quantity: units * 1_000,
                    remaining_quantity: units * 1_000,
                    source_type: CostSourceType::Purchase,
                    source_id: None,
                    received_at: at,
                    created_at: at,
                })
                .await
                .unwrap();
        }
        product
    }

    #[tokio::test]
    async fn test_consume_oldest_first() {
        let db = testing::database().await;
        let ledger = CostLayerLedger::new(db.clone());
        let product = product_with_layers(&db, &[(5, 1000), (10, 1200)]).await;

        let mut conn = db.acquire().await.unwrap();
        let plan = ledger
            .consume_fifo(&mut conn, &product, Quantity::from_units(8))
            .await
            .unwrap();
        drop(conn);

        assert_eq!(plan.cost_total, Money::from_cents(8600));
        assert_eq!(plan.avg_cost, Money::from_cents(1075));
        assert_eq!(plan.basis.len(), 2);
        assert_eq!(plan.basis[0].quantity, 5_000);
        assert_eq!(plan.basis[0].unit_cost_cents, 1000);
        assert_eq!(plan.basis[1].quantity, 3_000);
        assert_eq!(plan.basis[1].unit_cost_cents, 1200);

        let open = ledger.open_layers("shop-1", &product.id).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].remaining(), Quantity::from_units(7));
    }

    #[tokio::test]
    async fn test_shortfall_uses_cost_price() {
        let db = testing::database().await;
        let ledger = CostLayerLedger::new(db.clone());
        let product = product_with_layers(&db, &[(2, 1000)]).await;

        let mut conn = db.acquire().await.unwrap();
        let plan = ledger
            .consume_fifo(&mut conn, &product, Quantity::from_units(5))
            .await
            .unwrap();

        // 2 × 10.00 + 3 × 9.00
        assert_eq!(plan.cost_total, Money::from_cents(4700));
        assert_eq!(plan.fallback_quantity, Quantity::from_units(3));
        assert!(plan.basis.last().unwrap().is_fallback());
    }

    #[tokio::test]
    async fn test_non_positive_quantity_rejected() {
        let db = testing::database().await;
        let ledger = CostLayerLedger::new(db.clone());
        let product = product_with_layers(&db, &[(1, 100)]).await;

        let mut conn = db.acquire().await.unwrap();
        let err = ledger
            .consume_fifo(&mut conn, &product, Quantity::zero())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_restore_creates_new_return_layer() {
        let db = testing::database().await;
        let ledger = CostLayerLedger::new(db.clone());
        let product = product_with_layers(&db, &[(1, 500)]).await;

        let mut conn = db.acquire().await.unwrap();
        let none = ledger
            .restore_from_reversal(
                &mut conn,
                &product.id,
                "shop-1",
                Quantity::zero(),
                Money::from_cents(750),
                "sale-1",
            )
            .await
            .unwrap();
        assert!(none.is_none());

        let layer = ledger
            .restore_from_reversal(
                &mut conn,
                &product.id,
                "shop-1",
                Quantity::from_units(4),
                Money::from_cents(750),
                "sale-1",
            )
            .await
            .unwrap()
            .unwrap();
        drop(conn);

        assert_eq!(layer.source_type, CostSourceType::Return);
        assert_eq!(layer.initial(), Quantity::from_units(4));
        assert_eq!(layer.remaining(), Quantity::from_units(4));
        assert_eq!(layer.unit_cost(), Money::from_cents(750));

        let valuation = ledger.valuation("shop-1", &product.id).await.unwrap();
        assert_eq!(valuation.quantity, Quantity::from_units(5));
        assert_eq!(valuation.value, Money::from_cents(3500));
        assert_eq!(valuation.unit_cost(), Money::from_cents(700));
    }

    #[tokio::test]
    async fn test_layers_are_shop_scoped() {
        let db = testing::database().await;
        let ledger = CostLayerLedger::new(db.clone());
        let product = product_with_layers(&db, &[(1, 100)]).await;

        let err = ledger.open_layers("shop-2", &product.id).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }
}
