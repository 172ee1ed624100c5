//! # Product Catalog
//!
//! Products, their stock counters and standard cost.
//!
//! Every stock change goes through here or through the [`SaleEngine`], and
//! always moves three things together in one transaction: the product's
//! `stock_quantity`, its cost layers, and a stock movement.
//!
//! | Operation       | Stock | Cost layers                 | Movement     |
//! |-----------------|-------|-----------------------------|--------------|
//! | create_product  | = n   | `initial_stock` @ cost_price | `adjustment` |
//! | receive_stock   | += n  | `purchase` @ unit_cost       | `purchase`   |
//! | adjust_stock +n | += n  | `initial_stock` @ cost_price | `adjustment` |
//! | adjust_stock −n | −= n  | drained FIFO                 | `adjustment` |
//!
//! [`SaleEngine`]: crate::SaleEngine

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

use tally_core::validation::{
    validate_amount, validate_id, validate_new_product, validate_note, validate_quantity,
};
use tally_core::{
    CoreError, CostSourceType, Money, MovementAction, NewProduct, NewStockMovement, Product,
    Quantity, ValidationError,
};
use tally_db::{Database, DbError, ProductRepository, StockChange};

use crate::error::{EngineError, EngineResult};
use crate::ledger::{CostLayerLedger, NewCostLayer};
use crate::movements::StockMovementLog;

/// Loads a product of `shop_id`, telling apart missing and foreign products.
pub(crate) async fn load_product(
    conn: &mut SqliteConnection,
    shop_id: &str,
    product_id: &str,
) -> EngineResult<Product> {
    let mut products = ProductRepository::new(conn);
    if let Some(product) = products.get_in_shop(shop_id, product_id).await? {
        return Ok(product);
    }

    match products.get_by_id(product_id).await? {
        Some(_) => Err(CoreError::ProductNotInShop {
            product_id: product_id.to_string(),
            shop_id: shop_id.to_string(),
        }
        .into()),
        None => Err(CoreError::ProductNotFound(product_id.to_string()).into()),
    }
}

/// Explains why a guarded stock decrement matched nothing.
pub(crate) async fn stock_failure(
    conn: &mut SqliteConnection,
    shop_id: &str,
    product_id: &str,
    requested: Quantity,
) -> EngineError {
    match load_product(conn, shop_id, product_id).await {
        Ok(product) => CoreError::InsufficientStock {
            product_id: product_id.to_string(),
            available: product.stock().to_string(),
            requested: requested.to_string(),
        }
        .into(),
        Err(e) => e,
    }
}

/// Removes stock with the compare-and-decrement guard, diagnosing failures.
pub(crate) async fn take_stock(
    conn: &mut SqliteConnection,
    shop_id: &str,
    product_id: &str,
    qty: Quantity,
) -> EngineResult<StockChange> {
    let change = ProductRepository::new(conn)
        .try_decrement_stock(product_id, shop_id, qty)
        .await?;
    match change {
        Some(change) => Ok(change),
        None => Err(stock_failure(conn, shop_id, product_id, qty).await),
    }
}

/// Adds stock back, diagnosing a missing or foreign product.
pub(crate) async fn put_stock(
    conn: &mut SqliteConnection,
    shop_id: &str,
    product_id: &str,
    qty: Quantity,
) -> EngineResult<StockChange> {
    let result = ProductRepository::new(conn)
        .increment_stock(product_id, shop_id, qty)
        .await;
    match result {
        Ok(change) => Ok(change),
        Err(DbError::NotFound { .. }) => Err(load_product(conn, shop_id, product_id)
            .await
            .err()
            .unwrap_or_else(|| {
                EngineError::Consistency(format!("stock increment on {product_id} matched no row"))
            })),
        Err(e) => Err(e.into()),
    }
}

/// Product catalog.
#[derive(Debug, Clone)]
pub struct ProductCatalog {
    db: Database,
    ledger: CostLayerLedger,
    movements: StockMovementLog,
}

impl ProductCatalog {
    pub fn new(db: Database, ledger: CostLayerLedger, movements: StockMovementLog) -> Self {
        ProductCatalog {
            db,
            ledger,
            movements,
        }
    }

    /// Creates a product, with an opening stock layer when `initial_stock > 0`.
    ///
    /// ## Errors
    /// * `Validation` - bad SKU, name or prices; SKU already used in the shop
    pub async fn create_product(
        &self,
        shop_id: &str,
        actor_id: &str,
        input: NewProduct,
    ) -> EngineResult<Product> {
        validate_id("shop_id", shop_id)?;
        validate_id("actor_id", actor_id)?;
        validate_new_product(&input)?;

        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            shop_id: shop_id.to_string(),
            sku: input.sku.trim().to_string(),
            name: input.name.trim().to_string(),
            stock_quantity: input.initial_stock.milli(),
            cost_price_cents: input.cost_price.cents(),
            selling_price_cents: input.selling_price.cents(),
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.db.begin().await?;
        ProductRepository::new(&mut tx).insert(&product).await?;

        if input.initial_stock.is_positive() {
            self.ledger
                .record_layer(
                    &mut tx,
                    NewCostLayer {
                        product_id: product.id.clone(),
                        shop_id: shop_id.to_string(),
                        unit_cost: input.cost_price,
                        quantity: input.initial_stock,
                        source_type: CostSourceType::InitialStock,
                        source_id: Some(product.id.clone()),
                    },
                )
                .await?;

            self.movements
                .record(
                    &mut tx,
                    NewStockMovement {
                        product_id: product.id.clone(),
                        shop_id: shop_id.to_string(),
                        action: MovementAction::Adjustment,
                        quantity_delta: input.initial_stock,
                        previous_quantity: Quantity::zero(),
                        new_quantity: input.initial_stock,
                        actor_id: actor_id.to_string(),
                        notes: Some("Initial stock".to_string()),
                    },
                )
                .await;
        }

        tx.commit().await.map_err(DbError::from)?;

        info!(
            product_id = %product.id,
            sku = %product.sku,
            initial_stock = %input.initial_stock,
            "Product created"
        );
        Ok(product)
    }

    /// Reads a product of `shop_id`.
    pub async fn get_product(&self, shop_id: &str, product_id: &str) -> EngineResult<Product> {
        let mut conn = self.db.acquire().await?;
        load_product(&mut conn, shop_id, product_id).await
    }

    /// Lists a shop's products by SKU.
    pub async fn list_products(&self, shop_id: &str, limit: u32) -> EngineResult<Vec<Product>> {
        let mut conn = self.db.acquire().await?;
        Ok(ProductRepository::new(&mut conn)
            .list_by_shop(shop_id, limit)
            .await?)
    }

    /// Books a supplier delivery: stock up, new `purchase` layer.
    pub async fn receive_stock(
        &self,
        shop_id: &str,
        actor_id: &str,
        product_id: &str,
        quantity: Quantity,
        unit_cost: Money,
        notes: Option<String>,
    ) -> EngineResult<Product> {
        validate_id("shop_id", shop_id)?;
        validate_id("actor_id", actor_id)?;
        validate_quantity("quantity", quantity)?;
        validate_amount("unit_cost", unit_cost)?;
        validate_note("notes", notes.as_deref())?;

        let receipt_id = Uuid::new_v4().to_string();

        let mut tx = self.db.begin().await?;
        let change = put_stock(&mut tx, shop_id, product_id, quantity).await?;

        self.ledger
            .record_layer(
                &mut tx,
                NewCostLayer {
                    product_id: product_id.to_string(),
                    shop_id: shop_id.to_string(),
                    unit_cost,
                    quantity,
                    source_type: CostSourceType::Purchase,
                    source_id: Some(receipt_id.clone()),
                },
            )
            .await?;

        self.movements
            .record(
                &mut tx,
                NewStockMovement {
                    product_id: product_id.to_string(),
                    shop_id: shop_id.to_string(),
                    action: MovementAction::Purchase,
                    quantity_delta: quantity,
                    previous_quantity: change.previous,
                    new_quantity: change.new,
                    actor_id: actor_id.to_string(),
                    notes,
                },
            )
            .await;

        let product = load_product(&mut tx, shop_id, product_id).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            product_id = %product_id,
            receipt_id = %receipt_id,
            quantity = %quantity,
            unit_cost = %unit_cost,
            stock = %change.new,
            "Stock received"
        );
        Ok(product)
    }

    /// Manual stock correction by `delta` (either sign, not zero).
    ///
    /// ## Errors
    /// * `InsufficientStock` - a negative delta larger than the stock
    pub async fn adjust_stock(
        &self,
        shop_id: &str,
        actor_id: &str,
        product_id: &str,
        delta: Quantity,
        notes: Option<String>,
    ) -> EngineResult<Product> {
        validate_id("shop_id", shop_id)?;
        validate_id("actor_id", actor_id)?;
        validate_note("notes", notes.as_deref())?;
        if delta.is_zero() {
            return Err(ValidationError::InvalidFormat {
                field: "delta".to_string(),
                reason: "must not be zero".to_string(),
            }
            .into());
        }
        validate_quantity("delta", if delta.is_negative() { -delta } else { delta })?;

        let mut tx = self.db.begin().await?;

        let change = if delta.is_positive() {
            let change = put_stock(&mut tx, shop_id, product_id, delta).await?;
            let product = load_product(&mut tx, shop_id, product_id).await?;
            self.ledger
                .record_layer(
                    &mut tx,
                    NewCostLayer {
                        product_id: product_id.to_string(),
                        shop_id: shop_id.to_string(),
                        unit_cost: product.cost_price(),
                        quantity: delta,
                        source_type: CostSourceType::InitialStock,
                        source_id: None,
                    },
                )
                .await?;
            change
        } else {
            let change = take_stock(&mut tx, shop_id, product_id, -delta).await?;
            let product = load_product(&mut tx, shop_id, product_id).await?;
            let plan = self.ledger.consume_fifo(&mut tx, &product, -delta).await?;
            debug!(
                product_id = %product_id,
                written_off = %plan.cost_total,
                "Layers drained by negative adjustment"
            );
            change
        };

        self.movements
            .record(
                &mut tx,
                NewStockMovement {
                    product_id: product_id.to_string(),
                    shop_id: shop_id.to_string(),
                    action: MovementAction::Adjustment,
                    quantity_delta: delta,
                    previous_quantity: change.previous,
                    new_quantity: change.new,
                    actor_id: actor_id.to_string(),
                    notes,
                },
            )
            .await;

        let product = load_product(&mut tx, shop_id, product_id).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            product_id = %product_id,
            delta = %delta,
            stock = %change.new,
            "Stock adjusted"
        );
        Ok(product)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
