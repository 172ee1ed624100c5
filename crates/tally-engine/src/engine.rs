//! # Sale Transaction Engine
//!
//! Orchestrates sales and their reversals over the catalog, the cost layer
//! ledger, the movement log and the credit ledger.
//!
//! ## Sale Lifecycle
//! ```text
//!                 create_sale
//!                      │
//!                      ▼
//!              ┌───────────────┐  return_sale_item ┐
//!              │   completed   │◄──────────────────┘ (status unchanged)
//!              │               │◄──────────────────┐
//!              └───────┬───────┘  create_partial_refund
//!                      │ cancel_sale
//!                      ▼
//!              ┌───────────────┐
//!              │   cancelled   │  terminal
//!              └───────────────┘
//! ```
//!
//! ## Unit of Work
//! Every mutating operation is one SQLite transaction whose first statement
//! is a guarded write (`UPDATE … WHERE <invariant> RETURNING …`):
//!
//! | Operation             | Guard                                          |
//! |-----------------------|------------------------------------------------|
//! | create_sale           | `stock_quantity >= qty` per line               |
//! | cancel_sale           | `status = 'completed'`                         |
//! | return_sale_item      | `returned_quantity + qty <= quantity`          |
//! | create_partial_refund | `refunded_amount + amount <= final_amount`     |
//!
//! A guard that matches nothing is diagnosed with reads on the same
//! transaction, turned into a precise error, and the transaction is dropped.
//! The whole operation runs under `operation_timeout`; expiry drops the
//! transaction as well.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tally_core::validation::{
    validate_id, validate_refund_input, validate_return_input, validate_sale_input,
};
use tally_core::{
    CoreError, CreateSaleInput, MovementAction, NewStockMovement, PartialRefundInput,
    ReturnItemInput, Sale, SaleItem, SaleRefund, SaleReturn, SaleStatus, SaleView,
};
use tally_db::{
    CustomerRepository, Database, DbError, ReversalRepository, SaleRepository, StockChange,
};

use crate::catalog::{load_product, put_stock, take_stock, ProductCatalog};
use crate::config::EngineConfig;
use crate::credit::{load_customer, CustomerCreditLedger};
use crate::error::{EngineError, EngineResult};
use crate::ledger::CostLayerLedger;
use crate::movements::StockMovementLog;
use crate::numbering::{PrefixedSaleNumbers, SaleNumberGenerator};

/// Reads a sale of `shop_id` with everything hanging off it.
pub(crate) async fn load_view(
    conn: &mut SqliteConnection,
    shop_id: &str,
    sale_id: &str,
) -> EngineResult<SaleView> {
    let mut sales = SaleRepository::new(conn);
    let sale = sales
        .get_in_shop(shop_id, sale_id)
        .await?
        .ok_or_else(|| CoreError::SaleNotFound(sale_id.to_string()))?;
    let items = sales.get_items(sale_id).await?;

    let customer = match sale.customer_id.as_deref() {
        Some(id) => CustomerRepository::new(conn).get_by_id(id).await?,
        None => None,
    };

    let mut reversals = ReversalRepository::new(conn);
    let returns = reversals.list_returns(sale_id).await?;
    let refunds = reversals.list_refunds(sale_id).await?;

    Ok(SaleView {
        sale,
        items,
        customer,
        returns,
        refunds,
    })
}

/// Explains why a guarded write on a sale matched nothing, when the reason
/// is the sale itself (missing, foreign, or no longer completed).
async fn sale_state_failure(
    conn: &mut SqliteConnection,
    shop_id: &str,
    sale_id: &str,
) -> EngineResult<Sale> {
    let sale = SaleRepository::new(conn)
        .get_in_shop(shop_id, sale_id)
        .await?
        .ok_or_else(|| CoreError::SaleNotFound(sale_id.to_string()))?;

    if !sale.is_completed() {
        return Err(CoreError::InvalidSaleStatus {
            sale_id: sale_id.to_string(),
            current_status: sale.status.as_str().to_string(),
        }
        .into());
    }

    Ok(sale)
}

/// Sale transaction engine.
///
/// Cheap to clone; clones share the pool and the components.
#[derive(Clone)]
pub struct SaleEngine {
    db: Database,
    config: EngineConfig,
    catalog: ProductCatalog,
    ledger: CostLayerLedger,
    movements: StockMovementLog,
    credit: CustomerCreditLedger,
    numbers: Arc<dyn SaleNumberGenerator>,
}

impl std::fmt::Debug for SaleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaleEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SaleEngine {
    /// Wires the engine and its components over an open database.
    pub fn new(db: Database, config: EngineConfig) -> Self {
        let ledger = CostLayerLedger::new(db.clone());
        let movements = StockMovementLog::new(db.clone(), config.engine.history_page_size);
        let catalog = ProductCatalog::new(db.clone(), ledger.clone(), movements.clone());
        let credit = CustomerCreditLedger::new(db.clone(), config.engine.enforce_credit_limit);
        let numbers = Arc::new(PrefixedSaleNumbers::new(
            config.engine.sale_number_prefix.clone(),
        ));

        SaleEngine {
            db,
            config,
            catalog,
            ledger,
            movements,
            credit,
            numbers,
        }
    }

    /// Opens the configured database and wires the engine over it.
    pub async fn connect(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let db = Database::new(config.db_config()).await?;
        Ok(Self::new(db, config))
    }

    /// Replaces the sale number generator.
    pub fn with_sale_numbers(mut self, numbers: impl SaleNumberGenerator + 'static) -> Self {
        self.numbers = Arc::new(numbers);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ProductCatalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &CostLayerLedger {
        &self.ledger
    }

    pub fn movements(&self) -> &StockMovementLog {
        &self.movements
    }

    pub fn credit(&self) -> &CustomerCreditLedger {
        &self.credit
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        let limit = self.config.operation_timeout();
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, after_ms = limit.as_millis() as u64, "Operation timed out");
                Err(EngineError::Timeout {
                    operation: operation.to_string(),
                    after_ms: limit.as_millis() as u64,
                })
            }
        }
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Records a sale: stock out, FIFO costing, movements, credit.
    ///
    /// ## Errors
    /// * `Validation` - malformed input, duplicate sale number
    /// * `NotFound` - unknown product or customer, or one of another shop
    /// * `InsufficientStock` - a product has less stock than its lines ask
    ///   for in total
    /// * `CreditLimitExceeded` - only when the limit is enforced
    pub async fn create_sale(
        &self,
        shop_id: &str,
        actor_id: &str,
        input: CreateSaleInput,
    ) -> EngineResult<SaleView> {
        self.bounded("create_sale", self.create_sale_tx(shop_id, actor_id, input))
            .await
    }

    async fn create_sale_tx(
        &self,
        shop_id: &str,
        actor_id: &str,
        input: CreateSaleInput,
    ) -> EngineResult<SaleView> {
        validate_id("shop_id", shop_id)?;
        validate_id("actor_id", actor_id)?;
        validate_sale_input(&input)?;

        let now = Utc::now();
        let sale_id = Uuid::new_v4().to_string();
        let sale_number = input
            .sale_number
            .clone()
            .unwrap_or_else(|| self.numbers.next_number(shop_id, now));

        let mut tx = self.db.begin().await?;

        // Guarded decrements in input order; the first short line aborts
        let mut changes: Vec<StockChange> = Vec::with_capacity(input.items.len());
        for line in &input.items {
            changes.push(take_stock(&mut tx, shop_id, &line.product_id, line.quantity).await?);
        }

        if let Some(customer_id) = input.customer_id.as_deref() {
            load_customer(&mut tx, shop_id, customer_id).await?;
        }

        let sale = Sale {
            id: sale_id.clone(),
            shop_id: shop_id.to_string(),
            customer_id: input.customer_id.clone(),
            sale_number: sale_number.clone(),
            total_amount_cents: input.total_amount().cents(),
            discount_amount_cents: input.discount_amount.cents(),
            tax_amount_cents: input.tax_amount.cents(),
            final_amount_cents: input.final_amount().cents(),
            refunded_amount_cents: 0,
            payment_method: input.payment_method,
            status: SaleStatus::Completed,
            notes: input.notes.clone(),
            actor_id: actor_id.to_string(),
            created_at: now,
            updated_at: now,
            cancelled_at: None,
        };
        SaleRepository::new(&mut tx).insert_sale(&sale).await?;

        for (line_no, (line, change)) in input.items.iter().zip(changes).enumerate() {
            let product = load_product(&mut tx, shop_id, &line.product_id).await?;
            let plan = self
                .ledger
                .consume_fifo(&mut tx, &product, line.quantity)
                .await?;

            self.movements
                .record(
                    &mut tx,
                    NewStockMovement {
                        product_id: line.product_id.clone(),
                        shop_id: shop_id.to_string(),
                        action: MovementAction::Sale,
                        quantity_delta: -line.quantity,
                        previous_quantity: change.previous,
                        new_quantity: change.new,
                        actor_id: actor_id.to_string(),
                        notes: Some(format!("Sale {sale_number}")),
                    },
                )
                .await;

            let item = SaleItem {
                id: Uuid::new_v4().to_string(),
                sale_id: sale_id.clone(),
                product_id: line.product_id.clone(),
                quantity: line.quantity.milli(),
                unit_price_cents: line.unit_price.cents(),
                discount_amount_cents: line.discount_amount.cents(),
                total_price_cents: line.line_total().cents(),
                returned_quantity: 0,
                cost_total_cents: plan.cost_total.cents(),
                avg_cost_cents: plan.avg_cost.cents(),
                fallback_quantity: plan.fallback_quantity.milli(),
                cost_basis: plan.basis,
                created_at: now,
            };
            SaleRepository::new(&mut tx)
                .insert_item(&item, line_no as i64)
                .await?;
        }

        if input.payment_method.is_credit() {
            match input.customer_id.as_deref() {
                Some(customer_id) => {
                    let balance = self
                        .credit
                        .charge(&mut tx, shop_id, customer_id, sale.final_amount())
                        .await?;
                    debug!(customer_id = %customer_id, balance = %balance, "Credit sale charged");
                }
                None => warn!(
                    sale_id = %sale_id,
                    "Credit sale without a customer, no balance updated"
                ),
            }
        }

        let view = load_view(&mut tx, shop_id, &sale_id).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            sale_id = %sale_id,
            sale_number = %sale_number,
            items = view.items.len(),
            final_amount = %sale.final_amount(),
            cost_of_goods = %view.cost_of_goods(),
            "Sale created"
        );
        Ok(view)
    }

    // =========================================================================
    // Cancel
    // =========================================================================

    /// Cancels a completed sale in full.
    ///
    /// Restores what was sold and not already returned, as new cost layers
    /// at each item's average cost, and releases a credit sale's amount.
    ///
    /// ## Errors
    /// * `NotFound` - unknown sale, or one of another shop
    /// * `InvalidState` - the sale is already cancelled
    pub async fn cancel_sale(
        &self,
        shop_id: &str,
        actor_id: &str,
        sale_id: &str,
    ) -> EngineResult<SaleView> {
        self.bounded("cancel_sale", self.cancel_sale_tx(shop_id, actor_id, sale_id))
            .await
    }

    async fn cancel_sale_tx(
        &self,
        shop_id: &str,
        actor_id: &str,
        sale_id: &str,
    ) -> EngineResult<SaleView> {
        validate_id("shop_id", shop_id)?;
        validate_id("actor_id", actor_id)?;
        validate_id("sale_id", sale_id)?;

        let mut tx = self.db.begin().await?;

        let cancelled = SaleRepository::new(&mut tx)
            .try_cancel(sale_id, shop_id, Utc::now())
            .await?;
        if !cancelled {
            sale_state_failure(&mut tx, shop_id, sale_id).await?;
            return Err(EngineError::Consistency(format!(
                "cancel of completed sale {sale_id} matched no row"
            )));
        }

        let mut sales = SaleRepository::new(&mut tx);
        let sale = sales
            .get_in_shop(shop_id, sale_id)
            .await?
            .ok_or_else(|| CoreError::SaleNotFound(sale_id.to_string()))?;
        let items = sales.get_items(sale_id).await?;

        for item in &items {
            let restore = item.returnable();
            if !restore.is_positive() {
                continue;
            }

            let change = put_stock(&mut tx, shop_id, &item.product_id, restore).await?;
            self.ledger
                .restore_from_reversal(
                    &mut tx,
                    &item.product_id,
                    shop_id,
                    restore,
                    item.avg_cost(),
                    sale_id,
                )
                .await?;

            self.movements
                .record(
                    &mut tx,
                    NewStockMovement {
                        product_id: item.product_id.clone(),
                        shop_id: shop_id.to_string(),
                        action: MovementAction::Adjustment,
                        quantity_delta: restore,
                        previous_quantity: change.previous,
                        new_quantity: change.new,
                        actor_id: actor_id.to_string(),
                        notes: Some(format!("Cancelled sale {}", sale.sale_number)),
                    },
                )
                .await;
        }

        if sale.payment_method.is_credit() {
            if let Some(customer_id) = sale.customer_id.as_deref() {
                let change = self
                    .credit
                    .release(&mut tx, shop_id, customer_id, sale.final_amount())
                    .await?;
                debug!(customer_id = %customer_id, balance = %change.new, "Credit released");
            }
        }

        let view = load_view(&mut tx, shop_id, sale_id).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            sale_id = %sale_id,
            actor_id = %actor_id,
            items = items.len(),
            "Sale cancelled"
        );
        Ok(view)
    }

    // =========================================================================
    // Return
    // =========================================================================

    /// Takes back part of one sold line.
    ///
    /// The refund is `quantity × unit_price`, capped at what is still
    /// refundable on the sale. Stock comes back as a new `return` layer at
    /// the item's average cost.
    ///
    /// ## Errors
    /// * `NotFound` - unknown sale or item
    /// * `InvalidState` - the sale is cancelled
    /// * `ReturnExceedsAvailable` - more than sold minus already returned
    pub async fn return_sale_item(
        &self,
        shop_id: &str,
        actor_id: &str,
        sale_id: &str,
        input: ReturnItemInput,
    ) -> EngineResult<SaleView> {
        self.bounded(
            "return_sale_item",
            self.return_sale_item_tx(shop_id, actor_id, sale_id, input),
        )
        .await
    }

    async fn return_sale_item_tx(
        &self,
        shop_id: &str,
        actor_id: &str,
        sale_id: &str,
        input: ReturnItemInput,
    ) -> EngineResult<SaleView> {
        validate_id("shop_id", shop_id)?;
        validate_id("actor_id", actor_id)?;
        validate_id("sale_id", sale_id)?;
        validate_return_input(&input)?;

        let item_id = input.sale_item_id.as_str();
        let mut tx = self.db.begin().await?;

        let added = SaleRepository::new(&mut tx)
            .try_add_returned(shop_id, sale_id, item_id, input.quantity)
            .await?;
        if !added {
            sale_state_failure(&mut tx, shop_id, sale_id).await?;
            let item = SaleRepository::new(&mut tx)
                .get_item(sale_id, item_id)
                .await?
                .ok_or_else(|| CoreError::SaleItemNotFound {
                    sale_id: sale_id.to_string(),
                    item_id: item_id.to_string(),
                })?;
            return Err(CoreError::ReturnExceedsAvailable {
                item_id: item_id.to_string(),
                available: item.returnable().to_string(),
                requested: input.quantity.to_string(),
            }
            .into());
        }

        let mut sales = SaleRepository::new(&mut tx);
        let sale = sales
            .get_in_shop(shop_id, sale_id)
            .await?
            .ok_or_else(|| CoreError::SaleNotFound(sale_id.to_string()))?;
        let item = sales.get_item(sale_id, item_id).await?.ok_or_else(|| {
            CoreError::SaleItemNotFound {
                sale_id: sale_id.to_string(),
                item_id: item_id.to_string(),
            }
        })?;

        let amount = item.unit_price().times(input.quantity).min(sale.refundable());
        if amount.is_positive() {
            let refunded = sales.try_add_refunded(shop_id, sale_id, amount).await?;
            if !refunded {
                return Err(EngineError::Consistency(format!(
                    "refund of {amount} on sale {sale_id} exceeded the amount just read"
                )));
            }
        }

        let record = SaleReturn {
            id: Uuid::new_v4().to_string(),
            sale_id: sale_id.to_string(),
            sale_item_id: item_id.to_string(),
            product_id: item.product_id.clone(),
            quantity: input.quantity.milli(),
            amount_cents: amount.cents(),
            reason: input.reason.clone(),
            actor_id: actor_id.to_string(),
            created_at: Utc::now(),
        };
        ReversalRepository::new(&mut tx).insert_return(&record).await?;

        let change = put_stock(&mut tx, shop_id, &item.product_id, input.quantity).await?;
        self.ledger
            .restore_from_reversal(
                &mut tx,
                &item.product_id,
                shop_id,
                input.quantity,
                item.avg_cost(),
                &record.id,
            )
            .await?;

        self.movements
            .record(
                &mut tx,
                NewStockMovement {
                    product_id: item.product_id.clone(),
                    shop_id: shop_id.to_string(),
                    action: MovementAction::Return,
                    quantity_delta: input.quantity,
                    previous_quantity: change.previous,
                    new_quantity: change.new,
                    actor_id: actor_id.to_string(),
                    notes: input
                        .reason
                        .clone()
                        .or_else(|| Some(format!("Return on sale {}", sale.sale_number))),
                },
            )
            .await;

        let view = load_view(&mut tx, shop_id, sale_id).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            sale_id = %sale_id,
            item_id = %item_id,
            quantity = %input.quantity,
            refund = %amount,
            "Sale item returned"
        );
        Ok(view)
    }

    // =========================================================================
    // Refund
    // =========================================================================

    /// Refunds money on a completed sale without touching stock.
    ///
    /// ## Errors
    /// * `NotFound` - unknown sale
    /// * `InvalidState` - the sale is cancelled
    /// * `RefundExceedsAvailable` - more than final minus already refunded
    pub async fn create_partial_refund(
        &self,
        shop_id: &str,
        actor_id: &str,
        sale_id: &str,
        input: PartialRefundInput,
    ) -> EngineResult<SaleView> {
        self.bounded(
            "create_partial_refund",
            self.create_partial_refund_tx(shop_id, actor_id, sale_id, input),
        )
        .await
    }

    async fn create_partial_refund_tx(
        &self,
        shop_id: &str,
        actor_id: &str,
        sale_id: &str,
        input: PartialRefundInput,
    ) -> EngineResult<SaleView> {
        validate_id("shop_id", shop_id)?;
        validate_id("actor_id", actor_id)?;
        validate_id("sale_id", sale_id)?;
        validate_refund_input(&input)?;

        let mut tx = self.db.begin().await?;

        let added = SaleRepository::new(&mut tx)
            .try_add_refunded(shop_id, sale_id, input.amount)
            .await?;
        if !added {
            let sale = sale_state_failure(&mut tx, shop_id, sale_id).await?;
            return Err(CoreError::RefundExceedsAvailable {
                sale_id: sale_id.to_string(),
                available: sale.refundable().to_string(),
                requested: input.amount.to_string(),
            }
            .into());
        }

        let record = SaleRefund {
            id: Uuid::new_v4().to_string(),
            sale_id: sale_id.to_string(),
            amount_cents: input.amount.cents(),
            affects_stock: false,
            reason: input.reason.clone(),
            actor_id: actor_id.to_string(),
            created_at: Utc::now(),
        };
        ReversalRepository::new(&mut tx).insert_refund(&record).await?;

        let view = load_view(&mut tx, shop_id, sale_id).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            sale_id = %sale_id,
            amount = %input.amount,
            refunded_total = %view.sale.refunded_amount(),
            "Partial refund created"
        );
        Ok(view)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The composed sale: header, items with cost breakdown, customer,
    /// returns and refunds.
    pub async fn get_sale(&self, shop_id: &str, sale_id: &str) -> EngineResult<SaleView> {
        self.bounded("get_sale", async {
            let mut conn = self.db.acquire().await?;
            load_view(&mut conn, shop_id, sale_id).await
        })
        .await
    }

    /// Most recent sales of a shop, headers only.
    pub async fn recent_sales(&self, shop_id: &str, limit: u32) -> EngineResult<Vec<Sale>> {
        let mut conn = self.db.acquire().await?;
        Ok(SaleRepository::new(&mut conn)
            .list_recent(shop_id, limit)
            .await?)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use crate::ErrorKind;
    use tally_core::{
        CostSourceType, Money, NewCustomer, NewProduct, PaymentMethod, Product, Quantity,
        SaleLineInput,
    };
    use tally_db::DbConfig;

    async fn engine_with(config: EngineConfig) -> SaleEngine {
        SaleEngine::new(testing::database().await, config)
    }

    async fn engine() -> SaleEngine {
        engine_with(EngineConfig::default()).await
    }

    /// A product whose stock is made of purchase layers `(units, unit cost)`.
    async fn stocked(engine: &SaleEngine, sku: &str, layers: &[(i64, i64)]) -> Product {
        let product = engine
            .catalog()
            .create_product(
                "shop-1",
                "admin",
                NewProduct {
                    sku: sku.to_string(),
                    name: format!("Product {sku}"),
                    cost_price: Money::from_cents(900),
                    selling_price: Money::from_cents(2000),
                    initial_stock: Quantity::zero(),
                },
            )
            .await
            .unwrap();

        let mut last = product;
        for (units, cost) in layers {
            last = engine
                .catalog()
                .receive_stock(
                    "shop-1",
                    "admin",
                    &last.id,
                    Quantity::from_units(*units),
                    Money::from_cents(*cost),
                    None,
                )
                .await
                .unwrap();
        }
        last
    }

    fn line(product_id: &str, units: i64, price_cents: i64) -> SaleLineInput {
        SaleLineInput {
            product_id: product_id.to_string(),
            quantity: Quantity::from_units(units),
            unit_price: Money::from_cents(price_cents),
            discount_amount: Money::zero(),
        }
    }

    fn sale(items: Vec<SaleLineInput>) -> CreateSaleInput {
        CreateSaleInput {
            customer_id: None,
            items,
            discount_amount: Money::zero(),
            tax_amount: Money::zero(),
            payment_method: PaymentMethod::Cash,
            notes: None,
            sale_number: None,
        }
    }

    fn returning(item_id: &str, units: i64) -> ReturnItemInput {
        ReturnItemInput {
            sale_item_id: item_id.to_string(),
            quantity: Quantity::from_units(units),
            reason: None,
        }
    }

    fn refund(cents: i64) -> PartialRefundInput {
        PartialRefundInput {
            amount: Money::from_cents(cents),
            reason: Some("Goodwill".to_string()),
        }
    }

    async fn stock_of(engine: &SaleEngine, product_id: &str) -> Quantity {
        engine
            .catalog()
            .get_product("shop-1", product_id)
            .await
            .unwrap()
            .stock()
    }

    #[tokio::test]
    async fn test_sale_costs_oldest_layers_first() {
        let engine = engine().await;
        let product = stocked(&engine, "FLOUR", &[(5, 1000), (10, 1200)]).await;

        let view = engine
            .create_sale("shop-1", "cashier-1", sale(vec![line(&product.id, 8, 2000)]))
            .await
            .unwrap();

        let item = &view.items[0];
        assert_eq!(item.cost_total(), Money::from_cents(8600));
        assert_eq!(item.avg_cost(), Money::from_cents(1075));
        assert_eq!(item.cost_basis.len(), 2);
        let basis: Vec<_> = item
            .cost_basis
            .iter()
            .map(|f| (f.quantity, f.unit_cost_cents))
            .collect();
        assert_eq!(basis, vec![(5_000, 1000), (3_000, 1200)]);
        assert_eq!(item.fallback_quantity, 0);

        assert_eq!(view.sale.total_amount_cents, 16_000);
        assert_eq!(view.sale.status, SaleStatus::Completed);
        assert!(view.sale.sale_number.starts_with("SALE-"));
        assert_eq!(stock_of(&engine, &product.id).await, Quantity::from_units(7));

        let history = engine
            .movements()
            .history(&product.id, 10)
            .collect_remaining()
            .await
            .unwrap();
        assert_eq!(history[0].action, MovementAction::Sale);
        assert_eq!(history[0].quantity_delta, -8_000);
        assert_eq!(history[0].previous_quantity, 15_000);
        assert_eq!(history[0].new_quantity, 7_000);
    }

    #[tokio::test]
    async fn test_insufficient_stock_leaves_everything_untouched() {
        let engine = engine().await;
        let soap = stocked(&engine, "SOAP", &[(10, 100)]).await;
        let salt = stocked(&engine, "SALT", &[(2, 100)]).await;

        let err = engine
            .create_sale(
                "shop-1",
                "cashier-1",
                sale(vec![line(&soap.id, 4, 200), line(&salt.id, 3, 200)]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);

        assert_eq!(stock_of(&engine, &soap.id).await, Quantity::from_units(10));
        assert_eq!(stock_of(&engine, &salt.id).await, Quantity::from_units(2));

        let layers = engine.ledger().open_layers("shop-1", &soap.id).await.unwrap();
        assert_eq!(layers[0].remaining(), Quantity::from_units(10));

        let history = engine
            .movements()
            .history(&soap.id, 10)
            .collect_remaining()
            .await
            .unwrap();
        assert!(history.iter().all(|m| m.action != MovementAction::Sale));
        assert!(engine.recent_sales("shop-1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lines_of_same_product_share_stock() {
        let engine = engine().await;
        let product = stocked(&engine, "EGGS", &[(5, 100)]).await;

        let err = engine
            .create_sale(
                "shop-1",
                "cashier-1",
                sale(vec![line(&product.id, 3, 200), line(&product.id, 3, 200)]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert_eq!(stock_of(&engine, &product.id).await, Quantity::from_units(5));
    }

    #[tokio::test]
    async fn test_return_bound() {
        let engine = engine().await;
        let product = stocked(&engine, "OIL", &[(20, 500)]).await;
        let view = engine
            .create_sale("shop-1", "cashier-1", sale(vec![line(&product.id, 10, 800)]))
            .await
            .unwrap();
        let sale_id = view.sale.id.clone();
        let item_id = view.items[0].id.clone();

        engine
            .return_sale_item("shop-1", "cashier-1", &sale_id, returning(&item_id, 2))
            .await
            .unwrap();
        let view = engine
            .return_sale_item("shop-1", "cashier-1", &sale_id, returning(&item_id, 3))
            .await
            .unwrap();
        let item = view.item(&item_id).unwrap();
        assert_eq!(item.returned(), Quantity::from_units(5));
        assert_eq!(view.sale.status, SaleStatus::Completed);
        assert_eq!(view.sale.refunded_amount(), Money::from_cents(5 * 800));
        assert_eq!(view.returns.len(), 2);

        let err = engine
            .return_sale_item("shop-1", "cashier-1", &sale_id, returning(&item_id, 6))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReturnExceedsAvailable);

        // 20 received, 10 sold, 5 back
        assert_eq!(stock_of(&engine, &product.id).await, Quantity::from_units(15));

        let layers = engine.ledger().layers("shop-1", &product.id).await.unwrap();
        let returned: Vec<_> = layers
            .iter()
            .filter(|l| l.source_type == CostSourceType::Return)
            .collect();
        assert_eq!(returned.len(), 2);
        assert!(returned.iter().all(|l| l.unit_cost() == Money::from_cents(500)));
    }

    #[tokio::test]
    async fn test_return_of_unknown_item() {
        let engine = engine().await;
        let product = stocked(&engine, "OIL", &[(2, 500)]).await;
        let view = engine
            .create_sale("shop-1", "cashier-1", sale(vec![line(&product.id, 1, 800)]))
            .await
            .unwrap();

        let err = engine
            .return_sale_item(
                "shop-1",
                "cashier-1",
                &view.sale.id,
                returning("no-such-item", 1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::SaleItemNotFound { .. })));
    }

    #[tokio::test]
    async fn test_refund_bound() {
        let engine = engine().await;
        let product = stocked(&engine, "TV", &[(1, 6000)]).await;
        let view = engine
            .create_sale("shop-1", "cashier-1", sale(vec![line(&product.id, 1, 10_000)]))
            .await
            .unwrap();
        let sale_id = view.sale.id.clone();

        engine
            .create_partial_refund("shop-1", "manager", &sale_id, refund(4000))
            .await
            .unwrap();

        let err = engine
            .create_partial_refund("shop-1", "manager", &sale_id, refund(6100))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RefundExceedsAvailable);

        let view = engine
            .create_partial_refund("shop-1", "manager", &sale_id, refund(6000))
            .await
            .unwrap();
        assert_eq!(view.sale.refunded_amount(), Money::from_cents(10_000));
        assert_eq!(view.refunds.len(), 2);
        assert!(view.refunds.iter().all(|r| !r.affects_stock));

        // Money only
        assert_eq!(stock_of(&engine, &product.id).await, Quantity::zero());
    }

    #[tokio::test]
    async fn test_return_refund_capped_by_refundable() {
        let engine = engine().await;
        let product = stocked(&engine, "RADIO", &[(2, 1000)]).await;
        let view = engine
            .create_sale("shop-1", "cashier-1", sale(vec![line(&product.id, 2, 5000)]))
            .await
            .unwrap();
        let sale_id = view.sale.id.clone();
        let item_id = view.items[0].id.clone();

        engine
            .create_partial_refund("shop-1", "manager", &sale_id, refund(8000))
            .await
            .unwrap();
        let view = engine
            .return_sale_item("shop-1", "cashier-1", &sale_id, returning(&item_id, 1))
            .await
            .unwrap();

        assert_eq!(view.returns[0].amount_cents, 2000);
        assert_eq!(view.sale.refunded_amount(), view.sale.final_amount());
    }

    #[tokio::test]
    async fn test_cancel_restores_stock_as_new_layer() {
        let engine = engine().await;
        let product = stocked(&engine, "MILK", &[(2, 500), (2, 1000)]).await;
        let view = engine
            .create_sale("shop-1", "cashier-1", sale(vec![line(&product.id, 4, 1200)]))
            .await
            .unwrap();
        assert_eq!(view.items[0].avg_cost(), Money::from_cents(750));
        assert_eq!(stock_of(&engine, &product.id).await, Quantity::zero());

        let cancelled = engine
            .cancel_sale("shop-1", "manager", &view.sale.id)
            .await
            .unwrap();
        assert_eq!(cancelled.sale.status, SaleStatus::Cancelled);
        assert!(cancelled.sale.cancelled_at.is_some());
        assert_eq!(stock_of(&engine, &product.id).await, Quantity::from_units(4));

        let open = engine.ledger().open_layers("shop-1", &product.id).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].source_type, CostSourceType::Return);
        assert_eq!(open[0].initial(), Quantity::from_units(4));
        assert_eq!(open[0].remaining(), Quantity::from_units(4));
        assert_eq!(open[0].unit_cost(), Money::from_cents(750));
        assert_eq!(open[0].source_id.as_deref(), Some(view.sale.id.as_str()));

        let err = engine
            .cancel_sale("shop-1", "manager", &view.sale.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(stock_of(&engine, &product.id).await, Quantity::from_units(4));
    }

    #[tokio::test]
    async fn test_cancel_after_partial_return_restores_remainder() {
        let engine = engine().await;
        let product = stocked(&engine, "BREAD", &[(5, 300)]).await;
        let view = engine
            .create_sale("shop-1", "cashier-1", sale(vec![line(&product.id, 5, 600)]))
            .await
            .unwrap();
        engine
            .return_sale_item("shop-1", "cashier-1", &view.sale.id, returning(&view.items[0].id, 2))
            .await
            .unwrap();
        assert_eq!(stock_of(&engine, &product.id).await, Quantity::from_units(2));

        engine
            .cancel_sale("shop-1", "manager", &view.sale.id)
            .await
            .unwrap();
        assert_eq!(stock_of(&engine, &product.id).await, Quantity::from_units(5));

        let valuation = engine.ledger().valuation("shop-1", &product.id).await.unwrap();
        assert_eq!(valuation.quantity, Quantity::from_units(5));
        assert_eq!(valuation.value, Money::from_cents(1500));
    }

    #[tokio::test]
    async fn test_cancelled_sale_refuses_returns_and_refunds() {
        let engine = engine().await;
        let product = stocked(&engine, "JAM", &[(3, 300)]).await;
        let view = engine
            .create_sale("shop-1", "cashier-1", sale(vec![line(&product.id, 3, 600)]))
            .await
            .unwrap();
        engine.cancel_sale("shop-1", "manager", &view.sale.id).await.unwrap();

        let err = engine
            .return_sale_item("shop-1", "cashier-1", &view.sale.id, returning(&view.items[0].id, 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let err = engine
            .create_partial_refund("shop-1", "manager", &view.sale.id, refund(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_credit_round_trip() {
        let engine = engine().await;
        let product = stocked(&engine, "SUGAR", &[(10, 200)]).await;
        let customer = engine
            .credit()
            .create_customer(
                "shop-1",
                NewCustomer {
                    name: "Joseph Otieno".to_string(),
                    phone: None,
                    credit_limit: None,
                },
            )
            .await
            .unwrap();

        let mut input = sale(vec![line(&product.id, 1, 5000)]);
        input.customer_id = Some(customer.id.clone());
        input.payment_method = PaymentMethod::Credit;

        let view = engine.create_sale("shop-1", "cashier-1", input).await.unwrap();
        let buyer = view.customer.as_ref().unwrap();
        assert_eq!(buyer.credit_balance(), Money::from_cents(5000));

        engine.cancel_sale("shop-1", "manager", &view.sale.id).await.unwrap();
        let customer = engine.credit().get_customer("shop-1", &customer.id).await.unwrap();
        assert_eq!(customer.credit_balance(), Money::zero());
    }

    #[tokio::test]
    async fn test_enforced_credit_limit_aborts_sale() {
        let mut config = EngineConfig::default();
        config.engine.enforce_credit_limit = true;
        let engine = engine_with(config).await;
        let product = stocked(&engine, "PHONE", &[(3, 10_000)]).await;
        let customer = engine
            .credit()
            .create_customer(
                "shop-1",
                NewCustomer {
                    name: "Grace Njeri".to_string(),
                    phone: None,
                    credit_limit: Some(Money::from_cents(15_000)),
                },
            )
            .await
            .unwrap();

        let mut input = sale(vec![line(&product.id, 1, 20_000)]);
        input.customer_id = Some(customer.id.clone());
        input.payment_method = PaymentMethod::Credit;

        let err = engine.create_sale("shop-1", "cashier-1", input).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CreditLimitExceeded);
        assert_eq!(stock_of(&engine, &product.id).await, Quantity::from_units(3));

        let customer = engine.credit().get_customer("shop-1", &customer.id).await.unwrap();
        assert_eq!(customer.credit_balance(), Money::zero());
    }

    #[tokio::test]
    async fn test_unknown_customer_aborts_sale() {
        let engine = engine().await;
        let product = stocked(&engine, "CUP", &[(3, 100)]).await;

        let mut input = sale(vec![line(&product.id, 1, 200)]);
        input.customer_id = Some("ghost".to_string());

        let err = engine.create_sale("shop-1", "cashier-1", input).await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::CustomerNotFound(_))));
        assert_eq!(stock_of(&engine, &product.id).await, Quantity::from_units(3));
    }

    #[tokio::test]
    async fn test_credit_sale_without_customer_is_accepted() {
        let engine = engine().await;
        let product = stocked(&engine, "PEN", &[(3, 100)]).await;

        let mut input = sale(vec![line(&product.id, 1, 200)]);
        input.payment_method = PaymentMethod::Credit;

        let view = engine.create_sale("shop-1", "cashier-1", input).await.unwrap();
        assert!(view.customer.is_none());
        assert_eq!(view.sale.payment_method, PaymentMethod::Credit);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sales_never_oversell() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("tally.db")).max_connections(8))
            .await
            .unwrap();
        let engine = SaleEngine::new(db, EngineConfig::default());

        for round in 0..3 {
            let product = stocked(&engine, &format!("LAST-{round}"), &[(1, 100)]).await;

            let tasks: Vec<_> = (0..8)
                .map(|i| {
                    let engine = engine.clone();
                    let input = sale(vec![line(&product.id, 1, 200)]);
                    tokio::spawn(async move {
                        engine
                            .create_sale("shop-1", &format!("cashier-{i}"), input)
                            .await
                    })
                })
                .collect();

            let mut ok = 0;
            let mut short = 0;
            for task in tasks {
                match task.await.unwrap() {
                    Ok(_) => ok += 1,
                    Err(e) if e.kind() == ErrorKind::InsufficientStock => short += 1,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }

            assert_eq!((ok, short), (1, 7), "round {round}");
            assert_eq!(stock_of(&engine, &product.id).await, Quantity::zero());
            let layers = engine.ledger().open_layers("shop-1", &product.id).await.unwrap();
            assert!(layers.is_empty());
        }
    }

    #[tokio::test]
    async fn test_lost_movement_log_does_not_abort_operations() {
        let db = testing::database().await;
        let engine = SaleEngine::new(db.clone(), EngineConfig::default());
        let product = stocked(&engine, "RICE", &[(4, 1000), (6, 1200)]).await;

        {
            let mut conn = db.acquire().await.unwrap();
            sqlx::query("DROP TABLE stock_movements")
                .execute(&mut *conn)
                .await
                .unwrap();
        }

        let view = engine
            .create_sale("shop-1", "cashier-1", sale(vec![line(&product.id, 5, 2000)]))
            .await
            .unwrap();
        assert_eq!(view.items[0].cost_total(), Money::from_cents(4 * 1000 + 1200));
        assert_eq!(stock_of(&engine, &product.id).await, Quantity::from_units(5));

        let layers = engine.ledger().open_layers("shop-1", &product.id).await.unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].remaining(), Quantity::from_units(5));

        let item_id = view.items[0].id.clone();
        let view = engine
            .return_sale_item("shop-1", "cashier-1", &view.sale.id, returning(&item_id, 1))
            .await
            .unwrap();
        assert_eq!(view.returns.len(), 1);
        assert_eq!(stock_of(&engine, &product.id).await, Quantity::from_units(6));

        let view = engine
            .cancel_sale("shop-1", "manager", &view.sale.id)
            .await
            .unwrap();
        assert_eq!(view.sale.status, SaleStatus::Cancelled);
        assert_eq!(stock_of(&engine, &product.id).await, Quantity::from_units(10));

        let stored = engine.get_sale("shop-1", &view.sale.id).await.unwrap();
        assert_eq!(stored.sale.status, SaleStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_other_shop_sees_nothing() {
        let engine = engine().await;
        let product = stocked(&engine, "HAT", &[(2, 100)]).await;

        let err = engine
            .create_sale("shop-2", "cashier-9", sale(vec![line(&product.id, 1, 200)]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::ProductNotInShop { .. })));

        let view = engine
            .create_sale("shop-1", "cashier-1", sale(vec![line(&product.id, 1, 200)]))
            .await
            .unwrap();

        let err = engine.get_sale("shop-2", &view.sale.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = engine
            .cancel_sale("shop-2", "manager", &view.sale.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = engine
            .create_partial_refund("shop-2", "manager", &view.sale.id, refund(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let fetched = engine.get_sale("shop-1", &view.sale.id).await.unwrap();
        assert_eq!(fetched.sale, view.sale);
    }

    #[tokio::test]
    async fn test_explicit_sale_number_and_duplicate() {
        let engine = engine().await;
        let product = stocked(&engine, "BAG", &[(5, 100)]).await;

        let mut input = sale(vec![line(&product.id, 1, 200)]);
        input.sale_number = Some("POS-0001".to_string());
        let view = engine.create_sale("shop-1", "cashier-1", input.clone()).await.unwrap();
        assert_eq!(view.sale.sale_number, "POS-0001");

        let err = engine.create_sale("shop-1", "cashier-1", input).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(stock_of(&engine, &product.id).await, Quantity::from_units(4));
    }

    #[tokio::test]
    async fn test_injected_sale_numbers() {
        struct Fixed;
        impl SaleNumberGenerator for Fixed {
            fn next_number(&self, shop_id: &str, _at: chrono::DateTime<Utc>) -> String {
                format!("{shop_id}-FIXED")
            }
        }

        let engine = engine().await.with_sale_numbers(Fixed);
        let product = stocked(&engine, "BOX", &[(1, 100)]).await;

        let view = engine
            .create_sale("shop-1", "cashier-1", sale(vec![line(&product.id, 1, 200)]))
            .await
            .unwrap();
        assert_eq!(view.sale.sale_number, "shop-1-FIXED");
    }

    #[tokio::test]
    async fn test_operation_timeout() {
        let mut config = EngineConfig::default();
        config.engine.operation_timeout_ms = 50;
        let engine = engine_with(config).await;
        let product = stocked(&engine, "SLOW", &[(1, 100)]).await;

        // The in-memory pool has one connection; holding it stalls begin()
        let held = engine.database().acquire().await.unwrap();
        let err = engine
            .create_sale("shop-1", "cashier-1", sale(vec![line(&product.id, 1, 200)]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(!err.is_business());
        drop(held);

        assert_eq!(stock_of(&engine, &product.id).await, Quantity::from_units(1));
    }

    #[tokio::test]
    async fn test_invalid_input_rejected_before_any_write() {
        let engine = engine().await;
        let product = stocked(&engine, "NAIL", &[(5, 10)]).await;

        let err = engine
            .create_sale("shop-1", "cashier-1", sale(vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = engine
            .create_sale("shop-1", "cashier-1", sale(vec![line(&product.id, 0, 10)]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = engine
            .create_partial_refund("shop-1", "manager", "some-sale", refund(0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_oversized_price_is_a_validation_error() {
        let engine = engine().await;
        let product = stocked(&engine, "GOLD", &[(5, 10)]).await;
        let huge = i64::MAX / 2 + 1;

        for items in [
            vec![line(&product.id, 1, huge), line(&product.id, 1, huge)],
            vec![line(&product.id, 2, huge)],
        ] {
            let err = engine
                .create_sale("shop-1", "cashier-1", sale(items))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }

        assert_eq!(stock_of(&engine, &product.id).await, Quantity::from_units(5));
        assert!(engine.recent_sales("shop-1", 10).await.unwrap().is_empty());
    }
}
