//! # Sale Repository
//!
//! Sales and sale items.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. CREATE (one transaction)                                           │
//! │     └── insert_sale() → Sale { status: Completed }                     │
//! │     └── insert_item() per line, with its FIFO cost basis               │
//! │                                                                         │
//! │  2. REVERSALS (sale stays Completed)                                   │
//! │     └── try_add_returned()  → item.returned_quantity += q              │
//! │     └── try_add_refunded()  → sale.refunded_amount   += a              │
//! │                                                                         │
//! │  3. CANCEL (terminal)                                                  │
//! │     └── try_cancel() → Sale { status: Cancelled }                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `cost_basis` is stored as a JSON array of `{quantity, unit_cost_cents,
//! layer_id?}` fragments.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};
use tally_core::{CostFragment, Money, Quantity, Sale, SaleItem};

const SALE_COLUMNS: &str = "id, shop_id, customer_id, sale_number, total_amount_cents, \
     discount_amount_cents, tax_amount_cents, final_amount_cents, refunded_amount_cents, \
     payment_method, status, notes, actor_id, created_at, updated_at, cancelled_at";

const ITEM_COLUMNS: &str = "id, sale_id, product_id, quantity, unit_price_cents, \
     discount_amount_cents, total_price_cents, returned_quantity, cost_total_cents, \
     avg_cost_cents, cost_basis, fallback_quantity, created_at";

/// Row shape of `sale_items`; `cost_basis` is still JSON text.
#[derive(Debug, sqlx::FromRow)]
struct SaleItemRow {
    id: String,
    sale_id: String,
    product_id: String,
    quantity: i64,
    unit_price_cents: i64,
    discount_amount_cents: i64,
    total_price_cents: i64,
    returned_quantity: i64,
    cost_total_cents: i64,
    avg_cost_cents: i64,
    cost_basis: String,
    fallback_quantity: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<SaleItemRow> for SaleItem {
    type Error = DbError;

    fn try_from(row: SaleItemRow) -> DbResult<Self> {
        let cost_basis: Vec<CostFragment> = serde_json::from_str(&row.cost_basis)?;

        Ok(SaleItem {
            id: row.id,
            sale_id: row.sale_id,
            product_id: row.product_id,
            quantity: row.quantity,
            unit_price_cents: row.unit_price_cents,
            discount_amount_cents: row.discount_amount_cents,
            total_price_cents: row.total_price_cents,
            returned_quantity: row.returned_quantity,
            cost_total_cents: row.cost_total_cents,
            avg_cost_cents: row.avg_cost_cents,
            cost_basis,
            fallback_quantity: row.fallback_quantity,
            created_at: row.created_at,
        })
    }
}

/// Repository for sale database operations.
pub struct SaleRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SaleRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        SaleRepository { conn }
    }

    /// Gets a sale only if it belongs to `shop_id`.
    pub async fn get_in_shop(&mut self, shop_id: &str, id: &str) -> DbResult<Option<Sale>> {
        let sql = format!("SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1 AND shop_id = ?2");
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(id)
            .bind(shop_id)
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(sale)
    }

    /// Most recent sales of a shop.
    pub async fn list_recent(&mut self, shop_id: &str, limit: u32) -> DbResult<Vec<Sale>> {
        let sql = format!(
            "SELECT {SALE_COLUMNS} FROM sales WHERE shop_id = ?1 \
             ORDER BY created_at DESC LIMIT ?2"
        );
        let sales = sqlx::query_as::<_, Sale>(&sql)
            .bind(shop_id)
            .bind(limit)
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(sales)
    }

    /// Inserts a sale header.
    ///
    /// ## Errors
    /// * `UniqueViolation` - sale number already taken
    pub async fn insert_sale(&mut self, sale: &Sale) -> DbResult<()> {
        debug!(id = %sale.id, sale_number = %sale.sale_number, "Inserting sale");

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, shop_id, customer_id, sale_number,
                total_amount_cents, discount_amount_cents, tax_amount_cents,
                final_amount_cents, refunded_amount_cents,
                payment_method, status, notes, actor_id,
                created_at, updated_at, cancelled_at
            ) VALUES (
                ?1, ?2, ?3, ?4,
                ?5, ?6, ?7,
                ?8, ?9,
                ?10, ?11, ?12, ?13,
                ?14, ?15, ?16
            )
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.shop_id)
        .bind(&sale.customer_id)
        .bind(&sale.sale_number)
        .bind(sale.total_amount_cents)
        .bind(sale.discount_amount_cents)
        .bind(sale.tax_amount_cents)
        .bind(sale.final_amount_cents)
        .bind(sale.refunded_amount_cents)
        .bind(sale.payment_method)
        .bind(sale.status)
        .bind(&sale.notes)
        .bind(&sale.actor_id)
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .bind(sale.cancelled_at)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
                field,
                value: sale.sale_number.clone(),
            },
            other => other,
        })?;

        Ok(())
    }

    /// Inserts one line. `line_no` fixes the display order.
    pub async fn insert_item(&mut self, item: &SaleItem, line_no: i64) -> DbResult<()> {
        debug!(
            sale_id = %item.sale_id,
            product_id = %item.product_id,
            cost_total_cents = item.cost_total_cents,
            "Inserting sale item"
        );

        let cost_basis = serde_json::to_string(&item.cost_basis)?;

        sqlx::query(
            r#"
            INSERT INTO sale_items (
                id, sale_id, product_id, line_no, quantity,
                unit_price_cents, discount_amount_cents, total_price_cents,
                returned_quantity, cost_total_cents, avg_cost_cents,
                cost_basis, fallback_quantity, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&item.id)
        .bind(&item.sale_id)
        .bind(&item.product_id)
        .bind(line_no)
        .bind(item.quantity)
        .bind(item.unit_price_cents)
        .bind(item.discount_amount_cents)
        .bind(item.total_price_cents)
        .bind(item.returned_quantity)
        .bind(item.cost_total_cents)
        .bind(item.avg_cost_cents)
        .bind(cost_basis)
        .bind(item.fallback_quantity)
        .bind(item.created_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// Items of a sale in line order.
    pub async fn get_items(&mut self, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM sale_items WHERE sale_id = ?1 ORDER BY line_no"
        );
        let rows = sqlx::query_as::<_, SaleItemRow>(&sql)
            .bind(sale_id)
            .fetch_all(&mut *self.conn)
            .await?;

        rows.into_iter().map(SaleItem::try_from).collect()
    }

    /// One item, only if it belongs to `sale_id`.
    pub async fn get_item(&mut self, sale_id: &str, item_id: &str) -> DbResult<Option<SaleItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM sale_items WHERE id = ?1 AND sale_id = ?2");
        let row = sqlx::query_as::<_, SaleItemRow>(&sql)
            .bind(item_id)
            .bind(sale_id)
            .fetch_optional(&mut *self.conn)
            .await?;

        row.map(SaleItem::try_from).transpose()
    }

    /// Marks a completed sale of `shop_id` as cancelled.
    ///
    /// Returns `false` when the sale is missing, in another shop, or not
    /// completed.
    pub async fn try_cancel(
        &mut self,
        sale_id: &str,
        shop_id: &str,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        debug!(sale_id = %sale_id, "Cancelling sale");

        let result = sqlx::query(
            r#"
            UPDATE sales
               SET status = 'cancelled', cancelled_at = ?3, updated_at = ?3
             WHERE id = ?1 AND shop_id = ?2 AND status = 'completed'
            "#,
        )
        .bind(sale_id)
        .bind(shop_id)
        .bind(at)
        .execute(&mut *self.conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Adds `qty` to an item's returned quantity.
    ///
    /// Matches only when the item belongs to a completed sale of `shop_id`
    /// and the new total stays within the sold quantity.
    pub async fn try_add_returned(
        &mut self,
        shop_id: &str,
        sale_id: &str,
        item_id: &str,
        qty: Quantity,
    ) -> DbResult<bool> {
        debug!(sale_id = %sale_id, item_id = %item_id, qty = %qty, "Recording returned quantity");

        let result = sqlx::query(
            r#"
            UPDATE sale_items
               SET returned_quantity = returned_quantity + ?3
             WHERE id = ?1 AND sale_id = ?2
               AND returned_quantity + ?3 <= quantity
               AND EXISTS (
                   SELECT 1 FROM sales s
                    WHERE s.id = ?2 AND s.shop_id = ?4 AND s.status = 'completed'
               )
            "#,
        )
        .bind(item_id)
        .bind(sale_id)
        .bind(qty.milli())
        .bind(shop_id)
        .execute(&mut *self.conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Adds `amount` to a completed sale's refunded amount.
    ///
    /// Matches only when the new total stays within the final amount.
    pub async fn try_add_refunded(
        &mut self,
        shop_id: &str,
        sale_id: &str,
        amount: Money,
    ) -> DbResult<bool> {
        debug!(sale_id = %sale_id, amount = %amount, "Recording refunded amount");

        let result = sqlx::query(
            r#"
            UPDATE sales
               SET refunded_amount_cents = refunded_amount_cents + ?3,
                   updated_at = ?4
             WHERE id = ?1 AND shop_id = ?2 AND status = 'completed'
               AND refunded_amount_cents + ?3 <= final_amount_cents
            "#,
        )
        .bind(sale_id)
        .bind(shop_id)
        .bind(amount.cents())
        .bind(Utc::now())
        .execute(&mut *self.conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
