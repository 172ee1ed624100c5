//! # Product Repository
//!
//! Products and their stock counters.
//!
//! ## Stock Counter Writes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  try_decrement_stock(id, shop, qty)                                     │
//! │                                                                         │
//! │  UPDATE products                                                        │
//! │     SET stock_quantity = stock_quantity - qty, version = version + 1    │
//! │   WHERE id = ? AND shop_id = ? AND stock_quantity >= qty                │
//! │  RETURNING stock_quantity                                               │
//! │                                                                         │
//! │  one row  → Some(StockChange { previous, new })                         │
//! │  no row   → None (missing, wrong shop, or not enough stock)             │
//! │                                                                         │
//! │  Two sales racing for the last unit: the second UPDATE runs after the  │
//! │  first commits and matches nothing.                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};
use tally_core::{Product, Quantity};

const PRODUCT_COLUMNS: &str = "id, shop_id, sku, name, stock_quantity, cost_price_cents, \
     selling_price_cents, version, created_at, updated_at";

/// Stock level before and after one counter write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockChange {
    pub previous: Quantity,
    pub new: Quantity,
}

impl StockChange {
    fn from_new(new_milli: i64, delta: Quantity) -> Self {
        let new = Quantity::from_milli(new_milli);
        StockChange {
            previous: new - delta,
            new,
        }
    }
}

/// Repository for product database operations.
pub struct ProductRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> ProductRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        ProductRepository { conn }
    }

    /// Gets a product by ID regardless of shop.
    pub async fn get_by_id(&mut self, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(product)
    }

    /// Gets a product only if it belongs to `shop_id`.
    pub async fn get_in_shop(&mut self, shop_id: &str, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1 AND shop_id = ?2");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .bind(shop_id)
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(product)
    }

    /// Lists a shop's products ordered by SKU.
    pub async fn list_by_shop(&mut self, shop_id: &str, limit: u32) -> DbResult<Vec<Product>> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE shop_id = ?1 ORDER BY sku LIMIT ?2"
        );
        let products = sqlx::query_as::<_, Product>(&sql)
            .bind(shop_id)
            .bind(limit)
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(products)
    }

    /// Inserts a new product.
    ///
    /// ## Errors
    /// * `UniqueViolation` - SKU already used in this shop
    pub async fn insert(&mut self, product: &Product) -> DbResult<()> {
        debug!(id = %product.id, sku = %product.sku, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, shop_id, sku, name, stock_quantity,
                cost_price_cents, selling_price_cents, version,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&product.id)
        .bind(&product.shop_id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.stock_quantity)
        .bind(product.cost_price_cents)
        .bind(product.selling_price_cents)
        .bind(product.version)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
                field,
                value: product.sku.clone(),
            },
            other => other,
        })?;

        Ok(())
    }

    /// Removes `qty` from stock if the product is in `shop_id` and has enough.
    pub async fn try_decrement_stock(
        &mut self,
        id: &str,
        shop_id: &str,
        qty: Quantity,
    ) -> DbResult<Option<StockChange>> {
        debug!(id = %id, qty = %qty, "Decrementing stock");

        let new_stock: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products
               SET stock_quantity = stock_quantity - ?3,
                   version = version + 1,
                   updated_at = ?4
             WHERE id = ?1 AND shop_id = ?2 AND stock_quantity >= ?3
            RETURNING stock_quantity
            "#,
        )
        .bind(id)
        .bind(shop_id)
        .bind(qty.milli())
        .bind(Utc::now())
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(new_stock.map(|n| StockChange::from_new(n, -qty)))
    }

    /// Adds `qty` to stock.
    ///
    /// ## Errors
    /// * `NotFound` - no such product in `shop_id`
    pub async fn increment_stock(
        &mut self,
        id: &str,
        shop_id: &str,
        qty: Quantity,
    ) -> DbResult<StockChange> {
        debug!(id = %id, qty = %qty, "Incrementing stock");

        let new_stock: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products
               SET stock_quantity = stock_quantity + ?3,
                   version = version + 1,
                   updated_at = ?4
             WHERE id = ?1 AND shop_id = ?2
            RETURNING stock_quantity
            "#,
        )
        .bind(id)
        .bind(shop_id)
        .bind(qty.milli())
        .bind(Utc::now())
        .fetch_optional(&mut *self.conn)
        .await?;

        new_stock
            .map(|n| StockChange::from_new(n, qty))
            .ok_or_else(|| DbError::not_found("Product", id))
    }

    /// Counts a shop's products.
    pub async fn count(&mut self, shop_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE shop_id = ?1")
            .bind(shop_id)
            .fetch_one(&mut *self.conn)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures;

    #[tokio::test]
    async fn test_insert_and_scope_by_shop() {
        let db = fixtures::database().await;
        let mut conn = db.acquire().await.unwrap();
        let mut repo = ProductRepository::new(&mut conn);

        let product = fixtures::product("shop-1", "RICE-5KG", 10, 1200);
        repo.insert(&product).await.unwrap();

        let found = repo.get_in_shop("shop-1", &product.id).await.unwrap();
        assert_eq!(found.unwrap().stock(), Quantity::from_units(10));

        assert!(repo.get_in_shop("shop-2", &product.id).await.unwrap().is_none());
        assert!(repo.get_by_id(&product.id).await.unwrap().is_some());
        assert_eq!(repo.count("shop-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_sku_in_shop() {
        let db = fixtures::database().await;
        let mut conn = db.acquire().await.unwrap();
        let mut repo = ProductRepository::new(&mut conn);

        repo.insert(&fixtures::product("shop-1", "SUGAR", 1, 100))
            .await
            .unwrap();
        let err = repo
            .insert(&fixtures::product("shop-1", "SUGAR", 1, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { value, .. } if value == "SUGAR"));

        // Same SKU in another shop is fine
        repo.insert(&fixtures::product("shop-2", "SUGAR", 1, 100))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_guarded_decrement() {
        let db = fixtures::database().await;
        let mut conn = db.acquire().await.unwrap();
        let mut repo = ProductRepository::new(&mut conn);

        let product = fixtures::product("shop-1", "OIL", 3, 500);
        repo.insert(&product).await.unwrap();

        let change = repo
            .try_decrement_stock(&product.id, "shop-1", Quantity::from_units(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.previous, Quantity::from_units(3));
        assert_eq!(change.new, Quantity::from_units(1));

        // Not enough left
        assert!(repo
            .try_decrement_stock(&product.id, "shop-1", Quantity::from_units(2))
            .await
            .unwrap()
            .is_none());

        // Wrong shop
        assert!(repo
            .try_decrement_stock(&product.id, "shop-2", Quantity::from_units(1))
            .await
            .unwrap()
            .is_none());

        let reloaded = repo.get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(reloaded.stock(), Quantity::from_units(1));
        assert_eq!(reloaded.version, 1);
    }

    #[tokio::test]
    async fn test_increment_missing_product() {
        let db = fixtures::database().await;
        let mut conn = db.acquire().await.unwrap();
        let mut repo = ProductRepository::new(&mut conn);

        let err = repo
            .increment_stock("nope", "shop-1", Quantity::from_units(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
