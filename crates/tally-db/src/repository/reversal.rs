//! # Reversal Repository
//!
//! Append-only records of partial item returns and monetary refunds.

use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::DbResult;
use tally_core::{SaleRefund, SaleReturn};

/// Repository for sale return and refund records.
pub struct ReversalRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> ReversalRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        ReversalRepository { conn }
    }

    pub async fn insert_return(&mut self, record: &SaleReturn) -> DbResult<()> {
        debug!(id = %record.id, sale_id = %record.sale_id, "Inserting sale return");

        sqlx::query(
            r#"
            INSERT INTO sale_returns (
                id, sale_id, sale_item_id, product_id, quantity,
                amount_cents, reason, actor_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&record.id)
        .bind(&record.sale_id)
        .bind(&record.sale_item_id)
        .bind(&record.product_id)
        .bind(record.quantity)
        .bind(record.amount_cents)
        .bind(&record.reason)
        .bind(&record.actor_id)
        .bind(record.created_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    pub async fn insert_refund(&mut self, record: &SaleRefund) -> DbResult<()> {
        debug!(id = %record.id, sale_id = %record.sale_id, "Inserting sale refund");

        sqlx::query(
            r#"
            INSERT INTO sale_refunds (
                id, sale_id, amount_cents, affects_stock, reason, actor_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&record.id)
        .bind(&record.sale_id)
        .bind(record.amount_cents)
        .bind(record.affects_stock)
        .bind(&record.reason)
        .bind(&record.actor_id)
        .bind(record.created_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// Returns recorded against a sale, oldest first.
    pub async fn list_returns(&mut self, sale_id: &str) -> DbResult<Vec<SaleReturn>> {
        let rows = sqlx::query_as::<_, SaleReturn>(
            r#"
            SELECT id, sale_id, sale_item_id, product_id, quantity,
                   amount_cents, reason, actor_id, created_at
              FROM sale_returns
             WHERE sale_id = ?1
             ORDER BY created_at, rowid
            "#,
        )
        .bind(sale_id)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(rows)
    }

    /// Refunds recorded against a sale, oldest first.
    pub async fn list_refunds(&mut self, sale_id: &str) -> DbResult<Vec<SaleRefund>> {
        let rows = sqlx::query_as::<_, SaleRefund>(
            r#"
            SELECT id, sale_id, amount_cents, affects_stock, reason, actor_id, created_at
              FROM sale_refunds
             WHERE sale_id = ?1
             ORDER BY created_at, rowid
            "#,
        )
        .bind(sale_id)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(rows)
    }
}
