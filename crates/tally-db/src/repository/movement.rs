//! # Stock Movement Repository
//!
//! Append-only log of stock quantity changes. There is no update or delete.
//!
//! Each row gets a strictly increasing `seq` on insert; history pages walk
//! `seq` downwards so newer rows never shift an in-progress read.

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use tally_core::{NewStockMovement, StockMovement};

const MOVEMENT_COLUMNS: &str = "seq, id, product_id, shop_id, action, quantity_delta, \
     previous_quantity, new_quantity, actor_id, notes, created_at";

/// Repository for stock movement database operations.
pub struct MovementRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> MovementRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        MovementRepository { conn }
    }

    /// Appends a movement and returns the stored row.
    pub async fn insert(&mut self, movement: &NewStockMovement) -> DbResult<StockMovement> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        debug!(
            id = %id,
            product_id = %movement.product_id,
            action = movement.action.as_str(),
            delta = %movement.quantity_delta,
            "Recording stock movement"
        );

        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO stock_movements (
                id, product_id, shop_id, action, quantity_delta,
                previous_quantity, new_quantity, actor_id, notes, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            RETURNING seq
            "#,
        )
        .bind(&id)
        .bind(&movement.product_id)
        .bind(&movement.shop_id)
        .bind(movement.action)
        .bind(movement.quantity_delta.milli())
        .bind(movement.previous_quantity.milli())
        .bind(movement.new_quantity.milli())
        .bind(&movement.actor_id)
        .bind(&movement.notes)
        .bind(now)
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(StockMovement {
            seq,
            id,
            product_id: movement.product_id.clone(),
            shop_id: movement.shop_id.clone(),
            action: movement.action,
            quantity_delta: movement.quantity_delta.milli(),
            previous_quantity: movement.previous_quantity.milli(),
            new_quantity: movement.new_quantity.milli(),
            actor_id: movement.actor_id.clone(),
            notes: movement.notes.clone(),
            created_at: now,
        })
    }

    /// One page of a product's history, newest first.
    ///
    /// `before_seq` is the `seq` of the last row of the previous page, or
    /// `None` for the first page.
    pub async fn page(
        &mut self,
        product_id: &str,
        before_seq: Option<i64>,
        limit: u32,
    ) -> DbResult<Vec<StockMovement>> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE product_id = ?1 AND seq < ?2 \
             ORDER BY seq DESC LIMIT ?3"
        );
        let rows = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(product_id)
            .bind(before_seq.unwrap_or(i64::MAX))
            .bind(limit)
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(rows)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
