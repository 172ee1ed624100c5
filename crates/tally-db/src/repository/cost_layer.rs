//! # Cost Layer Repository
//!
//! FIFO cost layers. Rows are inserted and drained, never deleted.
//!
//! ## FIFO Order
//! `received_at`, then `created_at`, then insertion order (`rowid`). The
//! partial index `idx_cost_layers_fifo` covers the open-layer scan.

use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};
use tally_core::{CostLayer, Quantity};

const LAYER_COLUMNS: &str = "id, product_id, shop_id, unit_cost_cents, initial_quantity, \
     remaining_quantity, source_type, source_id, received_at, created_at";

/// Repository for cost layer database operations.
pub struct CostLayerRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> CostLayerRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        CostLayerRepository { conn }
    }

    /// Inserts a new layer.
    pub async fn insert(&mut self, layer: &CostLayer) -> DbResult<()> {
        debug!(
            id = %layer.id,
            product_id = %layer.product_id,
            source = layer.source_type.as_str(),
            quantity = layer.initial_quantity,
            unit_cost_cents = layer.unit_cost_cents,
            "Inserting cost layer"
        );

        sqlx::query(
            r#"
            INSERT INTO stock_cost_layers (
                id, product_id, shop_id, unit_cost_cents,
                initial_quantity, remaining_quantity,
                source_type, source_id, received_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&layer.id)
        .bind(&layer.product_id)
        .bind(&layer.shop_id)
        .bind(layer.unit_cost_cents)
        .bind(layer.initial_quantity)
        .bind(layer.remaining_quantity)
        .bind(layer.source_type)
        .bind(&layer.source_id)
        .bind(layer.received_at)
        .bind(layer.created_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// Layers with stock remaining, oldest first.
    pub async fn open_layers(&mut self, product_id: &str) -> DbResult<Vec<CostLayer>> {
        let sql = format!(
            "SELECT {LAYER_COLUMNS} FROM stock_cost_layers \
             WHERE product_id = ?1 AND remaining_quantity > 0 \
             ORDER BY received_at, created_at, rowid"
        );
        let layers = sqlx::query_as::<_, CostLayer>(&sql)
            .bind(product_id)
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(layers)
    }

    /// Every layer of a product including drained ones, oldest first.
    pub async fn all_layers(&mut self, product_id: &str) -> DbResult<Vec<CostLayer>> {
        let sql = format!(
            "SELECT {LAYER_COLUMNS} FROM stock_cost_layers \
             WHERE product_id = ?1 \
             ORDER BY received_at, created_at, rowid"
        );
        let layers = sqlx::query_as::<_, CostLayer>(&sql)
            .bind(product_id)
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(layers)
    }

    /// Takes `qty` out of one layer.
    ///
    /// ## Errors
    /// * `Conflict` - the layer no longer holds `qty`
    pub async fn draw(&mut self, layer_id: &str, qty: Quantity) -> DbResult<()> {
        debug!(layer_id = %layer_id, qty = %qty, "Drawing from cost layer");

        let result = sqlx::query(
            r#"
            UPDATE stock_cost_layers
               SET remaining_quantity = remaining_quantity - ?2
             WHERE id = ?1 AND remaining_quantity >= ?2
            "#,
        )
        .bind(layer_id)
        .bind(qty.milli())
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::conflict("CostLayer", layer_id));
        }

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
