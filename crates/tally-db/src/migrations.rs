//! # Schema Migrations
//!
//! The schema ships inside the binary via `sqlx::migrate!` and is applied
//! by [`Database::new`](crate::Database::new) unless
//! `DbConfig::run_migrations(false)` is set.
//!
//! | File                     | Tables                                            |
//! |--------------------------|---------------------------------------------------|
//! | `001_initial_schema.sql` | products, customers, stock_cost_layers,           |
//! |                          | stock_movements, sales, sale_items, sale_returns, |
//! |                          | sale_refunds                                      |
//!
//! Applied files are checksummed in `_sqlx_migrations`; schema changes go
//! in a new `NNN_*.sql` file.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applies whatever embedded migrations the database has not seen yet.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    MIGRATOR.run(pool).await?;
    info!(known = MIGRATOR.migrations.len(), "Schema up to date");
    Ok(())
}

/// `(embedded, applied)` migration counts.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .unwrap_or(0);

    Ok((total, applied as usize))
}
