//! # Customer Repository
//!
//! Customers and their credit balances.
//!
//! ## Balance Writes
//! ```text
//! try_charge   balance += a   only if within limit (when enforced)
//! release      balance  = MAX(0, balance − a)
//! try_settle   balance −= a   only if balance ≥ a
//! ```

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};
use tally_core::{Customer, Money};

const CUSTOMER_COLUMNS: &str = "id, shop_id, name, phone, credit_balance_cents, \
     credit_limit_cents, created_at, updated_at";

/// Credit balance before and after one write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    pub previous: Money,
    pub new: Money,
}

impl BalanceChange {
    /// True when a release asked for more than was owed.
    pub fn was_clamped(&self, requested: Money) -> bool {
        self.previous - requested < self.new
    }
}

/// Repository for customer database operations.
pub struct CustomerRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> CustomerRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        CustomerRepository { conn }
    }

    pub async fn get_by_id(&mut self, id: &str) -> DbResult<Option<Customer>> {
        let sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ?1");
        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(customer)
    }

    pub async fn get_in_shop(&mut self, shop_id: &str, id: &str) -> DbResult<Option<Customer>> {
        let sql =
            format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ?1 AND shop_id = ?2");
        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(id)
            .bind(shop_id)
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(customer)
    }

    pub async fn insert(&mut self, customer: &Customer) -> DbResult<()> {
        debug!(id = %customer.id, name = %customer.name, "Inserting customer");

        sqlx::query(
            r#"
            INSERT INTO customers (
                id, shop_id, name, phone, credit_balance_cents,
                credit_limit_cents, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&customer.id)
        .bind(&customer.shop_id)
        .bind(&customer.name)
        .bind(&customer.phone)
        .bind(customer.credit_balance_cents)
        .bind(customer.credit_limit_cents)
        .bind(customer.created_at)
        .bind(customer.updated_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// Adds `amount` to the balance of a customer in `shop_id`.
    ///
    /// With `enforce_limit`, matches only when the new balance stays within
    /// the customer's limit (no limit always matches). Returns the new balance.
    pub async fn try_charge(
        &mut self,
        shop_id: &str,
        id: &str,
        amount: Money,
        enforce_limit: bool,
    ) -> DbResult<Option<Money>> {
        debug!(id = %id, amount = %amount, enforce_limit, "Charging customer credit");

        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE customers
               SET credit_balance_cents = credit_balance_cents + ?3,
                   updated_at = ?5
             WHERE id = ?1 AND shop_id = ?2
               AND (?4 = 0
                    OR credit_limit_cents IS NULL
                    OR credit_balance_cents + ?3 <= credit_limit_cents)
            RETURNING credit_balance_cents
            "#,
        )
        .bind(id)
        .bind(shop_id)
        .bind(amount.cents())
        .bind(enforce_limit)
        .bind(Utc::now())
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(balance.map(Money::from_cents))
    }

    /// Subtracts `amount` from the balance, never going below zero.
    ///
    /// ## Errors
    /// * `NotFound` - no such customer in `shop_id`
    pub async fn release(
        &mut self,
        shop_id: &str,
        id: &str,
        amount: Money,
    ) -> DbResult<BalanceChange> {
        debug!(id = %id, amount = %amount, "Releasing customer credit");

        let previous: Option<i64> = sqlx::query_scalar(
            "SELECT credit_balance_cents FROM customers WHERE id = ?1 AND shop_id = ?2",
        )
        .bind(id)
        .bind(shop_id)
        .fetch_optional(&mut *self.conn)
        .await?;
        let previous = previous.ok_or_else(|| DbError::not_found("Customer", id))?;

        let new: i64 = sqlx::query_scalar(
            r#"
            UPDATE customers
               SET credit_balance_cents = MAX(0, credit_balance_cents - ?2),
                   updated_at = ?3
             WHERE id = ?1
            RETURNING credit_balance_cents
            "#,
        )
        .bind(id)
        .bind(amount.cents())
        .bind(Utc::now())
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(BalanceChange {
            previous: Money::from_cents(previous),
            new: Money::from_cents(new),
        })
    }

    /// Subtracts a payment from the balance if the balance covers it.
    pub async fn try_settle(
        &mut self,
        shop_id: &str,
        id: &str,
        amount: Money,
    ) -> DbResult<Option<Money>> {
        debug!(id = %id, amount = %amount, "Settling customer credit");

        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE customers
               SET credit_balance_cents = credit_balance_cents - ?3,
                   updated_at = ?4
             WHERE id = ?1 AND shop_id = ?2 AND credit_balance_cents >= ?3
            RETURNING credit_balance_cents
            "#,
        )
        .bind(id)
        .bind(shop_id)
        .bind(amount.cents())
        .bind(Utc::now())
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(balance.map(Money::from_cents))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures;
    use uuid::Uuid;

    fn customer(limit: Option<i64>) -> Customer {
        let now = Utc::now();
        Customer {
            id: Uuid::new_v4().to_string(),
            shop_id: "shop-1".to_string(),
            name: "Amina".to_string(),
            phone: Some("+255700000000".to_string()),
            credit_balance_cents: 0,
            credit_limit_cents: limit,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_charge_respects_enforced_limit() {
        let db = fixtures::database().await;
        let mut conn = db.acquire().await.unwrap();
        let mut repo = CustomerRepository::new(&mut conn);
        let c = customer(Some(5_000));
        repo.insert(&c).await.unwrap();

        let m = Money::from_cents;
        assert_eq!(repo.try_charge("shop-1", &c.id, m(4_000), true).await.unwrap(), Some(m(4_000)));
        assert_eq!(repo.try_charge("shop-1", &c.id, m(1_001), true).await.unwrap(), None);
        // Soft limit: allowed past the limit
        assert_eq!(
            repo.try_charge("shop-1", &c.id, m(1_001), false).await.unwrap(),
            Some(m(5_001))
        );
        assert_eq!(repo.try_charge("shop-2", &c.id, m(1), false).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_release_clamps_at_zero() {
        let db = fixtures::database().await;
        let mut conn = db.acquire().await.unwrap();
        let mut repo = CustomerRepository::new(&mut conn);
        let c = customer(None);
        repo.insert(&c).await.unwrap();

        let m = Money::from_cents;
        repo.try_charge("shop-1", &c.id, m(300), false).await.unwrap();

        let change = repo.release("shop-1", &c.id, m(500)).await.unwrap();
        assert_eq!(change.previous, m(300));
        assert_eq!(change.new, Money::zero());
        assert!(change.was_clamped(m(500)));

        let err = repo.release("shop-2", &c.id, m(1)).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_settle_cannot_overpay() {
        let db = fixtures::database().await;
        let mut conn = db.acquire().await.unwrap();
        let mut repo = CustomerRepository::new(&mut conn);
        let c = customer(None);
        repo.insert(&c).await.unwrap();

        let m = Money::from_cents;
        repo.try_charge("shop-1", &c.id, m(1_000), false).await.unwrap();
        assert_eq!(repo.try_settle("shop-1", &c.id, m(1_001)).await.unwrap(), None);
        assert_eq!(repo.try_settle("shop-1", &c.id, m(400)).await.unwrap(), Some(m(600)));

        let reloaded = repo.get_in_shop("shop-1", &c.id).await.unwrap().unwrap();
        assert_eq!(reloaded.credit_balance(), m(600));
    }
}
