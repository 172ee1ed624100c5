//! # Customer Credit Ledger
//!
//! Outstanding balances of customers who buy on credit.
//!
//! ```text
//!   credit sale ──► charge(final_amount)   balance += amount
//!   cancel      ──► release(final_amount)  balance -= amount (floor 0)
//!   payment     ──► settle(amount)         balance -= amount (≤ balance)
//! ```
//!
//! The credit limit is soft unless `enforce_credit_limit` is set: an
//! over-limit charge is then refused with `CreditLimitExceeded` instead of
//! only being logged.

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{info, warn};
use uuid::Uuid;

use tally_core::validation::{validate_id, validate_new_customer, validate_positive_amount};
use tally_core::{CoreError, Customer, Money, NewCustomer, ValidationError};
use tally_db::{BalanceChange, CustomerRepository, Database, DbError};

use crate::error::EngineResult;

pub(crate) async fn load_customer(
    conn: &mut SqliteConnection,
    shop_id: &str,
    customer_id: &str,
) -> EngineResult<Customer> {
    CustomerRepository::new(conn)
        .get_in_shop(shop_id, customer_id)
        .await?
        .ok_or_else(|| CoreError::CustomerNotFound(customer_id.to_string()).into())
}

/// Customer credit ledger.
#[derive(Debug, Clone)]
pub struct CustomerCreditLedger {
    db: Database,
    enforce_limit: bool,
}

impl CustomerCreditLedger {
    pub fn new(db: Database, enforce_limit: bool) -> Self {
        CustomerCreditLedger { db, enforce_limit }
    }

    pub async fn create_customer(
        &self,
        shop_id: &str,
        input: NewCustomer,
    ) -> EngineResult<Customer> {
        validate_id("shop_id", shop_id)?;
        validate_new_customer(&input)?;

        let now = Utc::now();
        let customer = Customer {
            id: Uuid::new_v4().to_string(),
            shop_id: shop_id.to_string(),
            name: input.name.trim().to_string(),
            phone: input.phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
            credit_balance_cents: 0,
            credit_limit_cents: input.credit_limit.map(|m| m.cents()),
            created_at: now,
            updated_at: now,
        };

        let mut conn = self.db.acquire().await?;
        CustomerRepository::new(&mut conn).insert(&customer).await?;

        info!(customer_id = %customer.id, shop_id = %shop_id, "Customer created");
        Ok(customer)
    }

    pub async fn get_customer(&self, shop_id: &str, customer_id: &str) -> EngineResult<Customer> {
        let mut conn = self.db.acquire().await?;
        load_customer(&mut conn, shop_id, customer_id).await
    }

    /// Adds a credit sale to the balance, on the caller's transaction.
    ///
    /// Returns the new balance.
    ///
    /// ## Errors
    /// * `CustomerNotFound` - unknown customer, or one of another shop
    /// * `CreditLimitExceeded` - limit enforced and the charge would pass it
    pub async fn charge(
        &self,
        conn: &mut SqliteConnection,
        shop_id: &str,
        customer_id: &str,
        amount: Money,
    ) -> EngineResult<Money> {
        let charged = CustomerRepository::new(conn)
            .try_charge(shop_id, customer_id, amount, self.enforce_limit)
            .await?;

        let balance = match charged {
            Some(balance) => balance,
            None => {
                let customer = load_customer(conn, shop_id, customer_id).await?;
                return Err(CoreError::CreditLimitExceeded {
                    customer_id: customer_id.to_string(),
                    limit: customer
                        .credit_limit()
                        .map(|l| l.to_string())
                        .unwrap_or_default(),
                    attempted: (customer.credit_balance() + amount).to_string(),
                }
                .into());
            }
        };

        if !self.enforce_limit {
            let customer = load_customer(conn, shop_id, customer_id).await?;
            if let Some(limit) = customer.credit_limit() {
                if balance > limit {
                    warn!(
                        customer_id = %customer_id,
                        balance = %balance,
                        limit = %limit,
                        "Credit balance above limit"
                    );
                }
            }
        }

        Ok(balance)
    }

    /// Takes a reversed credit sale off the balance, never below zero.
    pub async fn release(
        &self,
        conn: &mut SqliteConnection,
        shop_id: &str,
        customer_id: &str,
        amount: Money,
    ) -> EngineResult<BalanceChange> {
        let change = match CustomerRepository::new(conn)
            .release(shop_id, customer_id, amount)
            .await
        {
            Ok(change) => change,
            Err(DbError::NotFound { .. }) => {
                return Err(CoreError::CustomerNotFound(customer_id.to_string()).into())
            }
            Err(e) => return Err(e.into()),
        };

        if change.was_clamped(amount) {
            warn!(
                customer_id = %customer_id,
                previous = %change.previous,
                requested = %amount,
                "Credit release exceeded balance, clamped at zero"
            );
        }

        Ok(change)
    }

    /// Records a customer payment against the balance.
    ///
    /// ## Errors
    /// * `Validation` - non-positive amount, or more than the balance owed
    pub async fn settle(
        &self,
        shop_id: &str,
        actor_id: &str,
        customer_id: &str,
        amount: Money,
    ) -> EngineResult<Customer> {
        validate_id("shop_id", shop_id)?;
        validate_id("actor_id", actor_id)?;
        validate_positive_amount("amount", amount)?;

        let mut tx = self.db.begin().await?;

        let settled = CustomerRepository::new(&mut tx)
            .try_settle(shop_id, customer_id, amount)
            .await?;
        if settled.is_none() {
            let customer = load_customer(&mut tx, shop_id, customer_id).await?;
            return Err(ValidationError::OutOfRange {
                field: "amount".to_string(),
                min: 1,
                max: customer.credit_balance().cents(),
            }
            .into());
        }

        let customer = load_customer(&mut tx, shop_id, customer_id).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            customer_id = %customer_id,
            actor_id = %actor_id,
            amount = %amount,
            balance = %customer.credit_balance(),
            "Credit settled"
        );
        Ok(customer)
    }
}
