//! # Sale Numbers
//!
//! Human-readable display numbers for sales.
//!
//! Numbers come from an injected [`SaleNumberGenerator`]; a sale request
//! that already carries a number uses it as-is. Uniqueness is finally
//! enforced by the `sales.sale_number` UNIQUE constraint.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Produces sale display numbers.
pub trait SaleNumberGenerator: Send + Sync {
    fn next_number(&self, shop_id: &str, at: DateTime<Utc>) -> String;
}

/// `<PREFIX>-YYYYMMDD-XXXXXXXX`, the suffix being 8 random hex digits.
///
/// ```rust
/// use chrono::Utc;
/// use tally_engine::numbering::{PrefixedSaleNumbers, SaleNumberGenerator};
///
/// let number = PrefixedSaleNumbers::new("SALE").next_number("shop-1", Utc::now());
/// assert!(number.starts_with("SALE-"));
/// assert_eq!(number.len(), "SALE-20240101-ABCDEF12".len());
/// ```
#[derive(Debug, Clone)]
pub struct PrefixedSaleNumbers {
    prefix: String,
}

impl PrefixedSaleNumbers {
    pub fn new(prefix: impl Into<String>) -> Self {
        PrefixedSaleNumbers {
            prefix: prefix.into().trim().to_uppercase(),
        }
    }
}

impl SaleNumberGenerator for PrefixedSaleNumbers {
    fn next_number(&self, _shop_id: &str, at: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
        format!("{}-{}-{}", self.prefix, at.format("%Y%m%d"), suffix)
    }
}
