//! # FIFO Costing
//!
//! Pure planning of cost-of-goods consumption over a product's cost layers.
//!
//! ## How a Plan Is Built
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Layers (oldest first)          Need 8                                  │
//! │                                                                         │
//! │  L1: 5 @ 10.00   ── take 5 ──►  basis [{5, 10.00}]                      │
//! │  L2: 10 @ 12.00  ── take 3 ──►  basis [{5, 10.00}, {3, 12.00}]          │
//! │                                                                         │
//! │  cost_total = 5×10 + 3×12 = 86.00                                       │
//! │  avg_cost   = 86.00 / 8   = 10.75                                       │
//! │                                                                         │
//! │  Layers exhausted early? The shortfall becomes a fallback fragment      │
//! │  at the product's cost_price (layer_id = None).                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The database layer applies a plan's [`LayerDraw`]s; nothing here mutates
//! storage.

use crate::money::Money;
use crate::quantity::Quantity;
use crate::types::{CostFragment, CostLayer};

/// The open balance of one cost layer, as seen by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerBalance {
    pub layer_id: String,
    pub unit_cost: Money,
    pub remaining: Quantity,
}

impl LayerBalance {
    pub fn new(layer_id: impl Into<String>, unit_cost: Money, remaining: Quantity) -> Self {
        LayerBalance {
            layer_id: layer_id.into(),
            unit_cost,
            remaining,
        }
    }
}

impl From<&CostLayer> for LayerBalance {
    fn from(layer: &CostLayer) -> Self {
        LayerBalance::new(layer.id.clone(), layer.unit_cost(), layer.remaining())
    }
}

/// Quantity to take out of one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDraw {
    pub layer_id: String,
    pub quantity: Quantity,
    pub unit_cost: Money,
}

/// Result of planning a FIFO consumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FifoPlan {
    /// Draws to apply, oldest layer first.
    pub draws: Vec<LayerDraw>,
    /// Quantity costed at the fallback unit cost.
    pub fallback_quantity: Quantity,
    pub cost_total: Money,
    pub avg_cost: Money,
    pub basis: Vec<CostFragment>,
}

impl FifoPlan {
    /// True when any part of the requirement was not covered by layers.
    pub fn used_fallback(&self) -> bool {
        self.fallback_quantity.is_positive()
    }
}

/// Plans consuming `needed` from `layers`, which must already be in FIFO order.
///
/// Layers with nothing remaining are skipped. Whatever the layers cannot
/// cover is costed at `fallback_unit_cost`.
pub fn plan_fifo(layers: &[LayerBalance], needed: Quantity, fallback_unit_cost: Money) -> FifoPlan {
    let mut still_needed = needed;
    let mut draws = Vec::new();
    let mut basis = Vec::new();

    for layer in layers {
        if !still_needed.is_positive() {
            break;
        }
        if !layer.remaining.is_positive() {
            continue;
        }

        let take = layer.remaining.min(still_needed);
        draws.push(LayerDraw {
            layer_id: layer.layer_id.clone(),
            quantity: take,
            unit_cost: layer.unit_cost,
        });
        basis.push(CostFragment {
            quantity: take.milli(),
            unit_cost_cents: layer.unit_cost.cents(),
            layer_id: Some(layer.layer_id.clone()),
        });
        still_needed -= take;
    }

    let fallback_quantity = still_needed.max(Quantity::zero());
    if fallback_quantity.is_positive() {
        basis.push(CostFragment {
            quantity: fallback_quantity.milli(),
            unit_cost_cents: fallback_unit_cost.cents(),
            layer_id: None,
        });
    }

    let cost_total = extended_cost(&basis);
    FifoPlan {
        draws,
        fallback_quantity,
        cost_total,
        avg_cost: cost_total.per_unit(needed),
        basis,
    }
}

/// Plan used when the layers cannot be read at all: everything at cost price.
pub fn fallback_plan(needed: Quantity, cost_price: Money) -> FifoPlan {
    plan_fifo(&[], needed, cost_price)
}

/// Σ quantity × unit_cost over a basis, rounded once to cents.
pub fn extended_cost(basis: &[CostFragment]) -> Money {
    let scaled: i128 = basis
        .iter()
        .map(|f| f.quantity as i128 * f.unit_cost_cents as i128)
        .sum();
    Money::from_scaled(scaled)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn units(n: i64) -> Quantity {
        Quantity::from_units(n)
    }

    fn cents(n: i64) -> Money {
        Money::from_cents(n)
    }

    #[test]
    fn test_fifo_takes_oldest_first() {
        let layers = vec![
            LayerBalance::new("l1", cents(1000), units(5)),
            LayerBalance::new("l2", cents(1200), units(10)),
        ];

        let plan = plan_fifo(&layers, units(8), cents(999));

        assert_eq!(plan.cost_total, cents(8600));
        assert_eq!(plan.avg_cost, cents(1075));
        assert_eq!(plan.basis.len(), 2);
        assert_eq!(plan.basis[0].quantity(), units(5));
        assert_eq!(plan.basis[0].unit_cost(), cents(1000));
        assert_eq!(plan.basis[1].quantity(), units(3));
        assert_eq!(plan.basis[1].unit_cost(), cents(1200));
        assert!(!plan.used_fallback());

        assert_eq!(plan.draws[0].layer_id, "l1");
        assert_eq!(plan.draws[0].quantity, units(5));
        assert_eq!(plan.draws[1].layer_id, "l2");
        assert_eq!(plan.draws[1].quantity, units(3));
    }

    #[test]
    fn test_fifo_skips_drained_layers() {
        let layers = vec![
            LayerBalance::new("empty", cents(500), Quantity::zero()),
            LayerBalance::new("l2", cents(1200), units(10)),
        ];

        let plan = plan_fifo(&layers, units(2), cents(999));

        assert_eq!(plan.draws.len(), 1);
        assert_eq!(plan.draws[0].layer_id, "l2");
        assert_eq!(plan.cost_total, cents(2400));
    }

    #[test]
    fn test_shortfall_costed_at_fallback() {
        let layers = vec![LayerBalance::new("l1", cents(1000), units(2))];

        let plan = plan_fifo(&layers, units(5), cents(800));

        // 2 × 10.00 + 3 × 8.00
        assert_eq!(plan.cost_total, cents(4400));
        assert_eq!(plan.fallback_quantity, units(3));
        assert!(plan.used_fallback());
        let last = plan.basis.last().unwrap();
        assert!(last.is_fallback());
        assert_eq!(last.unit_cost(), cents(800));
    }

    #[test]
    fn test_fallback_plan_costs_everything_at_cost_price() {
        let plan = fallback_plan(units(4), cents(750));

        assert!(plan.draws.is_empty());
        assert_eq!(plan.cost_total, cents(3000));
        assert_eq!(plan.avg_cost, cents(750));
        assert_eq!(plan.fallback_quantity, units(4));
    }

    #[test]
    fn test_fractional_quantities_round_once() {
        // 0.333 @ 1.00 + 0.333 @ 1.00 = 0.666 → 0.67 (not 0.33 + 0.33)
        let layers = vec![
            LayerBalance::new("a", cents(100), Quantity::from_milli(333)),
            LayerBalance::new("b", cents(100), Quantity::from_milli(333)),
        ];

        let plan = plan_fifo(&layers, Quantity::from_milli(666), cents(100));

        assert_eq!(plan.cost_total, cents(67));
    }
}
