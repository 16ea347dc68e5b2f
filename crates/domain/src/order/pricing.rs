//! Order financial breakdown.

use chrono::{DateTime, Duration, Utc};
use common::Money;
use serde::{Deserialize, Serialize};

/// Business constants applied when an order is priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingRules {
    /// Shipping is free when the items total is strictly above this amount.
    pub free_shipping_above: Money,
    /// Flat shipping fee charged otherwise.
    pub shipping_fee: Money,
    /// Tax rate in whole percent of the items total.
    pub tax_percent: u32,
    /// Days between order creation and estimated delivery.
    pub delivery_days: i64,
}

impl Default for PricingRules {
    fn default() -> Self {
        Self {
            free_shipping_above: Money::from_major(500),
            shipping_fee: Money::from_major(50),
            tax_percent: 18,
            delivery_days: 5,
        }
    }
}

impl PricingRules {
    /// Prices a set of line totals.
    pub fn price(&self, line_totals: impl IntoIterator<Item = Money>) -> PriceBreakdown {
        let items_total: Money = line_totals.into_iter().sum();
        let shipping_cost = if items_total > self.free_shipping_above {
            Money::zero()
        } else {
            self.shipping_fee
        };
        let tax_amount = items_total.percent(self.tax_percent);
        PriceBreakdown {
            items_total,
            shipping_cost,
            tax_amount,
            total_amount: items_total + shipping_cost + tax_amount,
        }
    }

    /// Estimated delivery for an order created at `created_at`.
    pub fn estimated_delivery(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        created_at + Duration::days(self.delivery_days)
    }
}

/// Items subtotal, shipping, tax and grand total of an order.
///
/// `total_amount == items_total + shipping_cost + tax_amount` always holds for
/// values built by [`PricingRules::price`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub items_total: Money,
    pub shipping_cost: Money,
    pub tax_amount: Money,
    pub total_amount: Money,
}
