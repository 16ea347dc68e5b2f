//! Orders, their items, pricing and status timeline.

mod pricing;
mod state;

pub use pricing::{PriceBreakdown, PricingRules};
pub use state::OrderStatus;

use chrono::{DateTime, Utc};
use common::{Money, OrderId, ProductId, UserId, VariantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AddressSnapshot, DomainError};

/// Timeline note written when an order is created.
pub const ORDER_CREATED_NOTE: &str = "Order Created";

/// Timeline note written when payment is confirmed.
pub const PAYMENT_CONFIRMED_NOTE: &str = "Payment Confirmed";

/// Timeline note used when staff change the status without a note.
pub fn status_update_note(status: OrderStatus) -> String {
    format!("Order status updated to {status}")
}

/// How the customer pays for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentType {
    #[serde(rename = "ONLINE")]
    Online,
    #[serde(rename = "COD")]
    CashOnDelivery,
}

impl PaymentType {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Online => "ONLINE",
            PaymentType::CashOnDelivery => "COD",
        }
    }
}

impl std::fmt::Display for PaymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ONLINE" => Ok(PaymentType::Online),
            "COD" => Ok(PaymentType::CashOnDelivery),
            other => Err(DomainError::UnknownVariant {
                kind: "payment type",
                value: other.to_string(),
            }),
        }
    }
}

/// Snapshot of a purchased variant. Later catalog edits never change it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub variant_id: VariantId,
    pub product_id: ProductId,
    pub product_name: String,
    pub size: String,
    pub color: String,
    pub unit_price: Money,
    pub quantity: u32,
    pub product_image: Option<String>,
}

impl OrderItem {
    /// Returns `unit_price * quantity`.
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// One entry of the append-only status log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub status: OrderStatus,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TimelineEntry {
    pub fn new(status: OrderStatus, description: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status,
            description: Some(description.into()),
            created_at: at,
        }
    }
}

/// An order created from a cart snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub shipping_address: AddressSnapshot,
    pub items: Vec<OrderItem>,
    pub pricing: PriceBreakdown,
    pub payment_type: PaymentType,
    pub status: OrderStatus,
    /// Provider payment id, set when payment is confirmed.
    pub payment_id: Option<String>,
    /// Provider transaction id, set when an online payment is initiated.
    pub merchant_transaction_id: Option<String>,
    pub estimated_delivery_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub timeline: Vec<TimelineEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a `Pending` order with its pricing and first timeline entry.
    pub fn create(
        user_id: UserId,
        shipping_address: AddressSnapshot,
        items: Vec<OrderItem>,
        payment_type: PaymentType,
        rules: &PricingRules,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if items.is_empty() {
            return Err(DomainError::EmptyOrder);
        }
        if let Some(item) = items.iter().find(|item| item.quantity == 0) {
            return Err(DomainError::InvalidQuantity {
                quantity: item.quantity,
            });
        }

        let pricing = rules.price(items.iter().map(OrderItem::line_total));
        Ok(Self {
            id: OrderId::new(),
            order_number: generate_order_number(),
            user_id,
            shipping_address,
            items,
            pricing,
            payment_type,
            status: OrderStatus::Pending,
            payment_id: None,
            merchant_transaction_id: None,
            estimated_delivery_at: rules.estimated_delivery(now),
            delivered_at: None,
            timeline: vec![TimelineEntry::new(
                OrderStatus::Pending,
                ORDER_CREATED_NOTE,
                now,
            )],
            created_at: now,
            updated_at: now,
        })
    }

    /// Returns true if `user_id` placed this order.
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }

    /// Moves to `entry.status` and appends `entry` to the timeline.
    ///
    /// Entering `Delivered` stamps the delivery time.
    pub fn record(&mut self, entry: TimelineEntry) {
        self.status = entry.status;
        if entry.status == OrderStatus::Delivered {
            self.delivered_at = Some(entry.created_at);
        }
        self.updated_at = entry.created_at;
        self.timeline.push(entry);
    }

    /// Marks payment as confirmed.
    pub fn mark_placed(&mut self, payment_id: impl Into<String>, now: DateTime<Utc>) {
        self.payment_id = Some(payment_id.into());
        self.record(TimelineEntry::new(
            OrderStatus::Placed,
            PAYMENT_CONFIRMED_NOTE,
            now,
        ));
    }

    /// Quantity ordered per variant, summed over duplicate items.
    pub fn quantities(&self) -> Vec<(VariantId, u32)> {
        let mut quantities: Vec<(VariantId, u32)> = Vec::with_capacity(self.items.len());
        for item in &self.items {
            match quantities.iter_mut().find(|(id, _)| *id == item.variant_id) {
                Some((_, quantity)) => *quantity += item.quantity,
                None => quantities.push((item.variant_id, item.quantity)),
            }
        }
        quantities
    }
}

/// Generates a human-readable order number such as `ORD-1A2B3C4D`.
pub fn generate_order_number() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("ORD-{}", hex[..8].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn address() -> AddressSnapshot {
        AddressSnapshot {
            full_name: "Asha Rao".to_string(),
            phone: "9000000001".to_string(),
            line1: "12 MG Road".to_string(),
            line2: None,
            city: "Pune".to_string(),
            state: "MH".to_string(),
            postal_code: "411001".to_string(),
            country: "IN".to_string(),
        }
    }

    fn item(price: i64, quantity: u32) -> OrderItem {
        OrderItem {
            variant_id: VariantId::new(),
            product_id: ProductId::new(),
            product_name: "Tee".to_string(),
            size: "M".to_string(),
            color: "Red".to_string(),
            unit_price: Money::from_major(price),
            quantity,
            product_image: None,
        }
    }

    fn order(items: Vec<OrderItem>) -> Result<Order, DomainError> {
        Order::create(
            UserId::new(),
            address(),
            items,
            PaymentType::Online,
            &PricingRules::default(),
            Utc::now(),
        )
    }

    #[test]
    fn create_prices_and_opens_timeline() {
        let order = order(vec![item(100, 2)]).unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.pricing.total_amount, Money::from_major(286));
        assert_eq!(order.timeline.len(), 1);
        assert_eq!(order.timeline[0].status, OrderStatus::Pending);
        assert_eq!(order.timeline[0].description.as_deref(), Some(ORDER_CREATED_NOTE));
        assert_eq!(order.estimated_delivery_at, order.created_at + Duration::days(5));
    }

    #[test]
    fn create_rejects_empty_orders() {
        assert_eq!(order(vec![]).unwrap_err(), DomainError::EmptyOrder);
    }

    #[test]
    fn create_rejects_zero_quantity() {
        assert_eq!(
            order(vec![item(10, 0)]).unwrap_err(),
            DomainError::InvalidQuantity { quantity: 0 }
        );
    }

    #[test]
    fn order_number_format() {
        let number = generate_order_number();
        assert_eq!(number.len(), 12);
        assert!(number.starts_with("ORD-"));
        assert!(
            number[4..]
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        );
    }

    #[test]
    fn mark_placed_appends_one_entry() {
        let mut order = order(vec![item(100, 1)]).unwrap();
        order.mark_placed("pay_1", Utc::now());
        assert_eq!(order.status, OrderStatus::Placed);
        assert_eq!(order.payment_id.as_deref(), Some("pay_1"));
        assert_eq!(order.timeline.len(), 2);
        assert_eq!(order.timeline[1].status, OrderStatus::Placed);
    }

    #[test]
    fn delivered_stamps_delivery_time() {
        let mut order = order(vec![item(100, 1)]).unwrap();
        let at = Utc::now();
        order.record(TimelineEntry::new(
            OrderStatus::Delivered,
            status_update_note(OrderStatus::Delivered),
            at,
        ));
        assert_eq!(order.delivered_at, Some(at));
        assert_eq!(
            order.timeline[1].description.as_deref(),
            Some("Order status updated to Delivered")
        );
    }

    #[test]
    fn quantities_merge_duplicate_variants() {
        let first = item(100, 2);
        let mut second = item(100, 3);
        second.variant_id = first.variant_id;
        let other = item(50, 1);
        let order = order(vec![first.clone(), second, other.clone()]).unwrap();
        assert_eq!(
            order.quantities(),
            vec![(first.variant_id, 5), (other.variant_id, 1)]
        );
    }

    #[test]
    fn payment_type_wire_names() {
        assert_eq!(serde_json::to_string(&PaymentType::CashOnDelivery).unwrap(), "\"COD\"");
        assert_eq!("ONLINE".parse::<PaymentType>().unwrap(), PaymentType::Online);
        assert!("CARD".parse::<PaymentType>().is_err());
    }
}
