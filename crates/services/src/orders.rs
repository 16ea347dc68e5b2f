//! Order lifecycle: creation from the cart, payment and status timeline.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{AddressId, OrderId, UserId};
use domain::order::status_update_note;
use domain::{Order, OrderItem, OrderStatus, PaymentType, PricingRules, TimelineEntry};
use gateways::{PaymentGateway, PaymentRequest, PaymentSession};
use serde::Serialize;
use store::{AddressStore, CartStore, CatalogStore, OrderStore, PaymentCommit, StoreError};

use crate::auth::{Caller, ORDER_MANAGERS};
use crate::error::{Result, ServiceError};

/// Result of asking whether an order's payment went through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationOutcome {
    pub status: OrderStatus,
    pub message: String,
}

impl VerificationOutcome {
    fn new(status: OrderStatus, message: &str) -> Self {
        Self {
            status,
            message: message.to_string(),
        }
    }
}

/// Customer-facing tracking view of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderTracking {
    pub order_id: OrderId,
    pub order_number: String,
    pub current_status: OrderStatus,
    pub estimated_delivery: DateTime<Utc>,
    pub timeline: Vec<TrackingEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackingEntry {
    pub status: OrderStatus,
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// False only for the latest step of an order that is still moving.
    pub is_completed: bool,
}

/// Creates orders from carts and drives them through payment and delivery.
///
/// Stock is not touched at creation. It is committed by
/// [`OrderService::confirm_payment`] in a single store transaction.
pub struct OrderService<S> {
    store: Arc<S>,
    payments: Arc<dyn PaymentGateway>,
    rules: PricingRules,
}

impl<S> OrderService<S>
where
    S: CatalogStore + CartStore + OrderStore + AddressStore,
{
    pub fn new(store: Arc<S>, payments: Arc<dyn PaymentGateway>) -> Self {
        Self::with_rules(store, payments, PricingRules::default())
    }

    pub fn with_rules(
        store: Arc<S>,
        payments: Arc<dyn PaymentGateway>,
        rules: PricingRules,
    ) -> Self {
        Self {
            store,
            payments,
            rules,
        }
    }

    /// Turns the user's cart into a `Pending` order.
    ///
    /// Every line must resolve to a variant that can cover its quantity. The
    /// cart is left intact until payment is confirmed.
    #[tracing::instrument(skip(self), fields(%user_id))]
    pub async fn create_from_cart(
        &self,
        user_id: UserId,
        address_id: AddressId,
        payment_type: PaymentType,
    ) -> Result<Order> {
        let address = self
            .store
            .get_address(address_id)
            .await?
            .filter(|address| address.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound("Address not found".to_string()))?;

        let lines = self.store.list_cart(user_id).await?;
        if lines.is_empty() {
            return Err(ServiceError::BadRequest("Cart is empty".to_string()));
        }

        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let product = self
                .store
                .get_product(line.product_id)
                .await?
                .filter(|product| !product.is_archived)
                .ok_or_else(|| ServiceError::NotFound("Product not found".to_string()))?;

            let variant = self
                .store
                .find_variant(product.id, &line.size, &line.color)
                .await?
                .filter(|variant| variant.can_cover(line.quantity))
                .ok_or_else(|| {
                    ServiceError::OutOfStock(format!(
                        "Item {} ({}) is out of stock",
                        product.name, line.size
                    ))
                })?;

            items.push(OrderItem {
                variant_id: variant.id,
                product_id: product.id,
                product_name: product.name.clone(),
                size: line.size.clone(),
                color: line.color.clone(),
                unit_price: variant.effective_price(product.price),
                quantity: line.quantity,
                product_image: product.main_image().map(str::to_string),
            });
        }

        let order = Order::create(
            user_id,
            address.snapshot(),
            items,
            payment_type,
            &self.rules,
            Utc::now(),
        )?;
        self.store.insert_order(&order).await?;

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.pricing.total_amount,
            "Order created"
        );
        Ok(order)
    }

    /// Opens a provider payment session for an online order.
    #[tracing::instrument(skip(self), fields(%order_id))]
    pub async fn initiate_payment(
        &self,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<PaymentSession> {
        let order = self.get_order(order_id, user_id).await?;
        if !order.status.awaits_payment() {
            return Err(ServiceError::BadRequest(format!(
                "Order is {} and cannot be paid",
                order.status
            )));
        }
        if order.payment_type != PaymentType::Online {
            return Err(ServiceError::BadRequest(
                "Order is not an online payment order".to_string(),
            ));
        }

        let session = self
            .payments
            .initiate(PaymentRequest {
                amount: order.pricing.total_amount,
                user_id,
                mobile_number: order.shipping_address.phone.clone(),
            })
            .await?;
        self.store
            .set_merchant_transaction(order.id, &session.merchant_transaction_id)
            .await?;

        tracing::info!(
            merchant_transaction_id = %session.merchant_transaction_id,
            "Payment initiated"
        );
        Ok(session)
    }

    /// Commits a paid order: decrements stock, places the order and clears
    /// the cart, all or nothing.
    ///
    /// Idempotent: an order that is no longer `Pending` is returned as is.
    #[tracing::instrument(skip(self), fields(%order_id))]
    pub async fn confirm_payment(&self, order_id: OrderId, payment_id: &str) -> Result<Order> {
        match self.store.commit_payment(order_id, payment_id, Utc::now()).await {
            Ok(PaymentCommit::Committed(order)) => {
                metrics::counter!("payments_confirmed_total").increment(1);
                tracing::info!(order_number = %order.order_number, "Payment confirmed");
                Ok(order)
            }
            Ok(PaymentCommit::AlreadyProcessed(order)) => {
                tracing::debug!(status = %order.status, "Payment already processed");
                Ok(order)
            }
            Err(StoreError::InsufficientStock {
                variant_id,
                requested,
            }) => {
                metrics::counter!("payment_confirmation_failures_total").increment(1);
                tracing::warn!(%variant_id, requested, "Stock ran out before payment confirmation");
                Err(ServiceError::OutOfStock(
                    "An item in this order is no longer in stock".to_string(),
                ))
            }
            Err(StoreError::NotFound { .. }) => {
                Err(ServiceError::NotFound("Order not found".to_string()))
            }
            Err(e) => {
                metrics::counter!("payment_confirmation_failures_total").increment(1);
                Err(e.into())
            }
        }
    }

    /// Asks the provider whether a pending order was paid and confirms it if
    /// so. Safe to call repeatedly.
    #[tracing::instrument(skip(self), fields(%order_id))]
    pub async fn verify_and_complete(
        &self,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<VerificationOutcome> {
        let order = self.get_order(order_id, user_id).await?;

        match order.status {
            OrderStatus::Placed => {
                return Ok(VerificationOutcome::new(
                    OrderStatus::Placed,
                    "Order already paid and placed",
                ));
            }
            OrderStatus::Pending => {}
            other => {
                return Ok(VerificationOutcome::new(
                    other,
                    "Order status is not pending",
                ));
            }
        }

        let Some(transaction_id) = order.merchant_transaction_id.as_deref() else {
            return Ok(VerificationOutcome::new(
                OrderStatus::Pending,
                "Payment not completed yet",
            ));
        };

        if !self.payments.check_status(transaction_id).await {
            return Ok(VerificationOutcome::new(
                OrderStatus::Pending,
                "Payment not completed yet",
            ));
        }

        let confirmed = self.confirm_payment(order.id, transaction_id).await?;
        Ok(VerificationOutcome::new(
            confirmed.status,
            "Payment verified successfully",
        ))
    }

    /// Staff status change. Always appends a timeline entry.
    #[tracing::instrument(skip(self, caller, description), fields(%order_id, %status))]
    pub async fn update_status(
        &self,
        caller: &Caller,
        order_id: OrderId,
        status: OrderStatus,
        description: Option<String>,
    ) -> Result<Order> {
        caller.require_any(ORDER_MANAGERS)?;

        let note = description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| status_update_note(status));
        let entry = TimelineEntry::new(status, note, Utc::now());

        self.store
            .append_status(order_id, entry)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => {
                    ServiceError::NotFound(format!("Order {order_id} not found"))
                }
                other => other.into(),
            })
    }

    /// Loads an order the user owns.
    pub async fn get_order(&self, order_id: OrderId, user_id: UserId) -> Result<Order> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;
        if !order.is_owned_by(user_id) {
            return Err(ServiceError::Forbidden(
                "You are not allowed to view this order".to_string(),
            ));
        }
        Ok(order)
    }

    /// The user's orders, newest first.
    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self.store.list_orders(user_id).await?)
    }

    pub async fn tracking(&self, order_id: OrderId, user_id: UserId) -> Result<OrderTracking> {
        let order = self.get_order(order_id, user_id).await?;
        let latest = order.timeline.len().saturating_sub(1);
        let settled = order.status.is_terminal();
        Ok(OrderTracking {
            order_id: order.id,
            order_number: order.order_number,
            current_status: order.status,
            estimated_delivery: order.estimated_delivery_at,
            timeline: order
                .timeline
                .into_iter()
                .enumerate()
                .map(|(position, entry)| TrackingEntry {
                    status: entry.status,
                    description: entry.description,
                    timestamp: entry.created_at,
                    is_completed: settled || position < latest,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CartLineId, Money, ProductId, VariantId};
    use domain::{
        Address, AddressSnapshot, CartLine, Gender, NewAddress, NewProduct, Product, Role, Variant,
    };
    use gateways::InMemoryPaymentGateway;
    use store::InMemoryStore;

    struct Fixture {
        store: Arc<InMemoryStore>,
        payments: InMemoryPaymentGateway,
        orders: OrderService<InMemoryStore>,
        user: UserId,
        address: Address,
        variant: Variant,
    }

    async fn fixture(stock: i64, quantity: u32) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let payments = InMemoryPaymentGateway::new();
        let orders = OrderService::new(store.clone(), Arc::new(payments.clone()));
        let user = UserId::new();

        let product = Product::from_new(
            ProductId::new(),
            NewProduct {
                name: "Tee".to_string(),
                description: String::new(),
                price: Money::from_major(100),
                gender: Gender::Unisex,
                category: "Tops".to_string(),
                brand: "Acme".to_string(),
                images: vec!["uploads/tee.jpg".to_string()],
                is_trending: false,
            },
            Utc::now(),
        );
        // Stocked for the cart first; `stock` applies once the line is in.
        let mut variant = Variant {
            id: VariantId::new(),
            product_id: product.id,
            size: "M".to_string(),
            color: "Red".to_string(),
            sku: "TEE-M-RED".to_string(),
            stock: stock.max(i64::from(quantity)),
            price_override: None,
        };
        store
            .insert_product(product, vec![variant.clone()])
            .await
            .unwrap();

        let address = store
            .insert_address(Address::from_new(
                user,
                NewAddress {
                    postal: AddressSnapshot {
                        full_name: "Asha Rao".to_string(),
                        phone: "9000000001".to_string(),
                        line1: "12 MG Road".to_string(),
                        line2: None,
                        city: "Pune".to_string(),
                        state: "MH".to_string(),
                        postal_code: "411001".to_string(),
                        country: "IN".to_string(),
                    },
                    is_default: false,
                },
                Utc::now(),
            ))
            .await
            .unwrap();

        store
            .add_cart_line(
                CartLine {
                    id: CartLineId::new(),
                    user_id: user,
                    product_id: variant.product_id,
                    size: "M".to_string(),
                    color: "Red".to_string(),
                    quantity,
                    created_at: Utc::now(),
                },
                variant.id,
            )
            .await
            .unwrap();
        variant.stock = stock;
        store.save_variant(&variant).await.unwrap();

        Fixture {
            store,
            payments,
            orders,
            user,
            address,
            variant,
        }
    }

    #[tokio::test]
    async fn test_create_from_cart_prices_without_touching_stock() {
        let f = fixture(5, 2).await;
        let order = f
            .orders
            .create_from_cart(f.user, f.address.id, PaymentType::Online)
            .await
            .unwrap();

        assert_eq!(order.pricing.items_total, Money::from_major(200));
        assert_eq!(order.pricing.shipping_cost, Money::from_major(50));
        assert_eq!(order.pricing.tax_amount, Money::from_major(36));
        assert_eq!(order.pricing.total_amount, Money::from_major(286));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.items[0].product_image.as_deref(), Some("uploads/tee.jpg"));

        assert_eq!(f.store.get_variant(f.variant.id).await.unwrap().unwrap().stock, 5);
        assert_eq!(f.store.list_cart(f.user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_requires_own_address_and_items() {
        let f = fixture(5, 2).await;
        let stranger = UserId::new();

        assert!(matches!(
            f.orders
                .create_from_cart(stranger, f.address.id, PaymentType::Online)
                .await,
            Err(ServiceError::NotFound(_))
        ));

        f.store.clear_cart(f.user).await.unwrap();
        assert!(matches!(
            f.orders
                .create_from_cart(f.user, f.address.id, PaymentType::Online)
                .await,
            Err(ServiceError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_uncoverable_line() {
        let f = fixture(1, 2).await;
        let err = f
            .orders
            .create_from_cart(f.user, f.address.id, PaymentType::CashOnDelivery)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::OutOfStock(_)));
    }

    #[tokio::test]
    async fn test_confirm_payment_is_idempotent() {
        let f = fixture(5, 2).await;
        let order = f
            .orders
            .create_from_cart(f.user, f.address.id, PaymentType::Online)
            .await
            .unwrap();

        let placed = f.orders.confirm_payment(order.id, "TXN_1").await.unwrap();
        let again = f.orders.confirm_payment(order.id, "TXN_1").await.unwrap();

        assert_eq!(placed.status, OrderStatus::Placed);
        assert_eq!(again.timeline.len(), 2);
        assert_eq!(f.store.get_variant(f.variant.id).await.unwrap().unwrap().stock, 3);
        assert!(f.store.list_cart(f.user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_verify_flow_through_gateway() {
        let f = fixture(5, 2).await;
        let order = f
            .orders
            .create_from_cart(f.user, f.address.id, PaymentType::Online)
            .await
            .unwrap();

        let outcome = f.orders.verify_and_complete(order.id, f.user).await.unwrap();
        assert_eq!(outcome.status, OrderStatus::Pending);
        assert_eq!(f.payments.status_checks(), 0);

        let session = f.orders.initiate_payment(order.id, f.user).await.unwrap();
        let recorded = f.payments.session(&session.merchant_transaction_id).unwrap();
        assert_eq!(recorded.amount, Money::from_major(286));
        assert_eq!(recorded.mobile_number, "9000000001");

        let outcome = f.orders.verify_and_complete(order.id, f.user).await.unwrap();
        assert_eq!(outcome.message, "Payment not completed yet");

        f.payments.mark_paid(&session.merchant_transaction_id);
        let outcome = f.orders.verify_and_complete(order.id, f.user).await.unwrap();
        assert_eq!(outcome.status, OrderStatus::Placed);
        assert_eq!(outcome.message, "Payment verified successfully");

        let outcome = f.orders.verify_and_complete(order.id, f.user).await.unwrap();
        assert_eq!(outcome.message, "Order already paid and placed");
        assert_eq!(f.payments.status_checks(), 2);

        let stored = f.orders.get_order(order.id, f.user).await.unwrap();
        assert_eq!(
            stored.payment_id.as_deref(),
            Some(session.merchant_transaction_id.as_str())
        );
    }

    #[tokio::test]
    async fn test_initiate_failure_is_gateway_error() {
        let f = fixture(5, 2).await;
        let order = f
            .orders
            .create_from_cart(f.user, f.address.id, PaymentType::Online)
            .await
            .unwrap();

        f.payments.set_fail_on_initiate(true);
        let err = f.orders.initiate_payment(order.id, f.user).await.unwrap_err();
        assert!(matches!(err, ServiceError::Gateway(_)));
    }

    #[tokio::test]
    async fn test_cash_orders_cannot_be_paid_online() {
        let f = fixture(5, 2).await;
        let order = f
            .orders
            .create_from_cart(f.user, f.address.id, PaymentType::CashOnDelivery)
            .await
            .unwrap();
        assert!(matches!(
            f.orders.initiate_payment(order.id, f.user).await,
            Err(ServiceError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_update_status_appends_and_stamps_delivery() {
        let f = fixture(5, 2).await;
        let order = f
            .orders
            .create_from_cart(f.user, f.address.id, PaymentType::CashOnDelivery)
            .await
            .unwrap();
        let support = Caller::new(UserId::new(), Role::Support);

        let shipped = f
            .orders
            .update_status(&support, order.id, OrderStatus::Shipped, None)
            .await
            .unwrap();
        assert_eq!(
            shipped.timeline.last().unwrap().description.as_deref(),
            Some("Order status updated to Shipped")
        );

        let delivered = f
            .orders
            .update_status(
                &support,
                order.id,
                OrderStatus::Delivered,
                Some("Left with neighbour".to_string()),
            )
            .await
            .unwrap();
        assert!(delivered.delivered_at.is_some());
        assert_eq!(delivered.timeline.len(), 3);

        let tracking = f.orders.tracking(order.id, f.user).await.unwrap();
        assert_eq!(tracking.current_status, OrderStatus::Delivered);
        assert_eq!(tracking.timeline.len(), 3);
        assert!(tracking.timeline.iter().all(|t| t.is_completed));
    }

    #[tokio::test]
    async fn test_tracking_leaves_latest_step_open_until_terminal() {
        let f = fixture(5, 2).await;
        let order = f
            .orders
            .create_from_cart(f.user, f.address.id, PaymentType::Online)
            .await
            .unwrap();

        let pending = f.orders.tracking(order.id, f.user).await.unwrap();
        assert_eq!(pending.timeline.len(), 1);
        assert!(!pending.timeline[0].is_completed);

        f.orders.confirm_payment(order.id, "TXN_1").await.unwrap();
        let placed = f.orders.tracking(order.id, f.user).await.unwrap();
        let completed: Vec<_> = placed.timeline.iter().map(|t| t.is_completed).collect();
        assert_eq!(completed, vec![true, false]);
    }

    #[tokio::test]
    async fn test_update_status_checks_role_and_existence() {
        let f = fixture(5, 2).await;
        let err = f
            .orders
            .update_status(
                &Caller::customer(f.user),
                OrderId::new(),
                OrderStatus::Shipped,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let admin = Caller::new(UserId::new(), Role::Admin);
        let err = f
            .orders
            .update_status(&admin, OrderId::new(), OrderStatus::Shipped, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_other_users_orders_are_forbidden() {
        let f = fixture(5, 2).await;
        let order = f
            .orders
            .create_from_cart(f.user, f.address.id, PaymentType::Online)
            .await
            .unwrap();
        assert!(matches!(
            f.orders.get_order(order.id, UserId::new()).await,
            Err(ServiceError::Forbidden(_))
        ));
    }
}
