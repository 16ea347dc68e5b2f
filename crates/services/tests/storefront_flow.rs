//! End-to-end flows across the storefront services on the in-memory store.

use std::sync::Arc;

use common::{Money, UserId};
use domain::{
    AddressSnapshot, Gender, NewAddress, NewProduct, NewVariant, OrderStatus, PaymentType,
    Product, Role,
};
use gateways::InMemoryPaymentGateway;
use services::{
    AddToCart, AddressService, CartService, CatalogService, Caller, OrderService, ServiceError,
};
use store::{CatalogStore, InMemoryStore};

struct TestHarness {
    store: Arc<InMemoryStore>,
    payments: InMemoryPaymentGateway,
    catalog: CatalogService<InMemoryStore>,
    cart: CartService<InMemoryStore>,
    addresses: AddressService<InMemoryStore>,
    orders: Arc<OrderService<InMemoryStore>>,
}

impl TestHarness {
    fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let payments = InMemoryPaymentGateway::new();
        Self {
            catalog: CatalogService::new(store.clone()),
            cart: CartService::new(store.clone()),
            addresses: AddressService::new(store.clone()),
            orders: Arc::new(OrderService::new(store.clone(), Arc::new(payments.clone()))),
            store,
            payments,
        }
    }

    async fn product_with_stock(&self, stock: i64) -> Product {
        self.catalog
            .create_product(
                &Caller::new(UserId::new(), Role::Marketing),
                NewProduct {
                    name: "Linen Shirt".to_string(),
                    description: "Relaxed fit".to_string(),
                    price: Money::from_major(100),
                    gender: Gender::Men,
                    category: "Shirts".to_string(),
                    brand: "Acme".to_string(),
                    images: vec!["uploads/shirt.jpg".to_string()],
                    is_trending: true,
                },
                vec![NewVariant {
                    size: "L".to_string(),
                    color: "White".to_string(),
                    sku: "SHIRT-L-WHITE".to_string(),
                    stock,
                    price_override: None,
                }],
            )
            .await
            .unwrap()
    }

    /// Registers an address and fills the cart, returning a pending order.
    async fn pending_order(&self, user: UserId, product: &Product, quantity: u32) -> domain::Order {
        let address = self
            .addresses
            .create(
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
            )
            .await
            .unwrap();

        self.cart
            .add_or_increment(
                user,
                AddToCart {
                    product_id: product.id,
                    quantity,
                    size: "L".to_string(),
                    color: "White".to_string(),
                },
            )
            .await
            .unwrap();

        self.orders
            .create_from_cart(user, address.id, PaymentType::Online)
            .await
            .unwrap()
    }

    async fn stock(&self, product: &Product) -> i64 {
        self.store
            .get_product(product.id)
            .await
            .unwrap()
            .unwrap()
            .stock
    }
}

#[tokio::test]
async fn test_checkout_through_payment_verification() {
    let harness = TestHarness::new();
    let product = harness.product_with_stock(5).await;
    let user = UserId::new();

    let order = harness.pending_order(user, &product, 2).await;
    assert_eq!(order.pricing.total_amount, Money::from_major(286));

    let session = harness.orders.initiate_payment(order.id, user).await.unwrap();
    let request = harness
        .payments
        .session(&session.merchant_transaction_id)
        .unwrap();
    assert_eq!(request.amount, Money::from_major(286));
    assert_eq!(request.mobile_number, "9000000001");

    let outcome = harness.orders.verify_and_complete(order.id, user).await.unwrap();
    assert_eq!(outcome.status, OrderStatus::Pending);
    assert_eq!(harness.stock(&product).await, 5);

    harness.payments.mark_paid(&session.merchant_transaction_id);
    let outcome = harness.orders.verify_and_complete(order.id, user).await.unwrap();
    assert_eq!(outcome.status, OrderStatus::Placed);
    assert_eq!(outcome.message, "Payment verified successfully");
    assert_eq!(harness.stock(&product).await, 3);
    assert!(harness.cart.get_summary(user).await.unwrap().items.is_empty());

    let outcome = harness.orders.verify_and_complete(order.id, user).await.unwrap();
    assert_eq!(outcome.message, "Order already paid and placed");
    assert_eq!(harness.stock(&product).await, 3);

    let support = Caller::new(UserId::new(), Role::Support);
    harness
        .orders
        .update_status(&support, order.id, OrderStatus::Accepted, None)
        .await
        .unwrap();

    let tracking = harness.orders.tracking(order.id, user).await.unwrap();
    assert_eq!(tracking.current_status, OrderStatus::Accepted);
    let statuses: Vec<_> = tracking.timeline.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![OrderStatus::Pending, OrderStatus::Placed, OrderStatus::Accepted]
    );
    let completed: Vec<_> = tracking.timeline.iter().map(|e| e.is_completed).collect();
    assert_eq!(completed, vec![true, true, false]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_confirmations_never_oversell() {
    let harness = TestHarness::new();
    let product = harness.product_with_stock(2).await;

    let first = harness.pending_order(UserId::new(), &product, 2).await;
    let second = harness.pending_order(UserId::new(), &product, 2).await;

    let a = {
        let orders = harness.orders.clone();
        tokio::spawn(async move { orders.confirm_payment(first.id, "TXN_A").await })
    };
    let b = {
        let orders = harness.orders.clone();
        tokio::spawn(async move { orders.confirm_payment(second.id, "TXN_B").await })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];

    let placed = results.iter().filter(|r| r.is_ok()).count();
    let out_of_stock = results
        .iter()
        .filter(|r| matches!(r, Err(ServiceError::OutOfStock(_))))
        .count();
    assert_eq!((placed, out_of_stock), (1, 1));
    assert_eq!(harness.stock(&product).await, 0);
}

#[tokio::test]
async fn test_archived_product_blocks_checkout() {
    let harness = TestHarness::new();
    let product = harness.product_with_stock(5).await;
    let user = UserId::new();
    let order = harness.pending_order(user, &product, 1).await;
    assert_eq!(order.status, OrderStatus::Pending);

    harness
        .catalog
        .archive_product(&Caller::new(UserId::new(), Role::Admin), product.id)
        .await
        .unwrap();

    let address = harness.addresses.list(user).await.unwrap().remove(0);
    let err = harness
        .orders
        .create_from_cart(user, address.id, PaymentType::CashOnDelivery)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}
