//! Shared application state and its external collaborators.

use std::sync::Arc;

use gateways::{
    InMemoryNotifier, InMemoryPaymentGateway, InMemorySmsSender, InMemoryTryOnGenerator, Notifier,
    PaymentGateway, PublicUrlResolver, SmsSender, TryOnGenerator,
};
use services::{
    AccountService, AddressService, CartService, CatalogService, FavoriteService, OrderService,
    TrackerConfig, TryOnTracker,
};
use store::Store;

/// Provider clients, real or in-memory.
#[derive(Clone)]
pub struct Gateways {
    pub payments: Arc<dyn PaymentGateway>,
    pub try_on: Arc<dyn TryOnGenerator>,
    pub sms: Arc<dyn SmsSender>,
    pub notifier: Arc<dyn Notifier>,
}

impl Gateways {
    /// In-memory fakes for every provider.
    pub fn in_memory() -> Self {
        Self {
            payments: Arc::new(InMemoryPaymentGateway::new()),
            try_on: Arc::new(InMemoryTryOnGenerator::new()),
            sms: Arc::new(InMemorySmsSender::new()),
            notifier: Arc::new(InMemoryNotifier::new()),
        }
    }
}

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub catalog: CatalogService<S>,
    pub cart: CartService<S>,
    pub orders: OrderService<S>,
    pub try_on: TryOnTracker<S>,
    pub accounts: AccountService<S>,
    pub addresses: AddressService<S>,
    pub favorites: FavoriteService<S>,
}

impl<S: Store + 'static> AppState<S> {
    pub fn new(
        store: Arc<S>,
        gateways: Gateways,
        urls: PublicUrlResolver,
        tracker: TrackerConfig,
    ) -> Self {
        Self {
            catalog: CatalogService::new(store.clone()),
            cart: CartService::new(store.clone()),
            orders: OrderService::new(store.clone(), gateways.payments),
            try_on: TryOnTracker::new(store.clone(), gateways.try_on, urls, tracker),
            accounts: AccountService::new(store.clone(), gateways.sms, gateways.notifier),
            addresses: AddressService::new(store.clone()),
            favorites: FavoriteService::new(store),
        }
    }
}
