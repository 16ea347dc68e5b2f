use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AddressId, CartLineId, FavoriteId, OrderId, ProductId, TryOnId, UserId, VariantId};
use domain::{
    Address, CartLine, Favorite, Order, OtpCode, Page, Product, ProductFilter, StockAggregate,
    TimelineEntry, TryOnKind, TryOnRecord, TryOnStatus, User, Variant,
};
use tokio::sync::RwLock;

use crate::{
    Result, StoreError,
    store::{
        AccountStore, AddressStore, CartStore, CatalogStore, FavoriteStore, OrderStore,
        PaymentCommit, TryOnStore,
    },
};

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    otps: HashMap<String, OtpCode>,
    products: HashMap<ProductId, Product>,
    variants: HashMap<VariantId, Variant>,
    cart: Vec<CartLine>,
    orders: HashMap<OrderId, Order>,
    try_ons: Vec<TryOnRecord>,
    addresses: Vec<Address>,
    favorites: Vec<Favorite>,
}

impl State {
    fn sku_taken(&self, sku: &str) -> bool {
        self.variants.values().any(|v| v.sku == sku)
    }

    /// Recomputes and stores the aggregates of one product.
    fn refresh_aggregate(&mut self, product_id: ProductId) -> Result<Product> {
        let aggregate = StockAggregate::from_variants(
            self.variants
                .values()
                .filter(|v| v.product_id == product_id),
        );
        let product = self
            .products
            .get_mut(&product_id)
            .ok_or_else(|| StoreError::not_found("Product", product_id))?;
        product.apply_aggregate(aggregate);
        Ok(product.clone())
    }

    fn visible_products(&self) -> impl Iterator<Item = &Product> {
        self.products.values().filter(|p| !p.is_archived)
    }

    fn user_addresses_mut(&mut self, user_id: UserId) -> impl Iterator<Item = &mut Address> {
        self.addresses.iter_mut().filter(move |a| a.user_id == user_id)
    }
}

/// In-memory store implementation for tests and local runs.
///
/// All tables share one lock, so every method is atomic with respect to the
/// others, matching the transactional behavior of the PostgreSQL store.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn insert_product(&self, product: Product, variants: Vec<Variant>) -> Result<Product> {
        let mut state = self.state.write().await;

        let mut seen = BTreeSet::new();
        for variant in &variants {
            if state.sku_taken(&variant.sku) || !seen.insert(variant.sku.as_str()) {
                return Err(StoreError::DuplicateSku(variant.sku.clone()));
            }
        }

        let product_id = product.id;
        state.products.insert(product_id, product);
        for variant in variants {
            state.variants.insert(variant.id, variant);
        }
        state.refresh_aggregate(product_id)
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn save_product(&self, product: &Product) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state
            .products
            .get_mut(&product.id)
            .ok_or_else(|| StoreError::not_found("Product", product.id))?;
        let (stock, colors) = (stored.stock, std::mem::take(&mut stored.colors));
        *stored = product.clone();
        stored.stock = stock;
        stored.colors = colors;
        Ok(())
    }

    async fn list_products(&self, filter: &ProductFilter) -> Result<Page<Product>> {
        let state = self.state.read().await;
        let mut matching: Vec<Product> = state
            .products
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        filter.sort(&mut matching);

        let total = matching.len() as u64;
        let data = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit as usize)
            .collect();
        Ok(Page {
            data,
            total,
            page: filter.page.max(1),
            limit: filter.limit,
        })
    }

    async fn search_products(&self, keyword: &str, limit: u32) -> Result<Vec<Product>> {
        let state = self.state.read().await;
        let mut found: Vec<Product> = state
            .visible_products()
            .filter(|p| p.matches_keyword(keyword))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        found.truncate(limit as usize);
        Ok(found)
    }

    async fn trending_products(&self, limit: u32) -> Result<Vec<Product>> {
        let state = self.state.read().await;
        let mut trending: Vec<Product> = state
            .visible_products()
            .filter(|p| p.is_trending)
            .cloned()
            .collect();
        trending.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        trending.truncate(limit as usize);
        Ok(trending)
    }

    async fn categories(&self) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let set: BTreeSet<String> = state.visible_products().map(|p| p.category.clone()).collect();
        Ok(set.into_iter().collect())
    }

    async fn brands(&self) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let set: BTreeSet<String> = state.visible_products().map(|p| p.brand.clone()).collect();
        Ok(set.into_iter().collect())
    }

    async fn insert_variant(&self, variant: Variant) -> Result<Product> {
        let mut state = self.state.write().await;
        if !state.products.contains_key(&variant.product_id) {
            return Err(StoreError::not_found("Product", variant.product_id));
        }
        if state.sku_taken(&variant.sku) {
            return Err(StoreError::DuplicateSku(variant.sku));
        }
        let product_id = variant.product_id;
        state.variants.insert(variant.id, variant);
        state.refresh_aggregate(product_id)
    }

    async fn get_variant(&self, id: VariantId) -> Result<Option<Variant>> {
        Ok(self.state.read().await.variants.get(&id).cloned())
    }

    async fn find_variant(
        &self,
        product_id: ProductId,
        size: &str,
        color: &str,
    ) -> Result<Option<Variant>> {
        let state = self.state.read().await;
        Ok(state
            .variants
            .values()
            .find(|v| v.product_id == product_id && v.is(size, color))
            .cloned())
    }

    async fn list_variants(&self, product_id: ProductId) -> Result<Vec<Variant>> {
        let state = self.state.read().await;
        let mut variants: Vec<Variant> = state
            .variants
            .values()
            .filter(|v| v.product_id == product_id)
            .cloned()
            .collect();
        variants.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(variants)
    }

    async fn save_variant(&self, variant: &Variant) -> Result<Product> {
        let mut state = self.state.write().await;
        let stored = state
            .variants
            .get_mut(&variant.id)
            .ok_or_else(|| StoreError::not_found("Variant", variant.id))?;
        stored.size = variant.size.clone();
        stored.color = variant.color.clone();
        stored.stock = variant.stock;
        stored.price_override = variant.price_override;
        let product_id = stored.product_id;
        state.refresh_aggregate(product_id)
    }

    async fn delete_variant(&self, id: VariantId) -> Result<Product> {
        let mut state = self.state.write().await;
        let removed = state
            .variants
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("Variant", id))?;
        state.refresh_aggregate(removed.product_id)
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    async fn add_cart_line(&self, line: CartLine, variant_id: VariantId) -> Result<CartLine> {
        let mut state = self.state.write().await;
        let position = state.cart.iter().position(|l| {
            l.user_id == line.user_id && l.matches(line.product_id, &line.size, &line.color)
        });
        let merged = position
            .map_or(0, |i| state.cart[i].quantity)
            .saturating_add(line.quantity);

        let variant = state
            .variants
            .get(&variant_id)
            .ok_or_else(|| StoreError::not_found("Variant", variant_id))?;
        if !variant.can_cover(merged) {
            return Err(StoreError::InsufficientStock {
                variant_id,
                requested: merged,
            });
        }

        match position {
            Some(i) => {
                state.cart[i].quantity = merged;
                Ok(state.cart[i].clone())
            }
            None => {
                state.cart.push(line.clone());
                Ok(line)
            }
        }
    }

    async fn get_cart_line(&self, id: CartLineId) -> Result<Option<CartLine>> {
        let state = self.state.read().await;
        Ok(state.cart.iter().find(|l| l.id == id).cloned())
    }

    async fn list_cart(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        let state = self.state.read().await;
        Ok(state
            .cart
            .iter()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn set_cart_quantity(&self, id: CartLineId, quantity: u32) -> Result<CartLine> {
        let mut state = self.state.write().await;
        let line = state
            .cart
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| StoreError::not_found("Cart line", id))?;
        line.quantity = quantity;
        Ok(line.clone())
    }

    async fn delete_cart_line(&self, id: CartLineId) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.cart.len();
        state.cart.retain(|l| l.id != id);
        Ok(state.cart.len() != before)
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.cart.len();
        state.cart.retain(|l| l.user_id != user_id);
        Ok((before - state.cart.len()) as u64)
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut state = self.state.write().await;
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn set_merchant_transaction(&self, id: OrderId, transaction_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Order", id))?;
        order.merchant_transaction_id = Some(transaction_id.to_string());
        Ok(())
    }

    async fn append_status(&self, id: OrderId, entry: TimelineEntry) -> Result<Order> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Order", id))?;
        order.record(entry);
        Ok(order.clone())
    }

    async fn commit_payment(
        &self,
        id: OrderId,
        payment_id: &str,
        placed_at: DateTime<Utc>,
    ) -> Result<PaymentCommit> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Order", id))?;
        if !order.status.awaits_payment() {
            return Ok(PaymentCommit::AlreadyProcessed(order));
        }

        // Check every line before touching anything so a shortfall writes nothing.
        let quantities = order.quantities();
        for (variant_id, quantity) in &quantities {
            let covered = state
                .variants
                .get(variant_id)
                .is_some_and(|v| v.can_cover(*quantity));
            if !covered {
                return Err(StoreError::InsufficientStock {
                    variant_id: *variant_id,
                    requested: *quantity,
                });
            }
        }

        let mut touched = BTreeSet::new();
        for (variant_id, quantity) in &quantities {
            if let Some(variant) = state.variants.get_mut(variant_id) {
                variant.stock -= i64::from(*quantity);
                touched.insert(variant.product_id);
            }
        }
        for product_id in touched {
            state.refresh_aggregate(product_id)?;
        }

        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Order", id))?;
        order.mark_placed(payment_id, placed_at);
        let placed = order.clone();
        state.cart.retain(|l| l.user_id != placed.user_id);
        Ok(PaymentCommit::Committed(placed))
    }
}

#[async_trait]
impl TryOnStore for InMemoryStore {
    async fn insert_try_on(&self, record: &TryOnRecord) -> Result<()> {
        let mut state = self.state.write().await;
        if record.is_active_job()
            && state
                .try_ons
                .iter()
                .any(|r| r.user_id == record.user_id && r.is_active_job())
        {
            return Err(StoreError::ActiveTryOnJob(record.user_id));
        }
        state.try_ons.push(record.clone());
        Ok(())
    }

    async fn get_try_on(&self, id: TryOnId) -> Result<Option<TryOnRecord>> {
        let state = self.state.read().await;
        Ok(state.try_ons.iter().find(|r| r.id == id).cloned())
    }

    async fn find_active_job(&self, user_id: UserId) -> Result<Option<TryOnRecord>> {
        let state = self.state.read().await;
        Ok(state
            .try_ons
            .iter()
            .find(|r| r.user_id == user_id && r.is_active_job())
            .cloned())
    }

    async fn list_try_ons(&self, user_id: UserId, kind: TryOnKind) -> Result<Vec<TryOnRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<TryOnRecord> = state
            .try_ons
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id && r.kind == kind)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn attach_try_on_request(&self, id: TryOnId, request_id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        match state
            .try_ons
            .iter_mut()
            .find(|r| r.id == id && r.status == TryOnStatus::Processing)
        {
            Some(record) => {
                record.request_id = Some(request_id.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn finish_try_on(
        &self,
        id: TryOnId,
        status: TryOnStatus,
        result_urls: Vec<String>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state
            .try_ons
            .iter_mut()
            .find(|r| r.id == id && r.status == TryOnStatus::Processing)
        {
            Some(record) => {
                record.status = status;
                record.result_urls = result_urls;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_try_on(&self, id: TryOnId) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.try_ons.len();
        state.try_ons.retain(|r| r.id != id);
        Ok(state.try_ons.len() != before)
    }
}

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        let mut state = self.state.write().await;
        for existing in state.users.values() {
            if user.email.is_some() && existing.email == user.email {
                return Err(StoreError::DuplicateAccount { field: "email" });
            }
            if user.phone.is_some() && existing.phone == user.phone {
                return Err(StoreError::DuplicateAccount { field: "phone" });
            }
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.phone.as_deref() == Some(phone))
            .cloned())
    }

    async fn mark_user_verified(&self, id: UserId) -> Result<()> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("User", id))?;
        user.is_verified = true;
        Ok(())
    }

    async fn put_otp(&self, otp: &OtpCode) -> Result<()> {
        let mut state = self.state.write().await;
        state.otps.insert(otp.phone.clone(), otp.clone());
        Ok(())
    }

    async fn get_otp(&self, phone: &str) -> Result<Option<OtpCode>> {
        Ok(self.state.read().await.otps.get(phone).cloned())
    }

    async fn record_otp_failure(&self, phone: &str) -> Result<Option<u32>> {
        let mut state = self.state.write().await;
        Ok(state.otps.get_mut(phone).map(|otp| {
            otp.attempts += 1;
            otp.attempts
        }))
    }

    async fn delete_otp(&self, phone: &str) -> Result<()> {
        self.state.write().await.otps.remove(phone);
        Ok(())
    }
}

#[async_trait]
impl AddressStore for InMemoryStore {
    async fn insert_address(&self, mut address: Address) -> Result<Address> {
        let mut state = self.state.write().await;
        let is_first = !state.addresses.iter().any(|a| a.user_id == address.user_id);
        if is_first {
            address.is_default = true;
        }
        if address.is_default {
            for other in state.user_addresses_mut(address.user_id) {
                other.is_default = false;
            }
        }
        state.addresses.push(address.clone());
        Ok(address)
    }

    async fn get_address(&self, id: AddressId) -> Result<Option<Address>> {
        let state = self.state.read().await;
        Ok(state.addresses.iter().find(|a| a.id == id).cloned())
    }

    async fn list_addresses(&self, user_id: UserId) -> Result<Vec<Address>> {
        let state = self.state.read().await;
        let mut addresses: Vec<Address> = state
            .addresses
            .iter()
            .rev()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        addresses.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(addresses)
    }

    async fn set_default_address(&self, user_id: UserId, id: AddressId) -> Result<Address> {
        let mut state = self.state.write().await;
        if !state
            .addresses
            .iter()
            .any(|a| a.id == id && a.user_id == user_id)
        {
            return Err(StoreError::not_found("Address", id));
        }
        let mut updated = None;
        for address in state.user_addresses_mut(user_id) {
            address.is_default = address.id == id;
            if address.is_default {
                updated = Some(address.clone());
            }
        }
        updated.ok_or_else(|| StoreError::not_found("Address", id))
    }

    async fn delete_address(&self, id: AddressId) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.addresses.len();
        state.addresses.retain(|a| a.id != id);
        Ok(state.addresses.len() != before)
    }
}

#[async_trait]
impl FavoriteStore for InMemoryStore {
    async fn find_favorite(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<Favorite>> {
        let state = self.state.read().await;
        Ok(state
            .favorites
            .iter()
            .find(|f| f.user_id == user_id && f.product_id == product_id)
            .cloned())
    }

    async fn insert_favorite(&self, favorite: &Favorite) -> Result<()> {
        let mut state = self.state.write().await;
        let exists = state
            .favorites
            .iter()
            .any(|f| f.user_id == favorite.user_id && f.product_id == favorite.product_id);
        if !exists {
            state.favorites.push(favorite.clone());
        }
        Ok(())
    }

    async fn delete_favorite(&self, id: FavoriteId) -> Result<()> {
        self.state.write().await.favorites.retain(|f| f.id != id);
        Ok(())
    }

    async fn list_favorites(
        &self,
        user_id: UserId,
        page: u32,
        limit: u32,
    ) -> Result<Page<Product>> {
        let state = self.state.read().await;
        let mut favorites: Vec<&Favorite> = state
            .favorites
            .iter()
            .rev()
            .filter(|f| f.user_id == user_id)
            .collect();
        favorites.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let products: Vec<Product> = favorites
            .into_iter()
            .filter_map(|f| state.products.get(&f.product_id))
            .filter(|p| !p.is_archived)
            .cloned()
            .collect();

        let page = page.max(1);
        let offset = u64::from(page - 1) * u64::from(limit);
        let total = products.len() as u64;
        Ok(Page {
            data: products
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect(),
            total,
            page,
            limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Money;
    use domain::{
        AddressSnapshot, Gender, NewAddress, NewProduct, OrderItem, OrderStatus, PaymentType,
        PricingRules,
    };

    fn new_product(name: &str) -> Product {
        Product::from_new(
            ProductId::new(),
            NewProduct {
                name: name.to_string(),
                description: String::new(),
                price: Money::from_major(100),
                gender: Gender::Unisex,
                category: "Shirts".to_string(),
                brand: "Acme".to_string(),
                images: Vec::new(),
                is_trending: false,
            },
            Utc::now(),
        )
    }

    fn variant(product_id: ProductId, sku: &str, color: &str, stock: i64) -> Variant {
        Variant {
            id: VariantId::new(),
            product_id,
            size: "M".to_string(),
            color: color.to_string(),
            sku: sku.to_string(),
            stock,
            price_override: None,
        }
    }

    fn postal() -> AddressSnapshot {
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

    async fn order_for(store: &InMemoryStore, user_id: UserId, v: &Variant, qty: u32) -> Order {
        let order = Order::create(
            user_id,
            postal(),
            vec![OrderItem {
                variant_id: v.id,
                product_id: v.product_id,
                product_name: "Tee".to_string(),
                size: v.size.clone(),
                color: v.color.clone(),
                unit_price: Money::from_major(100),
                quantity: qty,
                product_image: None,
            }],
            PaymentType::Online,
            &PricingRules::default(),
            Utc::now(),
        )
        .unwrap();
        store.insert_order(&order).await.unwrap();
        order
    }

    #[tokio::test]
    async fn insert_product_computes_aggregates() {
        let store = InMemoryStore::new();
        let product = new_product("Tee");
        let pid = product.id;
        let stored = store
            .insert_product(
                product,
                vec![variant(pid, "A", "Red", 3), variant(pid, "B", "Blue", 4)],
            )
            .await
            .unwrap();
        assert_eq!(stored.stock, 7);
        assert_eq!(stored.colors.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_sku_is_rejected_everywhere() {
        let store = InMemoryStore::new();
        let product = new_product("Tee");
        let pid = product.id;
        store
            .insert_product(product, vec![variant(pid, "A", "Red", 3)])
            .await
            .unwrap();

        let err = store.insert_variant(variant(pid, "A", "Blue", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSku(ref sku) if sku == "A"));

        let other = new_product("Other");
        let oid = other.id;
        let err = store
            .insert_product(other, vec![variant(oid, "X", "Red", 1), variant(oid, "X", "Red", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSku(_)));
        assert!(store.get_product(oid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn variant_mutations_keep_aggregates_in_sync() {
        let store = InMemoryStore::new();
        let product = new_product("Tee");
        let pid = product.id;
        store.insert_product(product, Vec::new()).await.unwrap();

        let red = variant(pid, "A", "Red", 3);
        let p = store.insert_variant(red.clone()).await.unwrap();
        assert_eq!((p.stock, p.colors.clone()), (3, vec!["Red".to_string()]));

        let mut red_updated = red.clone();
        red_updated.stock = 10;
        red_updated.color = "Green".to_string();
        let p = store.save_variant(&red_updated).await.unwrap();
        assert_eq!((p.stock, p.colors.clone()), (10, vec!["Green".to_string()]));

        let p = store.delete_variant(red.id).await.unwrap();
        assert_eq!(p.stock, 0);
        assert!(p.colors.is_empty());
    }

    #[tokio::test]
    async fn save_product_keeps_derived_fields() {
        let store = InMemoryStore::new();
        let product = new_product("Tee");
        let pid = product.id;
        let stored = store
            .insert_product(product, vec![variant(pid, "A", "Red", 3)])
            .await
            .unwrap();

        let mut edited = stored.clone();
        edited.name = "Better Tee".to_string();
        edited.stock = 999;
        store.save_product(&edited).await.unwrap();

        let reloaded = store.get_product(pid).await.unwrap().unwrap();
        assert_eq!(reloaded.name, "Better Tee");
        assert_eq!(reloaded.stock, 3);
    }

    #[tokio::test]
    async fn add_cart_line_merges_same_tuple() {
        let store = InMemoryStore::new();
        let product = new_product("Tee");
        let pid = product.id;
        let v = variant(pid, "M", "Red", 5);
        store.insert_product(product, vec![v.clone()]).await.unwrap();
        let user = UserId::new();
        let line = |qty| CartLine {
            id: CartLineId::new(),
            user_id: user,
            product_id: pid,
            size: "M".to_string(),
            color: "Red".to_string(),
            quantity: qty,
            created_at: Utc::now(),
        };
        let first = store.add_cart_line(line(1), v.id).await.unwrap();
        let merged = store.add_cart_line(line(2), v.id).await.unwrap();
        assert_eq!(merged.id, first.id);
        assert_eq!(merged.quantity, 3);
        assert_eq!(store.list_cart(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn add_cart_line_rejects_merge_past_stock() {
        let store = InMemoryStore::new();
        let product = new_product("Tee");
        let pid = product.id;
        let v = variant(pid, "M", "Red", 3);
        store.insert_product(product, vec![v.clone()]).await.unwrap();
        let user = UserId::new();
        let line = |qty| CartLine {
            id: CartLineId::new(),
            user_id: user,
            product_id: pid,
            size: "M".to_string(),
            color: "Red".to_string(),
            quantity: qty,
            created_at: Utc::now(),
        };
        store.add_cart_line(line(2), v.id).await.unwrap();

        let err = store.add_cart_line(line(2), v.id).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientStock { variant_id, requested: 4 } if variant_id == v.id
        ));
        assert_eq!(store.list_cart(user).await.unwrap()[0].quantity, 2);
    }

    #[tokio::test]
    async fn commit_payment_decrements_and_is_idempotent() {
        let store = InMemoryStore::new();
        let product = new_product("Tee");
        let pid = product.id;
        let v = variant(pid, "A", "Red", 5);
        store.insert_product(product, vec![v.clone()]).await.unwrap();
        let user = UserId::new();
        let order = order_for(&store, user, &v, 2).await;

        let first = store
            .commit_payment(order.id, "pay_1", Utc::now())
            .await
            .unwrap();
        assert!(matches!(first, PaymentCommit::Committed(_)));
        assert_eq!(first.order().status, OrderStatus::Placed);
        assert_eq!(first.order().payment_id.as_deref(), Some("pay_1"));
        assert_eq!(
            first.order().timeline[1].description.as_deref(),
            Some("Payment Confirmed")
        );

        let second = store
            .commit_payment(order.id, "pay_1", Utc::now())
            .await
            .unwrap();
        assert!(matches!(second, PaymentCommit::AlreadyProcessed(_)));
        assert_eq!(second.order().timeline.len(), 2);

        assert_eq!(store.get_variant(v.id).await.unwrap().unwrap().stock, 3);
        assert_eq!(store.get_product(pid).await.unwrap().unwrap().stock, 3);
    }

    #[tokio::test]
    async fn commit_payment_writes_nothing_on_shortfall() {
        let store = InMemoryStore::new();
        let product = new_product("Tee");
        let pid = product.id;
        let plenty = variant(pid, "A", "Red", 5);
        let scarce = variant(pid, "B", "Blue", 1);
        store
            .insert_product(product, vec![plenty.clone(), scarce.clone()])
            .await
            .unwrap();

        let user = UserId::new();
        let order = Order::create(
            user,
            postal(),
            vec![
                OrderItem {
                    variant_id: plenty.id,
                    product_id: pid,
                    product_name: "Tee".to_string(),
                    size: "M".to_string(),
                    color: "Red".to_string(),
                    unit_price: Money::from_major(100),
                    quantity: 2,
                    product_image: None,
                },
                OrderItem {
                    variant_id: scarce.id,
                    product_id: pid,
                    product_name: "Tee".to_string(),
                    size: "M".to_string(),
                    color: "Blue".to_string(),
                    unit_price: Money::from_major(100),
                    quantity: 2,
                    product_image: None,
                },
            ],
            PaymentType::Online,
            &PricingRules::default(),
            Utc::now(),
        )
        .unwrap();
        store.insert_order(&order).await.unwrap();

        let err = store
            .commit_payment(order.id, "pay_1", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientStock { variant_id, requested: 2 } if variant_id == scarce.id
        ));
        assert_eq!(store.get_variant(plenty.id).await.unwrap().unwrap().stock, 5);
        let reloaded = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn only_one_active_try_on_job_per_user() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let job = || {
            TryOnRecord::processing(
                user,
                Vec::new(),
                Vec::new(),
                "tops".to_string(),
                None,
                Utc::now(),
            )
        };
        let first = job();
        store.insert_try_on(&first).await.unwrap();
        let err = store.insert_try_on(&job()).await.unwrap_err();
        assert!(matches!(err, StoreError::ActiveTryOnJob(u) if u == user));
        assert!(store.attach_try_on_request(first.id, "req").await.unwrap());
        assert_eq!(
            store.get_try_on(first.id).await.unwrap().unwrap().request_id.as_deref(),
            Some("req")
        );

        assert!(
            store
                .finish_try_on(first.id, TryOnStatus::Failed, Vec::new())
                .await
                .unwrap()
        );
        store.insert_try_on(&job()).await.unwrap();
        assert!(
            !store
                .finish_try_on(first.id, TryOnStatus::Completed, Vec::new())
                .await
                .unwrap()
        );
        assert!(!store.attach_try_on_request(first.id, "late").await.unwrap());
    }

    #[tokio::test]
    async fn first_address_becomes_default() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let new = |is_default| {
            Address::from_new(
                user,
                NewAddress {
                    postal: postal(),
                    is_default,
                },
                Utc::now(),
            )
        };
        let first = store.insert_address(new(false)).await.unwrap();
        assert!(first.is_default);
        let second = store.insert_address(new(true)).await.unwrap();
        assert!(second.is_default);

        let listed = store.list_addresses(user).await.unwrap();
        assert_eq!(listed[0].id, second.id);
        assert!(!listed[1].is_default);

        let first = store.set_default_address(user, first.id).await.unwrap();
        assert!(first.is_default);
        let listed = store.list_addresses(user).await.unwrap();
        assert_eq!(listed.iter().filter(|a| a.is_default).count(), 1);
    }

    #[tokio::test]
    async fn duplicate_phone_is_rejected() {
        let store = InMemoryStore::new();
        let user = |email: &str| User {
            id: UserId::new(),
            name: "Asha".to_string(),
            email: Some(email.to_string()),
            phone: Some("9000000001".to_string()),
            role: domain::Role::User,
            is_verified: false,
            created_at: Utc::now(),
        };
        store.insert_user(&user("a@example.com")).await.unwrap();
        let err = store.insert_user(&user("b@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateAccount { field: "phone" }));
    }
}
