use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AddressId, CartLineId, FavoriteId, OrderId, ProductId, TryOnId, UserId, VariantId};
use domain::{
    Address, CartLine, Favorite, Order, OtpCode, Page, Product, ProductFilter, TimelineEntry,
    TryOnKind, TryOnRecord, TryOnStatus, User, Variant,
};

use crate::Result;

/// Outcome of [`OrderStore::commit_payment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentCommit {
    /// Stock was decremented, the order placed and the cart cleared.
    Committed(Order),
    /// The order was no longer `Pending`; nothing was written.
    AlreadyProcessed(Order),
}

impl PaymentCommit {
    pub fn order(&self) -> &Order {
        match self {
            PaymentCommit::Committed(order) | PaymentCommit::AlreadyProcessed(order) => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            PaymentCommit::Committed(order) | PaymentCommit::AlreadyProcessed(order) => order,
        }
    }
}

/// Products and variants.
///
/// Every variant write recomputes the parent's stock and color aggregates in
/// the same write, so `Product.stock == Σ Variant.stock` holds between calls.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Inserts a product with its initial variants.
    ///
    /// Fails with `DuplicateSku` if any SKU is already registered (or repeated
    /// in `variants`). Returns the product with its aggregates applied.
    async fn insert_product(&self, product: Product, variants: Vec<Variant>) -> Result<Product>;

    /// Loads a product, archived or not.
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Writes a product's own fields. Derived aggregates are left untouched.
    async fn save_product(&self, product: &Product) -> Result<()>;

    /// Lists non-archived products matching `filter`.
    async fn list_products(&self, filter: &ProductFilter) -> Result<Page<Product>>;

    /// Keyword search over non-archived products.
    async fn search_products(&self, keyword: &str, limit: u32) -> Result<Vec<Product>>;

    /// Trending non-archived products, most recently updated first.
    async fn trending_products(&self, limit: u32) -> Result<Vec<Product>>;

    /// Distinct categories of non-archived products, sorted.
    async fn categories(&self) -> Result<Vec<String>>;

    /// Distinct brands of non-archived products, sorted.
    async fn brands(&self) -> Result<Vec<String>>;

    /// Inserts a variant and returns the parent with refreshed aggregates.
    async fn insert_variant(&self, variant: Variant) -> Result<Product>;

    async fn get_variant(&self, id: VariantId) -> Result<Option<Variant>>;

    /// Resolves the variant of `product_id` with the given size and color.
    async fn find_variant(
        &self,
        product_id: ProductId,
        size: &str,
        color: &str,
    ) -> Result<Option<Variant>>;

    async fn list_variants(&self, product_id: ProductId) -> Result<Vec<Variant>>;

    /// Overwrites a variant and returns the parent with refreshed aggregates.
    async fn save_variant(&self, variant: &Variant) -> Result<Product>;

    /// Deletes a variant and returns the parent with refreshed aggregates.
    async fn delete_variant(&self, id: VariantId) -> Result<Product>;
}

/// Per-user cart lines.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Inserts `line`, or adds its quantity to the existing line with the same
    /// (user, product, size, color). Returns the stored line.
    ///
    /// The merged quantity is checked against the stock of `variant_id` in the
    /// same write; when it does not fit, nothing is written and
    /// `InsufficientStock` carries the merged quantity.
    async fn add_cart_line(&self, line: CartLine, variant_id: VariantId) -> Result<CartLine>;

    async fn get_cart_line(&self, id: CartLineId) -> Result<Option<CartLine>>;

    /// All lines of a user's cart, oldest first.
    async fn list_cart(&self, user_id: UserId) -> Result<Vec<CartLine>>;

    async fn set_cart_quantity(&self, id: CartLineId, quantity: u32) -> Result<CartLine>;

    /// Returns false if the line did not exist.
    async fn delete_cart_line(&self, id: CartLineId) -> Result<bool>;

    /// Deletes every line of a user's cart and returns how many were removed.
    async fn clear_cart(&self, user_id: UserId) -> Result<u64>;
}

/// Orders, their items and timelines.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists an order with its items and timeline as one unit.
    async fn insert_order(&self, order: &Order) -> Result<()>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// A user's orders, newest first.
    async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>>;

    async fn set_merchant_transaction(&self, id: OrderId, transaction_id: &str) -> Result<()>;

    /// Moves the order to `entry.status` and appends `entry` to its timeline.
    async fn append_status(&self, id: OrderId, entry: TimelineEntry) -> Result<Order>;

    /// Confirms payment of a `Pending` order in one transaction.
    ///
    /// Decrements every ordered variant (failing with `InsufficientStock`
    /// when any decrement would go negative), refreshes the affected product
    /// aggregates, marks the order placed at `placed_at` with `payment_id`
    /// and clears the owner's cart. On failure nothing is written. Orders
    /// that are no longer `Pending` are returned unchanged as
    /// `AlreadyProcessed`.
    async fn commit_payment(
        &self,
        id: OrderId,
        payment_id: &str,
        placed_at: DateTime<Utc>,
    ) -> Result<PaymentCommit>;
}

/// Try-on uploads and generation jobs.
#[async_trait]
pub trait TryOnStore: Send + Sync {
    /// Inserts a record.
    ///
    /// Fails with `ActiveTryOnJob` if `record` is a processing generation job
    /// and the user already has one.
    async fn insert_try_on(&self, record: &TryOnRecord) -> Result<()>;

    async fn get_try_on(&self, id: TryOnId) -> Result<Option<TryOnRecord>>;

    /// The user's processing generation job, if any.
    async fn find_active_job(&self, user_id: UserId) -> Result<Option<TryOnRecord>>;

    /// A user's records of one kind, newest first.
    async fn list_try_ons(&self, user_id: UserId, kind: TryOnKind) -> Result<Vec<TryOnRecord>>;

    /// Stores the provider's request id on a processing record.
    ///
    /// Returns false if the record is gone or no longer processing.
    async fn attach_try_on_request(&self, id: TryOnId, request_id: &str) -> Result<bool>;

    /// Moves a processing record to a terminal status.
    ///
    /// Returns false if the record is gone or no longer processing.
    async fn finish_try_on(
        &self,
        id: TryOnId,
        status: TryOnStatus,
        result_urls: Vec<String>,
    ) -> Result<bool>;

    /// Returns false if the record did not exist.
    async fn delete_try_on(&self, id: TryOnId) -> Result<bool>;
}

/// Accounts and one-time login codes.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fails with `DuplicateAccount` on a taken email or phone.
    async fn insert_user(&self, user: &User) -> Result<()>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>>;

    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<User>>;

    async fn mark_user_verified(&self, id: UserId) -> Result<()>;

    /// Stores a code, replacing any earlier code for the same phone.
    async fn put_otp(&self, otp: &OtpCode) -> Result<()>;

    async fn get_otp(&self, phone: &str) -> Result<Option<OtpCode>>;

    /// Counts a wrong guess against the phone's code and returns the new
    /// count, or `None` when the phone has no code.
    async fn record_otp_failure(&self, phone: &str) -> Result<Option<u32>>;

    async fn delete_otp(&self, phone: &str) -> Result<()>;
}

/// Saved shipping addresses.
#[async_trait]
pub trait AddressStore: Send + Sync {
    /// Inserts an address. The user's first address, or one flagged default,
    /// becomes the only default. Returns the stored address.
    async fn insert_address(&self, address: Address) -> Result<Address>;

    async fn get_address(&self, id: AddressId) -> Result<Option<Address>>;

    /// A user's addresses, default first, then newest.
    async fn list_addresses(&self, user_id: UserId) -> Result<Vec<Address>>;

    /// Makes `id` the user's only default address.
    async fn set_default_address(&self, user_id: UserId, id: AddressId) -> Result<Address>;

    /// Returns false if the address did not exist.
    async fn delete_address(&self, id: AddressId) -> Result<bool>;
}

/// Favorite markers.
#[async_trait]
pub trait FavoriteStore: Send + Sync {
    async fn find_favorite(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<Favorite>>;

    async fn insert_favorite(&self, favorite: &Favorite) -> Result<()>;

    async fn delete_favorite(&self, id: FavoriteId) -> Result<()>;

    /// A user's favorite non-archived products, newest first. Pages are
    /// 1-based.
    async fn list_favorites(&self, user_id: UserId, page: u32, limit: u32)
    -> Result<Page<Product>>;
}

/// Everything the services need from persistence.
pub trait Store:
    CatalogStore + CartStore + OrderStore + TryOnStore + AccountStore + AddressStore + FavoriteStore
{
}

impl<T> Store for T where
    T: CatalogStore
        + CartStore
        + OrderStore
        + TryOnStore
        + AccountStore
        + AddressStore
        + FavoriteStore
{
}
