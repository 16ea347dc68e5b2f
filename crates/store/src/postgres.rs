use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    AddressId, CartLineId, FavoriteId, Money, OrderId, ProductId, TryOnId, UserId, VariantId,
};
use domain::{
    Address, AddressSnapshot, CartLine, DomainError, Favorite, Order, OrderItem, OtpCode, Page,
    PriceBreakdown, Product, ProductFilter, ProductSort, TimelineEntry, TryOnKind, TryOnRecord,
    TryOnStatus, User, Variant,
};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{
        AccountStore, AddressStore, CartStore, CatalogStore, FavoriteStore, OrderStore,
        PaymentCommit, TryOnStore,
    },
};

const PRODUCT_COLUMNS: &str = "id, name, description, price_minor, gender, category, brand, \
     stock, colors, images, is_trending, is_archived, created_at, updated_at";

const VARIANT_COLUMNS: &str = "id, product_id, size, color, sku, stock, price_override_minor";

const CART_COLUMNS: &str = "id, user_id, product_id, size, color, quantity, created_at";

const TRY_ON_COLUMNS: &str = "id, user_id, product_id, kind, status, request_id, source_urls, \
     garment_urls, result_urls, category, created_at";

const ADDRESS_COLUMNS: &str = "id, user_id, full_name, phone, line1, line2, city, state, \
     postal_code, country, is_default, created_at";

const USER_COLUMNS: &str = "id, name, email, phone, role, is_verified, created_at";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn constraint(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint(),
        _ => None,
    }
}

fn quantity_from_db(value: i64) -> Result<u32> {
    u32::try_from(value)
        .ok()
        .filter(|q| *q > 0)
        .ok_or(StoreError::InvalidValue(DomainError::InvalidQuantity { quantity: 0 }))
}

fn row_to_product(row: &PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price: Money::from_minor(row.try_get("price_minor")?),
        gender: row.try_get::<String, _>("gender")?.parse()?,
        category: row.try_get("category")?,
        brand: row.try_get("brand")?,
        stock: row.try_get("stock")?,
        colors: row.try_get("colors")?,
        images: row.try_get("images")?,
        is_trending: row.try_get("is_trending")?,
        is_archived: row.try_get("is_archived")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_variant(row: &PgRow) -> Result<Variant> {
    Ok(Variant {
        id: VariantId::from_uuid(row.try_get("id")?),
        product_id: ProductId::from_uuid(row.try_get("product_id")?),
        size: row.try_get("size")?,
        color: row.try_get("color")?,
        sku: row.try_get("sku")?,
        stock: row.try_get("stock")?,
        price_override: row
            .try_get::<Option<i64>, _>("price_override_minor")?
            .map(Money::from_minor),
    })
}

fn row_to_cart_line(row: &PgRow) -> Result<CartLine> {
    Ok(CartLine {
        id: CartLineId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        product_id: ProductId::from_uuid(row.try_get("product_id")?),
        size: row.try_get("size")?,
        color: row.try_get("color")?,
        quantity: quantity_from_db(row.try_get("quantity")?)?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_try_on(row: &PgRow) -> Result<TryOnRecord> {
    Ok(TryOnRecord {
        id: TryOnId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        product_id: row
            .try_get::<Option<Uuid>, _>("product_id")?
            .map(ProductId::from_uuid),
        kind: row.try_get::<String, _>("kind")?.parse()?,
        status: row.try_get::<String, _>("status")?.parse()?,
        request_id: row.try_get("request_id")?,
        source_urls: row.try_get("source_urls")?,
        garment_urls: row.try_get("garment_urls")?,
        result_urls: row.try_get("result_urls")?,
        category: row.try_get("category")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_address(row: &PgRow) -> Result<Address> {
    Ok(Address {
        id: AddressId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        postal: AddressSnapshot {
            full_name: row.try_get("full_name")?,
            phone: row.try_get("phone")?,
            line1: row.try_get("line1")?,
            line2: row.try_get("line2")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            postal_code: row.try_get("postal_code")?,
            country: row.try_get("country")?,
        },
        is_default: row.try_get("is_default")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_user(row: &PgRow) -> Result<User> {
    Ok(User {
        id: UserId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        role: row.try_get::<String, _>("role")?.parse()?,
        is_verified: row.try_get("is_verified")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_favorite(row: &PgRow) -> Result<Favorite> {
    Ok(Favorite {
        id: FavoriteId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        product_id: ProductId::from_uuid(row.try_get("product_id")?),
        created_at: row.try_get("created_at")?,
    })
}

/// Recomputes the stock sum and sorted distinct colors of one product.
async fn refresh_aggregate(conn: &mut PgConnection, product_id: ProductId) -> Result<Product> {
    let sql = format!(
        r#"
        UPDATE products SET
            stock = COALESCE(
                (SELECT SUM(stock) FROM product_variants WHERE product_id = $1), 0
            )::BIGINT,
            colors = ARRAY(
                SELECT c FROM (
                    SELECT DISTINCT color COLLATE "C" AS c
                    FROM product_variants WHERE product_id = $1
                ) d
                ORDER BY c
            )
        WHERE id = $1
        RETURNING {PRODUCT_COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(product_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| StoreError::not_found("Product", product_id))?;
    row_to_product(&row)
}

async fn insert_variant_row(conn: &mut PgConnection, variant: &Variant) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO product_variants (id, product_id, size, color, sku, stock, price_override_minor)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(variant.id.as_uuid())
    .bind(variant.product_id.as_uuid())
    .bind(&variant.size)
    .bind(&variant.color)
    .bind(&variant.sku)
    .bind(variant.stock)
    .bind(variant.price_override.map(|p| p.minor()))
    .execute(&mut *conn)
    .await
    .map_err(|e| match constraint(&e) {
        Some("unique_variant_sku") => StoreError::DuplicateSku(variant.sku.clone()),
        Some("product_variants_product_id_fkey") => {
            StoreError::not_found("Product", variant.product_id)
        }
        _ => StoreError::Database(e),
    })?;
    Ok(())
}

async fn fetch_order(conn: &mut PgConnection, id: OrderId) -> Result<Option<Order>> {
    let Some(row) = sqlx::query(
        r#"
        SELECT id, order_number, user_id, shipping_address, items_total_minor,
               shipping_cost_minor, tax_amount_minor, total_amount_minor, payment_type,
               status, payment_id, merchant_transaction_id, estimated_delivery_at,
               delivered_at, created_at, updated_at
        FROM orders
        WHERE id = $1
        "#,
    )
    .bind(id.as_uuid())
    .fetch_optional(&mut *conn)
    .await?
    else {
        return Ok(None);
    };

    let item_rows = sqlx::query(
        r#"
        SELECT variant_id, product_id, product_name, size, color, unit_price_minor,
               quantity, product_image
        FROM order_items
        WHERE order_id = $1
        ORDER BY position ASC
        "#,
    )
    .bind(id.as_uuid())
    .fetch_all(&mut *conn)
    .await?;

    let timeline_rows = sqlx::query(
        r#"
        SELECT status, description, created_at
        FROM order_timeline
        WHERE order_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(id.as_uuid())
    .fetch_all(&mut *conn)
    .await?;

    let items = item_rows
        .iter()
        .map(|r| {
            Ok(OrderItem {
                variant_id: VariantId::from_uuid(r.try_get("variant_id")?),
                product_id: ProductId::from_uuid(r.try_get("product_id")?),
                product_name: r.try_get("product_name")?,
                size: r.try_get("size")?,
                color: r.try_get("color")?,
                unit_price: Money::from_minor(r.try_get("unit_price_minor")?),
                quantity: quantity_from_db(r.try_get("quantity")?)?,
                product_image: r.try_get("product_image")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let timeline = timeline_rows
        .iter()
        .map(|r| {
            Ok(TimelineEntry {
                status: r.try_get::<String, _>("status")?.parse()?,
                description: r.try_get("description")?,
                created_at: r.try_get("created_at")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let address: serde_json::Value = row.try_get("shipping_address")?;
    Ok(Some(Order {
        id: OrderId::from_uuid(row.try_get("id")?),
        order_number: row.try_get("order_number")?,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        shipping_address: serde_json::from_value(address)?,
        items,
        pricing: PriceBreakdown {
            items_total: Money::from_minor(row.try_get("items_total_minor")?),
            shipping_cost: Money::from_minor(row.try_get("shipping_cost_minor")?),
            tax_amount: Money::from_minor(row.try_get("tax_amount_minor")?),
            total_amount: Money::from_minor(row.try_get("total_amount_minor")?),
        },
        payment_type: row.try_get::<String, _>("payment_type")?.parse()?,
        status: row.try_get::<String, _>("status")?.parse()?,
        payment_id: row.try_get("payment_id")?,
        merchant_transaction_id: row.try_get("merchant_transaction_id")?,
        estimated_delivery_at: row.try_get("estimated_delivery_at")?,
        delivered_at: row.try_get("delivered_at")?,
        timeline,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

async fn insert_timeline_row(
    conn: &mut PgConnection,
    id: OrderId,
    entry: &TimelineEntry,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO order_timeline (order_id, status, description, created_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(id.as_uuid())
    .bind(entry.status.as_str())
    .bind(&entry.description)
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn push_product_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &ProductFilter) {
    builder.push(" WHERE is_archived = FALSE");
    if let Some(gender) = filter.gender {
        builder.push(" AND gender = ").push_bind(gender.as_str());
    }
    if let Some(ref category) = filter.category {
        builder.push(" AND category = ").push_bind(category.clone());
    }
    if let Some(ref brand) = filter.brand {
        builder.push(" AND brand = ").push_bind(brand.clone());
    }
    if let Some(min) = filter.min_price {
        builder.push(" AND price_minor >= ").push_bind(min.minor());
    }
    if let Some(max) = filter.max_price {
        builder.push(" AND price_minor <= ").push_bind(max.minor());
    }
}

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn insert_product(&self, product: Product, variants: Vec<Variant>) -> Result<Product> {
        let mut seen = BTreeSet::new();
        if let Some(dup) = variants.iter().find(|v| !seen.insert(v.sku.as_str())) {
            return Err(StoreError::DuplicateSku(dup.sku.clone()));
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, price_minor, gender, category, brand,
                                  images, is_trending, is_archived, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price.minor())
        .bind(product.gender.as_str())
        .bind(&product.category)
        .bind(&product.brand)
        .bind(&product.images)
        .bind(product.is_trending)
        .bind(product.is_archived)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *tx)
        .await?;

        for variant in &variants {
            insert_variant_row(&mut tx, variant).await?;
        }

        let stored = refresh_aggregate(&mut tx, product.id).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_product).transpose()
    }

    async fn save_product(&self, product: &Product) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE products SET
                name = $2, description = $3, price_minor = $4, gender = $5, category = $6,
                brand = $7, images = $8, is_trending = $9, is_archived = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price.minor())
        .bind(product.gender.as_str())
        .bind(&product.category)
        .bind(&product.brand)
        .bind(&product.images)
        .bind(product.is_trending)
        .bind(product.is_archived)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Product", product.id));
        }
        Ok(())
    }

    async fn list_products(&self, filter: &ProductFilter) -> Result<Page<Product>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS total FROM products");
        push_product_filters(&mut count, filter);
        let total: i64 = count.build().fetch_one(&self.pool).await?.try_get("total")?;

        let mut query =
            QueryBuilder::<Postgres>::new(format!("SELECT {PRODUCT_COLUMNS} FROM products"));
        push_product_filters(&mut query, filter);
        query.push(match filter.sort {
            ProductSort::Name => " ORDER BY name ASC, id ASC",
            ProductSort::Newest => " ORDER BY created_at DESC, id ASC",
            ProductSort::PriceAsc => " ORDER BY price_minor ASC, id ASC",
            ProductSort::PriceDesc => " ORDER BY price_minor DESC, id ASC",
        });
        query
            .push(" LIMIT ")
            .push_bind(i64::from(filter.limit))
            .push(" OFFSET ")
            .push_bind(filter.offset() as i64);

        let rows = query.build().fetch_all(&self.pool).await?;
        Ok(Page {
            data: rows.iter().map(row_to_product).collect::<Result<_>>()?,
            total: total as u64,
            page: filter.page.max(1),
            limit: filter.limit,
        })
    }

    async fn search_products(&self, keyword: &str, limit: u32) -> Result<Vec<Product>> {
        let sql = format!(
            r#"
            SELECT {PRODUCT_COLUMNS} FROM products
            WHERE is_archived = FALSE
              AND (name ILIKE $1 OR description ILIKE $1 OR brand ILIKE $1)
            ORDER BY name ASC, id ASC
            LIMIT $2
            "#
        );
        let escaped = keyword
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let rows = sqlx::query(&sql)
            .bind(format!("%{escaped}%"))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_product).collect()
    }

    async fn trending_products(&self, limit: u32) -> Result<Vec<Product>> {
        let sql = format!(
            r#"
            SELECT {PRODUCT_COLUMNS} FROM products
            WHERE is_archived = FALSE AND is_trending = TRUE
            ORDER BY updated_at DESC
            LIMIT $1
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_product).collect()
    }

    async fn categories(&self) -> Result<Vec<String>> {
        Ok(sqlx::query_scalar(
            r#"SELECT DISTINCT category COLLATE "C" FROM products WHERE is_archived = FALSE ORDER BY 1"#,
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn brands(&self) -> Result<Vec<String>> {
        Ok(sqlx::query_scalar(
            r#"SELECT DISTINCT brand COLLATE "C" FROM products WHERE is_archived = FALSE ORDER BY 1"#,
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_variant(&self, variant: Variant) -> Result<Product> {
        let mut tx = self.pool.begin().await?;
        insert_variant_row(&mut tx, &variant).await?;
        let product = refresh_aggregate(&mut tx, variant.product_id).await?;
        tx.commit().await?;
        Ok(product)
    }

    async fn get_variant(&self, id: VariantId) -> Result<Option<Variant>> {
        let sql = format!("SELECT {VARIANT_COLUMNS} FROM product_variants WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_variant).transpose()
    }

    async fn find_variant(
        &self,
        product_id: ProductId,
        size: &str,
        color: &str,
    ) -> Result<Option<Variant>> {
        let sql = format!(
            "SELECT {VARIANT_COLUMNS} FROM product_variants \
             WHERE product_id = $1 AND size = $2 AND color = $3 LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(product_id.as_uuid())
            .bind(size)
            .bind(color)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_variant).transpose()
    }

    async fn list_variants(&self, product_id: ProductId) -> Result<Vec<Variant>> {
        let sql = format!(
            "SELECT {VARIANT_COLUMNS} FROM product_variants WHERE product_id = $1 ORDER BY sku ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(product_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_variant).collect()
    }

    async fn save_variant(&self, variant: &Variant) -> Result<Product> {
        let mut tx = self.pool.begin().await?;
        let product_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE product_variants
            SET size = $2, color = $3, stock = $4, price_override_minor = $5
            WHERE id = $1
            RETURNING product_id
            "#,
        )
        .bind(variant.id.as_uuid())
        .bind(&variant.size)
        .bind(&variant.color)
        .bind(variant.stock)
        .bind(variant.price_override.map(|p| p.minor()))
        .fetch_optional(&mut *tx)
        .await?;

        let product_id = product_id.ok_or_else(|| StoreError::not_found("Variant", variant.id))?;
        let product = refresh_aggregate(&mut tx, ProductId::from_uuid(product_id)).await?;
        tx.commit().await?;
        Ok(product)
    }

    async fn delete_variant(&self, id: VariantId) -> Result<Product> {
        let mut tx = self.pool.begin().await?;
        let product_id: Option<Uuid> =
            sqlx::query_scalar("DELETE FROM product_variants WHERE id = $1 RETURNING product_id")
                .bind(id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;

        let product_id = product_id.ok_or_else(|| StoreError::not_found("Variant", id))?;
        let product = refresh_aggregate(&mut tx, ProductId::from_uuid(product_id)).await?;
        tx.commit().await?;
        Ok(product)
    }
}

#[async_trait]
impl CartStore for PostgresStore {
    async fn add_cart_line(&self, line: CartLine, variant_id: VariantId) -> Result<CartLine> {
        let mut tx = self.pool.begin().await?;

        // Adds against the same variant queue on this lock until commit.
        let stock: Option<i64> =
            sqlx::query_scalar("SELECT stock FROM product_variants WHERE id = $1 FOR UPDATE")
                .bind(variant_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        let stock = stock.ok_or_else(|| StoreError::not_found("Variant", variant_id))?;

        let existing: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT quantity FROM cart_lines
            WHERE user_id = $1 AND product_id = $2 AND size = $3 AND color = $4
            "#,
        )
        .bind(line.user_id.as_uuid())
        .bind(line.product_id.as_uuid())
        .bind(&line.size)
        .bind(&line.color)
        .fetch_optional(&mut *tx)
        .await?;
        let merged = existing.unwrap_or(0) + i64::from(line.quantity);
        if merged > stock {
            tx.rollback().await?;
            return Err(StoreError::InsufficientStock {
                variant_id,
                requested: quantity_from_db(merged)?,
            });
        }

        let sql = format!(
            r#"
            INSERT INTO cart_lines (id, user_id, product_id, size, color, quantity, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT ON CONSTRAINT unique_cart_line
            DO UPDATE SET quantity = cart_lines.quantity + EXCLUDED.quantity
            RETURNING {CART_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(line.id.as_uuid())
            .bind(line.user_id.as_uuid())
            .bind(line.product_id.as_uuid())
            .bind(&line.size)
            .bind(&line.color)
            .bind(i64::from(line.quantity))
            .bind(line.created_at)
            .fetch_one(&mut *tx)
            .await?;
        let stored = row_to_cart_line(&row)?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn get_cart_line(&self, id: CartLineId) -> Result<Option<CartLine>> {
        let sql = format!("SELECT {CART_COLUMNS} FROM cart_lines WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_cart_line).transpose()
    }

    async fn list_cart(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        let sql = format!(
            "SELECT {CART_COLUMNS} FROM cart_lines WHERE user_id = $1 ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_cart_line).collect()
    }

    async fn set_cart_quantity(&self, id: CartLineId, quantity: u32) -> Result<CartLine> {
        let sql =
            format!("UPDATE cart_lines SET quantity = $2 WHERE id = $1 RETURNING {CART_COLUMNS}");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(i64::from(quantity))
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("Cart line", id))?;
        row_to_cart_line(&row)
    }

    async fn delete_cart_line(&self, id: CartLineId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cart_lines WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_lines WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, user_id, shipping_address, items_total_minor,
                                shipping_cost_minor, tax_amount_minor, total_amount_minor,
                                payment_type, status, payment_id, merchant_transaction_id,
                                estimated_delivery_at, delivered_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(&order.order_number)
        .bind(order.user_id.as_uuid())
        .bind(serde_json::to_value(&order.shipping_address)?)
        .bind(order.pricing.items_total.minor())
        .bind(order.pricing.shipping_cost.minor())
        .bind(order.pricing.tax_amount.minor())
        .bind(order.pricing.total_amount.minor())
        .bind(order.payment_type.as_str())
        .bind(order.status.as_str())
        .bind(&order.payment_id)
        .bind(&order.merchant_transaction_id)
        .bind(order.estimated_delivery_at)
        .bind(order.delivered_at)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, position, variant_id, product_id, product_name,
                                         size, color, unit_price_minor, quantity, product_image)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(position as i32)
            .bind(item.variant_id.as_uuid())
            .bind(item.product_id.as_uuid())
            .bind(&item.product_name)
            .bind(&item.size)
            .bind(&item.color)
            .bind(item.unit_price.minor())
            .bind(i64::from(item.quantity))
            .bind(&item.product_image)
            .execute(&mut *tx)
            .await?;
        }

        for entry in &order.timeline {
            insert_timeline_row(&mut tx, order.id, entry).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, id).await
    }

    async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM orders WHERE user_id = $1 ORDER BY created_at DESC, id ASC",
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let mut conn = self.pool.acquire().await?;
        let mut orders = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(order) = fetch_order(&mut conn, OrderId::from_uuid(id)).await? {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    async fn set_merchant_transaction(&self, id: OrderId, transaction_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE orders SET merchant_transaction_id = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(transaction_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Order", id));
        }
        Ok(())
    }

    async fn append_status(&self, id: OrderId, entry: TimelineEntry) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let mut order = fetch_order(&mut tx, id)
            .await?
            .ok_or_else(|| StoreError::not_found("Order", id))?;
        order.record(entry.clone());

        sqlx::query(
            "UPDATE orders SET status = $2, delivered_at = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(order.status.as_str())
        .bind(order.delivered_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;
        insert_timeline_row(&mut tx, id, &entry).await?;

        tx.commit().await?;
        Ok(order)
    }

    async fn commit_payment(
        &self,
        id: OrderId,
        payment_id: &str,
        placed_at: DateTime<Utc>,
    ) -> Result<PaymentCommit> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent confirmations of the same order.
        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM orders WHERE id = $1 FOR UPDATE")
                .bind(id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(StoreError::not_found("Order", id));
        }

        let mut order = fetch_order(&mut tx, id)
            .await?
            .ok_or_else(|| StoreError::not_found("Order", id))?;
        if !order.status.awaits_payment() {
            tx.rollback().await?;
            return Ok(PaymentCommit::AlreadyProcessed(order));
        }

        // Lock variants in a fixed order so overlapping orders cannot deadlock.
        let mut quantities = order.quantities();
        quantities.sort_by_key(|(variant_id, _)| *variant_id);

        let mut touched = BTreeSet::new();
        for (variant_id, quantity) in quantities {
            let product_id: Option<Uuid> = sqlx::query_scalar(
                r#"
                UPDATE product_variants
                SET stock = stock - $2
                WHERE id = $1 AND stock >= $2
                RETURNING product_id
                "#,
            )
            .bind(variant_id.as_uuid())
            .bind(i64::from(quantity))
            .fetch_optional(&mut *tx)
            .await?;

            match product_id {
                Some(product_id) => {
                    touched.insert(ProductId::from_uuid(product_id));
                }
                None => {
                    tracing::debug!(%id, %variant_id, quantity, "stock decrement rejected");
                    tx.rollback().await?;
                    return Err(StoreError::InsufficientStock {
                        variant_id,
                        requested: quantity,
                    });
                }
            }
        }

        for product_id in touched {
            refresh_aggregate(&mut tx, product_id).await?;
        }

        order.mark_placed(payment_id, placed_at);

        sqlx::query(
            "UPDATE orders SET status = $2, payment_id = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(order.status.as_str())
        .bind(payment_id)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;
        if let Some(entry) = order.timeline.last() {
            insert_timeline_row(&mut tx, id, entry).await?;
        }

        sqlx::query("DELETE FROM cart_lines WHERE user_id = $1")
            .bind(order.user_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(PaymentCommit::Committed(order))
    }
}

#[async_trait]
impl TryOnStore for PostgresStore {
    async fn insert_try_on(&self, record: &TryOnRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO try_ons (id, user_id, product_id, kind, status, request_id, source_urls,
                                 garment_urls, result_urls, category, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.user_id.as_uuid())
        .bind(record.product_id.map(|p| p.as_uuid()))
        .bind(record.kind.as_str())
        .bind(record.status.as_str())
        .bind(&record.request_id)
        .bind(&record.source_urls)
        .bind(&record.garment_urls)
        .bind(&record.result_urls)
        .bind(&record.category)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match constraint(&e) {
            Some("unique_active_try_on") => StoreError::ActiveTryOnJob(record.user_id),
            _ => StoreError::Database(e),
        })?;
        Ok(())
    }

    async fn get_try_on(&self, id: TryOnId) -> Result<Option<TryOnRecord>> {
        let sql = format!("SELECT {TRY_ON_COLUMNS} FROM try_ons WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_try_on).transpose()
    }

    async fn find_active_job(&self, user_id: UserId) -> Result<Option<TryOnRecord>> {
        let sql = format!(
            "SELECT {TRY_ON_COLUMNS} FROM try_ons \
             WHERE user_id = $1 AND kind = 'GENERATED' AND status = 'PROCESSING'"
        );
        let row = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_try_on).transpose()
    }

    async fn list_try_ons(&self, user_id: UserId, kind: TryOnKind) -> Result<Vec<TryOnRecord>> {
        let sql = format!(
            "SELECT {TRY_ON_COLUMNS} FROM try_ons \
             WHERE user_id = $1 AND kind = $2 ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_try_on).collect()
    }

    async fn attach_try_on_request(&self, id: TryOnId, request_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE try_ons SET request_id = $2 WHERE id = $1 AND status = 'PROCESSING'",
        )
        .bind(id.as_uuid())
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn finish_try_on(
        &self,
        id: TryOnId,
        status: TryOnStatus,
        result_urls: Vec<String>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE try_ons SET status = $2, result_urls = $3
            WHERE id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(&result_urls)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_try_on(&self, id: TryOnId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM try_ons WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AccountStore for PostgresStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, phone, role, is_verified, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(user.role.as_str())
        .bind(user.is_verified)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match constraint(&e) {
            Some("unique_user_email") => StoreError::DuplicateAccount { field: "email" },
            Some("unique_user_phone") => StoreError::DuplicateAccount { field: "phone" },
            _ => StoreError::Database(e),
        })?;
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE phone = $1");
        let row = sqlx::query(&sql)
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn mark_user_verified(&self, id: UserId) -> Result<()> {
        let result = sqlx::query("UPDATE users SET is_verified = TRUE WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("User", id));
        }
        Ok(())
    }

    async fn put_otp(&self, otp: &OtpCode) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO otp_codes (phone, code, expires_at, attempts)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (phone) DO UPDATE
            SET code = EXCLUDED.code, expires_at = EXCLUDED.expires_at,
                attempts = EXCLUDED.attempts
            "#,
        )
        .bind(&otp.phone)
        .bind(&otp.code)
        .bind(otp.expires_at)
        .bind(i32::try_from(otp.attempts).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_otp(&self, phone: &str) -> Result<Option<OtpCode>> {
        let row = sqlx::query(
            "SELECT phone, code, expires_at, attempts FROM otp_codes WHERE phone = $1",
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            Ok(OtpCode {
                phone: r.try_get("phone")?,
                code: r.try_get("code")?,
                expires_at: r.try_get("expires_at")?,
                attempts: r.try_get::<i32, _>("attempts")?.unsigned_abs(),
            })
        })
        .transpose()
    }

    async fn record_otp_failure(&self, phone: &str) -> Result<Option<u32>> {
        let attempts: Option<i32> = sqlx::query_scalar(
            "UPDATE otp_codes SET attempts = attempts + 1 WHERE phone = $1 RETURNING attempts",
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;
        Ok(attempts.map(i32::unsigned_abs))
    }

    async fn delete_otp(&self, phone: &str) -> Result<()> {
        sqlx::query("DELETE FROM otp_codes WHERE phone = $1")
            .bind(phone)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AddressStore for PostgresStore {
    async fn insert_address(&self, mut address: Address) -> Result<Address> {
        let mut tx = self.pool.begin().await?;

        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM addresses WHERE user_id = $1")
            .bind(address.user_id.as_uuid())
            .fetch_one(&mut *tx)
            .await?;
        if existing == 0 {
            address.is_default = true;
        }
        if address.is_default {
            sqlx::query("UPDATE addresses SET is_default = FALSE WHERE user_id = $1")
                .bind(address.user_id.as_uuid())
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO addresses (id, user_id, full_name, phone, line1, line2, city, state,
                                   postal_code, country, is_default, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(address.id.as_uuid())
        .bind(address.user_id.as_uuid())
        .bind(&address.postal.full_name)
        .bind(&address.postal.phone)
        .bind(&address.postal.line1)
        .bind(&address.postal.line2)
        .bind(&address.postal.city)
        .bind(&address.postal.state)
        .bind(&address.postal.postal_code)
        .bind(&address.postal.country)
        .bind(address.is_default)
        .bind(address.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(address)
    }

    async fn get_address(&self, id: AddressId) -> Result<Option<Address>> {
        let sql = format!("SELECT {ADDRESS_COLUMNS} FROM addresses WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_address).transpose()
    }

    async fn list_addresses(&self, user_id: UserId) -> Result<Vec<Address>> {
        let sql = format!(
            "SELECT {ADDRESS_COLUMNS} FROM addresses WHERE user_id = $1 \
             ORDER BY is_default DESC, created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_address).collect()
    }

    async fn set_default_address(&self, user_id: UserId, id: AddressId) -> Result<Address> {
        let mut tx = self.pool.begin().await?;

        let owned: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM addresses WHERE id = $1 AND user_id = $2")
                .bind(id.as_uuid())
                .bind(user_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        if owned.is_none() {
            return Err(StoreError::not_found("Address", id));
        }

        let sql = format!(
            "UPDATE addresses SET is_default = (id = $2) WHERE user_id = $1 RETURNING {ADDRESS_COLUMNS}"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        rows.iter()
            .map(row_to_address)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::not_found("Address", id))
    }

    async fn delete_address(&self, id: AddressId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM addresses WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl FavoriteStore for PostgresStore {
    async fn find_favorite(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<Favorite>> {
        let row = sqlx::query(
            "SELECT id, user_id, product_id, created_at FROM favorites \
             WHERE user_id = $1 AND product_id = $2",
        )
        .bind(user_id.as_uuid())
        .bind(product_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_favorite).transpose()
    }

    async fn insert_favorite(&self, favorite: &Favorite) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO favorites (id, user_id, product_id, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT ON CONSTRAINT unique_favorite DO NOTHING
            "#,
        )
        .bind(favorite.id.as_uuid())
        .bind(favorite.user_id.as_uuid())
        .bind(favorite.product_id.as_uuid())
        .bind(favorite.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_favorite(&self, id: FavoriteId) -> Result<()> {
        sqlx::query("DELETE FROM favorites WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_favorites(
        &self,
        user_id: UserId,
        page: u32,
        limit: u32,
    ) -> Result<Page<Product>> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM favorites f
            JOIN products p ON p.id = f.product_id
            WHERE f.user_id = $1 AND p.is_archived = FALSE
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        let page = page.max(1);
        let rows = sqlx::query(
            r#"
            SELECT p.* FROM favorites f
            JOIN products p ON p.id = f.product_id
            WHERE f.user_id = $1 AND p.is_archived = FALSE
            ORDER BY f.created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(i64::from(limit))
        .bind(i64::from(page - 1) * i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            data: rows.iter().map(row_to_product).collect::<Result<_>>()?,
            total: total as u64,
            page,
            limit,
        })
    }
}
