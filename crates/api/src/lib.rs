//! HTTP API server for the storefront backend.
//!
//! A thin axum surface over the services crate, with structured logging
//! (tracing) and Prometheus metrics. Caller identity comes from headers set
//! by the authenticating proxy in front of this service.

pub mod config;
pub mod error;
pub mod identity;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, patch, post};
use metrics_exporter_prometheus::PrometheusHandle;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::{AppState, Gateways};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    use routes::{accounts, cart, orders, products, try_on};

    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    let catalog = Router::new()
        .route("/products", get(products::list::<S>))
        .route("/products/search", get(products::search::<S>))
        .route("/products/trending", get(products::trending::<S>))
        .route("/products/categories", get(products::categories::<S>))
        .route("/products/brands", get(products::brands::<S>))
        .route("/products/{id}", get(products::get::<S>))
        .route("/admin/products", post(products::create::<S>))
        .route(
            "/admin/products/{id}",
            patch(products::update::<S>).delete(products::archive::<S>),
        )
        .route("/admin/products/{id}/variants", post(products::add_variant::<S>))
        .route(
            "/admin/variants/{id}",
            patch(products::update_variant::<S>).delete(products::remove_variant::<S>),
        );

    let shopping = Router::new()
        .route(
            "/cart",
            get(cart::summary::<S>)
                .post(cart::add::<S>)
                .delete(cart::clear::<S>),
        )
        .route(
            "/cart/{line_id}",
            patch(cart::set_quantity::<S>).delete(cart::remove::<S>),
        )
        .route("/orders", post(orders::create::<S>).get(orders::list::<S>))
        .route("/orders/{id}", get(orders::get::<S>))
        .route("/orders/{id}/tracking", get(orders::tracking::<S>))
        .route("/orders/{id}/pay", post(orders::pay::<S>))
        .route("/orders/{id}/verify", post(orders::verify::<S>))
        .route("/admin/orders/{id}/status", patch(orders::update_status::<S>));

    let try_on_routes = Router::new()
        .route("/try-on", post(try_on::submit::<S>))
        .route("/try-on/history", get(try_on::history::<S>))
        .route(
            "/try-on/uploads",
            get(try_on::uploads::<S>).post(try_on::save_uploads::<S>),
        )
        .route("/try-on/{id}", delete(try_on::delete::<S>));

    let account_routes = Router::new()
        .route("/auth/register", post(accounts::register::<S>))
        .route("/auth/otp", post(accounts::send_code::<S>))
        .route("/auth/otp/verify", post(accounts::verify_code::<S>))
        .route("/me", get(accounts::me::<S>))
        .route(
            "/addresses",
            get(accounts::list_addresses::<S>).post(accounts::create_address::<S>),
        )
        .route(
            "/addresses/{id}/default",
            post(accounts::set_default_address::<S>),
        )
        .route("/addresses/{id}", delete(accounts::delete_address::<S>))
        .route("/favorites", get(accounts::list_favorites::<S>))
        .route(
            "/favorites/{product_id}",
            post(accounts::toggle_favorite::<S>).get(accounts::favorite_status::<S>),
        );

    Router::new()
        .route("/health", get(routes::health::check))
        .merge(catalog)
        .merge(shopping)
        .merge(try_on_routes)
        .merge(account_routes)
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
