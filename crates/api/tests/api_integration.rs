//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::{AppState, Gateways};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use gateways::{
    InMemoryNotifier, InMemoryPaymentGateway, InMemorySmsSender, InMemoryTryOnGenerator,
    PublicUrlResolver,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use services::TrackerConfig;
use store::InMemoryStore;
use tower::ServiceExt;
use uuid::Uuid;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    router: axum::Router,
    payments: InMemoryPaymentGateway,
    sms: InMemorySmsSender,
}

fn setup() -> TestApp {
    let payments = InMemoryPaymentGateway::new();
    let sms = InMemorySmsSender::new();
    let gateways = Gateways {
        payments: Arc::new(payments.clone()),
        try_on: Arc::new(InMemoryTryOnGenerator::new()),
        sms: Arc::new(sms.clone()),
        notifier: Arc::new(InMemoryNotifier::new()),
    };
    let state = Arc::new(AppState::new(
        Arc::new(InMemoryStore::new()),
        gateways,
        PublicUrlResolver::new("https://cdn.example.com"),
        TrackerConfig::default(),
    ));
    TestApp {
        router: api::create_app(state, get_metrics_handle()),
        payments,
        sms,
    }
}

impl TestApp {
    async fn send(
        &self,
        method: &str,
        uri: &str,
        identity: Option<(Uuid, &str)>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((user_id, role)) = identity {
            builder = builder
                .header("x-user-id", user_id.to_string())
                .header("x-user-role", role);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn create_product(&self, stock: i64) -> String {
        let (status, product) = self
            .send(
                "POST",
                "/admin/products",
                Some((Uuid::new_v4(), "marketing")),
                Some(json!({
                    "name": "Linen Shirt",
                    "description": "Relaxed fit",
                    "price": 10000,
                    "gender": "MEN",
                    "category": "Shirts",
                    "brand": "Acme",
                    "images": ["uploads/shirt.jpg"],
                    "variants": [
                        {"size": "L", "color": "White", "sku": "SHIRT-L-WHITE", "stock": stock}
                    ]
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{product}");
        product["id"].as_str().unwrap().to_string()
    }

    async fn create_address(&self, user: Uuid) -> String {
        let (status, address) = self
            .send(
                "POST",
                "/addresses",
                Some((user, "user")),
                Some(json!({
                    "full_name": "Asha Rao",
                    "phone": "9000000001",
                    "line1": "12 MG Road",
                    "city": "Pune",
                    "state": "MH",
                    "postal_code": "411001",
                    "country": "IN"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{address}");
        assert_eq!(address["is_default"], true);
        address["id"].as_str().unwrap().to_string()
    }

    async fn add_to_cart(
        &self,
        user: Uuid,
        product_id: &str,
        quantity: u32,
    ) -> (StatusCode, Value) {
        self.send(
            "POST",
            "/cart",
            Some((user, "user")),
            Some(json!({
                "product_id": product_id,
                "quantity": quantity,
                "size": "L",
                "color": "White"
            })),
        )
        .await
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();
    let (status, json) = app.send("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_identity_is_unauthorized() {
    let app = setup();
    let (status, json) = app.send("GET", "/cart", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_shopper_cannot_write_catalog() {
    let app = setup();
    let (status, _) = app
        .send(
            "POST",
            "/admin/products",
            Some((Uuid::new_v4(), "user")),
            Some(json!({"name": "Tee", "price": 100, "category": "Tops", "brand": "Acme"})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_product_is_not_found() {
    let app = setup();
    let (status, json) = app
        .send("GET", &format!("/products/{}", Uuid::new_v4()), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "Product not found");
}

#[tokio::test]
async fn test_catalog_reads() {
    let app = setup();
    let product_id = app.create_product(4).await;

    let (status, detail) = app
        .send("GET", &format!("/products/{product_id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["stock"], 4);
    assert_eq!(detail["variants"].as_array().unwrap().len(), 1);

    let (_, results) = app.send("GET", "/products/search?q=linen", None, None).await;
    assert_eq!(results.as_array().unwrap().len(), 1);

    let (_, page) = app
        .send("GET", "/products?gender=MEN&sort=price_asc", None, None)
        .await;
    assert_eq!(page["total"], 1);

    let (_, brands) = app.send("GET", "/products/brands", None, None).await;
    assert_eq!(brands, json!(["Acme"]));
}

#[tokio::test]
async fn test_checkout_pay_and_verify() {
    let app = setup();
    let product_id = app.create_product(5).await;
    let user = Uuid::new_v4();
    let address_id = app.create_address(user).await;

    let (status, _) = app.add_to_cart(user, &product_id, 2).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, order) = app
        .send(
            "POST",
            "/orders",
            Some((user, "user")),
            Some(json!({"address_id": address_id, "payment_type": "ONLINE"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    let order_id = order["id"].as_str().unwrap().to_string();

    let (status, session) = app
        .send("POST", &format!("/orders/{order_id}/pay"), Some((user, "user")), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{session}");
    let txn = session["merchantTransactionId"].as_str().unwrap().to_string();

    let (_, outcome) = app
        .send("POST", &format!("/orders/{order_id}/verify"), Some((user, "user")), None)
        .await;
    assert_eq!(outcome["message"], "Payment not completed yet");

    app.payments.mark_paid(&txn);
    let (status, outcome) = app
        .send("POST", &format!("/orders/{order_id}/verify"), Some((user, "user")), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["message"], "Payment verified successfully");

    let (_, detail) = app
        .send("GET", &format!("/products/{product_id}"), None, None)
        .await;
    assert_eq!(detail["stock"], 3);

    let (_, cart) = app.send("GET", "/cart", Some((user, "user")), None).await;
    assert!(cart["items"].as_array().unwrap().is_empty());

    let (status, _) = app
        .send(
            "GET",
            &format!("/orders/{order_id}"),
            Some((Uuid::new_v4(), "user")),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(
            "PATCH",
            &format!("/admin/orders/{order_id}/status"),
            Some((Uuid::new_v4(), "support")),
            Some(json!({"status": "Accepted"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, tracking) = app
        .send(
            "GET",
            &format!("/orders/{order_id}/tracking"),
            Some((user, "user")),
            None,
        )
        .await;
    assert_eq!(tracking["current_status"], "Accepted");
    assert_eq!(tracking["timeline"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_out_of_stock_is_bad_request() {
    let app = setup();
    let product_id = app.create_product(1).await;
    let user = Uuid::new_v4();

    let (status, json) = app.add_to_cart(user, &product_id, 2).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Not enough stock. Only 1 left.");
}

#[tokio::test]
async fn test_code_login() {
    let app = setup();
    let (status, _) = app
        .send("POST", "/auth/otp", None, Some(json!({"phone": "+919000000001"})))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .send(
            "POST",
            "/auth/otp/verify",
            None,
            Some(json!({"phone": "+919000000001", "code": "000000"})),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let body = app.sms.last_to("+919000000001").unwrap().body;
    let code = body.rsplit(' ').next().unwrap();
    let (status, user) = app
        .send(
            "POST",
            "/auth/otp/verify",
            None,
            Some(json!({"phone": "+919000000001", "code": code})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["is_verified"], true);
}

#[tokio::test]
async fn test_try_on_submission_and_conflict() {
    let app = setup();
    let user = Uuid::new_v4();
    let request = json!({
        "source_images": ["uploads/me.jpg"],
        "garment_images": ["uploads/shirt.jpg"],
        "category": "tops"
    });

    let (status, record) = app
        .send("POST", "/try-on", Some((user, "user")), Some(request.clone()))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{record}");
    assert_eq!(record["status"], "PROCESSING");

    let (status, _) = app
        .send("POST", "/try-on", Some((user, "user")), Some(request))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, history) = app
        .send("GET", "/try-on/history", Some((user, "user")), None)
        .await;
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_favorite_toggle() {
    let app = setup();
    let product_id = app.create_product(1).await;
    let user = Uuid::new_v4();

    let path = format!("/favorites/{product_id}");
    let (_, toggled) = app.send("POST", &path, Some((user, "user")), None).await;
    assert_eq!(toggled["result"], "added");

    let (_, page) = app.send("GET", "/favorites", Some((user, "user")), None).await;
    assert_eq!(page["total"], 1);

    let (_, toggled) = app.send("POST", &path, Some((user, "user")), None).await;
    assert_eq!(toggled["result"], "removed");
}
