//! Payment gateway trait, the PhonePe PG v1 client and an in-memory fake.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use common::{Money, UserId};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{GatewayError, Result};

const PAY_PATH: &str = "/pg/v1/pay";
const PAYMENT_SUCCESS: &str = "PAYMENT_SUCCESS";

/// What the caller wants to charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub amount: Money,
    pub user_id: UserId,
    pub mobile_number: String,
}

/// Launch descriptor handed back to the client after initiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    pub payment_url: String,
    pub merchant_transaction_id: String,
}

/// Trait for payment provider operations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a provider transaction for the given amount.
    async fn initiate(&self, request: PaymentRequest) -> Result<PaymentSession>;

    /// Returns true once the provider reports the transaction as paid.
    ///
    /// Transport and provider errors read as "not yet paid" so callers can
    /// poll without special-casing failures.
    async fn check_status(&self, merchant_transaction_id: &str) -> bool;
}

/// Generates a fresh merchant transaction id (`TXN_<uuid>`).
pub fn new_transaction_id() -> String {
    format!("TXN_{}", Uuid::new_v4())
}

/// Computes the `X-VERIFY` header: `sha256_hex(data + salt_key) ### salt_index`.
pub fn x_verify(data: &str, salt_key: &str, salt_index: &str) -> String {
    let digest = Sha256::digest(format!("{data}{salt_key}").as_bytes());
    format!("{digest:x}###{salt_index}")
}

/// PhonePe credentials and the callback the provider redirects to.
#[derive(Debug, Clone)]
pub struct PhonePeConfig {
    pub host_url: String,
    pub merchant_id: String,
    pub salt_key: String,
    pub salt_index: String,
    pub callback_url: String,
}

/// HTTP client for the PhonePe PG v1 API.
pub struct PhonePeGateway {
    config: PhonePeConfig,
    client: Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PayPayload<'a> {
    merchant_id: &'a str,
    merchant_transaction_id: &'a str,
    merchant_user_id: String,
    amount: i64,
    redirect_url: &'a str,
    redirect_mode: &'static str,
    callback_url: &'a str,
    mobile_number: &'a str,
    payment_instrument: PaymentInstrument,
}

#[derive(Serialize)]
struct PaymentInstrument {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayResponse {
    data: Option<PayData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayData {
    instrument_response: Option<InstrumentResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentResponse {
    redirect_info: Option<RedirectInfo>,
}

#[derive(Deserialize)]
struct RedirectInfo {
    url: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    code: Option<String>,
}

impl PhonePeGateway {
    #[must_use]
    pub fn new(config: PhonePeConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    /// Builds the base64 request envelope for a pay call.
    fn encode_payload(&self, request: &PaymentRequest, transaction_id: &str) -> Result<String> {
        let payload = PayPayload {
            merchant_id: &self.config.merchant_id,
            merchant_transaction_id: transaction_id,
            merchant_user_id: format!("USER_{}", request.user_id),
            amount: request.amount.minor(),
            redirect_url: &self.config.callback_url,
            redirect_mode: "POST",
            callback_url: &self.config.callback_url,
            mobile_number: &request.mobile_number,
            payment_instrument: PaymentInstrument { kind: "PAY_PAGE" },
        };
        Ok(BASE64.encode(serde_json::to_vec(&payload)?))
    }

    fn status_path(&self, merchant_transaction_id: &str) -> String {
        format!(
            "/pg/v1/status/{}/{}",
            self.config.merchant_id, merchant_transaction_id
        )
    }

    async fn fetch_status(&self, merchant_transaction_id: &str) -> Result<bool> {
        let path = self.status_path(merchant_transaction_id);
        let checksum = x_verify(&path, &self.config.salt_key, &self.config.salt_index);
        let url = format!("{}{}", self.config.host_url, path);

        let response = self
            .client
            .get(&url)
            .header("Content-Type", "application/json")
            .header("X-VERIFY", checksum)
            .header("X-MERCHANT-ID", &self.config.merchant_id)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::UnexpectedResponse(format!(
                "status check failed with status {status}: {text}"
            )));
        }

        let body: StatusResponse = response.json().await?;
        Ok(body.code.as_deref() == Some(PAYMENT_SUCCESS))
    }
}

#[async_trait]
impl PaymentGateway for PhonePeGateway {
    async fn initiate(&self, request: PaymentRequest) -> Result<PaymentSession> {
        let transaction_id = new_transaction_id();
        let encoded = self.encode_payload(&request, &transaction_id)?;
        let checksum = x_verify(
            &format!("{encoded}{PAY_PATH}"),
            &self.config.salt_key,
            &self.config.salt_index,
        );
        let url = format!("{}{PAY_PATH}", self.config.host_url);

        let response = self
            .client
            .post(&url)
            .header("X-VERIFY", checksum)
            .json(&serde_json::json!({ "request": encoded }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::UnexpectedResponse(format!(
                "payment initiation failed with status {status}: {text}"
            )));
        }

        let body: PayResponse = response.json().await?;
        let payment_url = body
            .data
            .and_then(|d| d.instrument_response)
            .and_then(|i| i.redirect_info)
            .map(|r| r.url)
            .ok_or_else(|| {
                GatewayError::UnexpectedResponse("missing redirect URL in pay response".into())
            })?;

        tracing::info!(
            merchant_transaction_id = %transaction_id,
            amount = request.amount.minor(),
            "Payment session opened"
        );

        Ok(PaymentSession {
            payment_url,
            merchant_transaction_id: transaction_id,
        })
    }

    async fn check_status(&self, merchant_transaction_id: &str) -> bool {
        match self.fetch_status(merchant_transaction_id).await {
            Ok(paid) => paid,
            Err(e) => {
                tracing::warn!(
                    merchant_transaction_id,
                    error = %e,
                    "Payment status check failed"
                );
                false
            }
        }
    }
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    sessions: HashMap<String, PaymentRequest>,
    paid: HashSet<String>,
    status_checks: usize,
    fail_on_initiate: bool,
}

/// In-memory payment gateway for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory payment gateway.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryPaymentState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryPaymentState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configures the gateway to refuse new sessions.
    pub fn set_fail_on_initiate(&self, fail: bool) {
        self.write().fail_on_initiate = fail;
    }

    /// Marks a transaction as paid so the next status check succeeds.
    pub fn mark_paid(&self, merchant_transaction_id: &str) {
        self.write().paid.insert(merchant_transaction_id.to_string());
    }

    /// Returns the number of sessions opened.
    pub fn session_count(&self) -> usize {
        self.read().sessions.len()
    }

    /// Returns the request recorded for a transaction.
    pub fn session(&self, merchant_transaction_id: &str) -> Option<PaymentRequest> {
        self.read().sessions.get(merchant_transaction_id).cloned()
    }

    /// Returns how many status checks were made.
    pub fn status_checks(&self) -> usize {
        self.read().status_checks
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn initiate(&self, request: PaymentRequest) -> Result<PaymentSession> {
        let mut state = self.write();

        if state.fail_on_initiate {
            return Err(GatewayError::Unavailable("payment provider down".to_string()));
        }

        let merchant_transaction_id = new_transaction_id();
        state
            .sessions
            .insert(merchant_transaction_id.clone(), request);

        Ok(PaymentSession {
            payment_url: format!("https://pay.test/checkout/{merchant_transaction_id}"),
            merchant_transaction_id,
        })
    }

    async fn check_status(&self, merchant_transaction_id: &str) -> bool {
        let mut state = self.write();
        state.status_checks += 1;
        state.paid.contains(merchant_transaction_id)
    }
}
