//! Image-generation queue client for virtual try-on jobs.
//!
//! The provider exposes a fal-style queue: a submit call returns a request
//! id, and a separate status endpoint is polled until the job settles. This
//! module only speaks the wire protocol; deciding what a poll outcome means
//! for the job record is left to the tracker.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, Result};

pub const DEFAULT_SUBMIT_URL: &str = "https://queue.fal.run/fal-ai/fashn/tryon/v1.6";
pub const DEFAULT_POLL_BASE_URL: &str = "https://queue.fal.run/fal-ai/fashn";

const QUOTA_MARKER: &str = "Exhausted balance";

/// Images and garment category for one generation job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryOnRequest {
    pub model_image: String,
    pub garment_image: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(default)]
    pub images: Option<Vec<ImageRef>>,
}

/// Body of a successful status poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<ImageRef>>,
    #[serde(default)]
    pub payload: Option<JobPayload>,
}

impl JobSnapshot {
    /// A job still waiting in the queue.
    pub fn queued() -> Self {
        Self {
            status: Some("IN_QUEUE".to_string()),
            ..Self::default()
        }
    }

    /// A job reported as completed with its result under `payload`.
    pub fn completed(url: impl Into<String>) -> Self {
        Self {
            status: Some("COMPLETED".to_string()),
            payload: Some(JobPayload {
                images: Some(vec![ImageRef { url: url.into() }]),
            }),
            ..Self::default()
        }
    }

    /// A job reported as failed by the provider.
    pub fn failed() -> Self {
        Self {
            status: Some("FAILED".to_string()),
            ..Self::default()
        }
    }

    /// True when the body carries images at the top level.
    pub fn has_inline_images(&self) -> bool {
        self.images.is_some()
    }

    /// First result image; read from `payload` when present, else the body.
    pub fn result_url(&self) -> Option<&str> {
        let images = match &self.payload {
            Some(payload) => payload.images.as_ref(),
            None => self.images.as_ref(),
        };
        images
            .and_then(|images| images.first())
            .map(|image| image.url.as_str())
            .filter(|url| !url.is_empty())
    }
}

/// A status poll that did not return a readable job body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollFailure {
    /// HTTP status, or `None` when the request never got a response.
    pub status: Option<u16>,
    pub message: String,
}

impl PollFailure {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }
}

/// Trait for an asynchronous image-generation provider.
#[async_trait]
pub trait TryOnGenerator: Send + Sync {
    /// Queues a job and returns the provider's request id.
    async fn submit(&self, request: TryOnRequest) -> Result<String>;

    /// Fetches the current state of a queued job.
    async fn poll(&self, request_id: &str) -> std::result::Result<JobSnapshot, PollFailure>;
}

/// Reads the human message out of an error body's `detail` field, which is
/// either a string or a list of `{msg}` objects.
pub fn detail_message(body: &Value) -> Option<String> {
    match body.get("detail")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items
            .first()
            .and_then(|item| item.get("msg"))
            .and_then(Value::as_str)
            .map(str::to_string),
        other => Some(other.to_string()),
    }
}

/// Maps a rejected submission to a gateway error.
pub fn submit_rejection(status: u16, body: &Value) -> GatewayError {
    let detail_is_list = body.get("detail").is_some_and(Value::is_array);
    let message = detail_message(body).unwrap_or_else(|| "Invalid Input".to_string());

    if status == 422 && detail_is_list {
        return GatewayError::Validation(message);
    }
    if message.contains(QUOTA_MARKER) {
        return GatewayError::QuotaExhausted;
    }
    GatewayError::Rejected { status, message }
}

/// fal queue credentials and endpoints.
#[derive(Debug, Clone)]
pub struct FalConfig {
    pub api_key: String,
    pub submit_url: String,
    pub poll_base_url: String,
}

impl FalConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            submit_url: DEFAULT_SUBMIT_URL.to_string(),
            poll_base_url: DEFAULT_POLL_BASE_URL.to_string(),
        }
    }
}

/// HTTP client for the fal queue API.
pub struct FalQueueClient {
    config: FalConfig,
    client: Client,
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    model_image: &'a str,
    garment_image: &'a str,
    category: &'a str,
    mode: &'static str,
    moderation_level: &'static str,
    num_samples: u32,
}

#[derive(Deserialize)]
struct SubmitResponse {
    request_id: String,
}

impl FalQueueClient {
    #[must_use]
    pub fn new(config: FalConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn authorization(&self) -> String {
        format!("Key {}", self.config.api_key)
    }

    fn poll_url(&self, request_id: &str) -> String {
        format!("{}/requests/{request_id}", self.config.poll_base_url)
    }
}

#[async_trait]
impl TryOnGenerator for FalQueueClient {
    async fn submit(&self, request: TryOnRequest) -> Result<String> {
        let body = SubmitBody {
            model_image: &request.model_image,
            garment_image: &request.garment_image,
            category: &request.category,
            mode: "performance",
            moderation_level: "permissive",
            num_samples: 1,
        };

        let response = self
            .client
            .post(&self.config.submit_url)
            .header("Authorization", self.authorization())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
            let error = submit_rejection(status, &body);
            tracing::error!(status, error = %error, "Try-on submission rejected");
            return Err(error);
        }

        let SubmitResponse { request_id } = response.json().await?;
        Ok(request_id)
    }

    async fn poll(&self, request_id: &str) -> std::result::Result<JobSnapshot, PollFailure> {
        let response = self
            .client
            .get(self.poll_url(request_id))
            .header("Authorization", self.authorization())
            .send()
            .await
            .map_err(|e| PollFailure::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|body| detail_message(&body))
                .unwrap_or(text);
            return Err(PollFailure::http(status.as_u16(), message));
        }

        response
            .json()
            .await
            .map_err(|e| PollFailure::transport(e.to_string()))
    }
}

#[derive(Debug, Default)]
struct InMemoryTryOnState {
    submissions: Vec<TryOnRequest>,
    script: VecDeque<std::result::Result<JobSnapshot, PollFailure>>,
    next_request_id: Option<String>,
    submit_rejection: Option<(u16, Value)>,
    submit_delay: Option<Duration>,
    poll_count: usize,
}

/// In-memory generator whose poll answers are scripted by the test.
///
/// Once the script runs dry every poll reports the job as still queued.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTryOnGenerator {
    state: Arc<RwLock<InMemoryTryOnState>>,
}

impl InMemoryTryOnGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryTryOnState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryTryOnState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the request id returned by the next submission.
    pub fn set_next_request_id(&self, request_id: impl Into<String>) {
        self.write().next_request_id = Some(request_id.into());
    }

    /// Makes submissions fail as if the provider answered `status` with `body`.
    pub fn reject_submissions(&self, status: u16, body: Value) {
        self.write().submit_rejection = Some((status, body));
    }

    /// Makes every submission take `delay` before the provider answers.
    pub fn delay_submissions(&self, delay: Duration) {
        self.write().submit_delay = Some(delay);
    }

    /// Appends a poll answer to the script.
    pub fn push_poll(&self, answer: std::result::Result<JobSnapshot, PollFailure>) {
        self.write().script.push_back(answer);
    }

    /// Returns how many polls were made.
    pub fn poll_count(&self) -> usize {
        self.read().poll_count
    }

    /// Returns the accepted submissions.
    pub fn submissions(&self) -> Vec<TryOnRequest> {
        self.read().submissions.clone()
    }
}

#[async_trait]
impl TryOnGenerator for InMemoryTryOnGenerator {
    async fn submit(&self, request: TryOnRequest) -> Result<String> {
        let delay = self.read().submit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.write();

        if let Some((status, body)) = &state.submit_rejection {
            return Err(submit_rejection(*status, body));
        }

        state.submissions.push(request);
        let request_id = state
            .next_request_id
            .take()
            .unwrap_or_else(|| format!("req-{}", state.submissions.len()));
        Ok(request_id)
    }

    async fn poll(&self, _request_id: &str) -> std::result::Result<JobSnapshot, PollFailure> {
        let mut state = self.write();
        state.poll_count += 1;
        state
            .script
            .pop_front()
            .unwrap_or_else(|| Ok(JobSnapshot::queued()))
    }
}
