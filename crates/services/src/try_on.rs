//! Virtual try-on: reference uploads and image-generation jobs.
//!
//! A submission first stores a `Processing` record, which holds the user's
//! single active slot, then queues the job with the generation provider and
//! spawns one poll loop for it. The loop ticks on a
//! fixed interval, reads the provider's answer and writes the record exactly
//! once when the job settles. Each tick is an independent store read/write;
//! nothing is held across ticks.
//!
//! Poll loops are registered by record id so deleting a record, or failing a
//! stale one on resubmission, aborts its loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use common::{ProductId, TryOnId, UserId};
use domain::{TryOnKind, TryOnRecord, TryOnStatus};
use gateways::{
    GatewayError, JobSnapshot, PollFailure, PublicUrlResolver, TryOnGenerator, TryOnRequest,
};
use serde::Deserialize;
use store::{StoreError, TryOnStore};
use tokio::task::AbortHandle;

use crate::error::{Result, ServiceError};

/// Poll loop tunables.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    /// Age after which a `Processing` job is presumed abandoned.
    pub stale_after: chrono::Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_attempts: 60,
            stale_after: chrono::Duration::minutes(3),
        }
    }
}

/// A try-on request from a user.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitTryOn {
    pub source_images: Vec<String>,
    pub garment_images: Vec<String>,
    pub category: String,
    #[serde(default)]
    pub product_id: Option<ProductId>,
}

/// What one poll answer means for the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Not settled yet; poll again.
    Continue,
    /// Finished with this result image.
    Completed(String),
    /// Finished without a usable result.
    Failed(String),
}

/// Classifies one poll answer.
///
/// A body counts as finished when its status is `COMPLETED`, or when it has
/// no status but already carries images. A finished body without a result
/// URL is a failure. On errors only "still in progress" (400) and "not
/// queued yet" (404) keep the loop going.
pub fn classify_poll(answer: &std::result::Result<JobSnapshot, PollFailure>) -> PollOutcome {
    match answer {
        Ok(body) => {
            let status = body.status.as_deref();
            if status == Some("COMPLETED") || (status.is_none() && body.has_inline_images()) {
                match body.result_url() {
                    Some(url) => PollOutcome::Completed(url.to_string()),
                    None => PollOutcome::Failed("completed without a result image".to_string()),
                }
            } else if status == Some("FAILED") {
                PollOutcome::Failed("provider reported failure".to_string())
            } else {
                PollOutcome::Continue
            }
        }
        Err(failure) => match failure.status {
            Some(400) if failure.message.to_lowercase().contains("in progress") => {
                PollOutcome::Continue
            }
            Some(404) => PollOutcome::Continue,
            Some(status) => PollOutcome::Failed(format!("HTTP {status}: {}", failure.message)),
            None => PollOutcome::Failed(failure.message.clone()),
        },
    }
}

type PollRegistry = Arc<Mutex<HashMap<TryOnId, AbortHandle>>>;

fn lock(registry: &PollRegistry) -> MutexGuard<'_, HashMap<TryOnId, AbortHandle>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tracks try-on uploads and generation jobs.
pub struct TryOnTracker<S> {
    store: Arc<S>,
    generator: Arc<dyn TryOnGenerator>,
    urls: PublicUrlResolver,
    config: TrackerConfig,
    polls: PollRegistry,
}

impl<S: TryOnStore + 'static> TryOnTracker<S> {
    pub fn new(
        store: Arc<S>,
        generator: Arc<dyn TryOnGenerator>,
        urls: PublicUrlResolver,
        config: TrackerConfig,
    ) -> Self {
        Self {
            store,
            generator,
            urls,
            config,
            polls: Arc::default(),
        }
    }

    /// Submits a generation job and starts polling it in the background.
    ///
    /// Returns the `Processing` record without waiting for the job. A fresh
    /// job already in flight for the user is a `Conflict`; a stale one is
    /// failed first. The slot is claimed before the provider is called, and
    /// released again if the provider rejects the job.
    #[tracing::instrument(skip(self, request), fields(%user_id, category = %request.category))]
    pub async fn submit(&self, user_id: UserId, request: SubmitTryOn) -> Result<TryOnRecord> {
        let (Some(source), Some(garment)) =
            (request.source_images.first(), request.garment_images.first())
        else {
            return Err(ServiceError::BadRequest(
                "Both a photo and a garment image are required".to_string(),
            ));
        };
        if request.category.trim().is_empty() {
            return Err(ServiceError::BadRequest("Category is required".to_string()));
        }

        let now = Utc::now();
        if let Some(active) = self.store.find_active_job(user_id).await? {
            if !active.is_stale(now, self.config.stale_after) {
                return Err(job_in_progress());
            }
            tracing::warn!(record_id = %active.id, "Failing stale try-on job");
            self.cancel_poll(active.id);
            if self
                .store
                .finish_try_on(active.id, TryOnStatus::Failed, Vec::new())
                .await?
            {
                record_finished(TryOnStatus::Failed);
            }
        }

        let job = TryOnRequest {
            model_image: self.urls.resolve(source),
            garment_image: self.urls.resolve(garment),
            category: request.category.clone(),
        };
        let mut record = TryOnRecord::processing(
            user_id,
            request.source_images,
            request.garment_images,
            request.category,
            request.product_id,
            now,
        );
        match self.store.insert_try_on(&record).await {
            Ok(()) => {}
            Err(StoreError::ActiveTryOnJob(_)) => return Err(job_in_progress()),
            Err(e) => return Err(e.into()),
        }

        let request_id = match self.generator.submit(job).await {
            Ok(request_id) => request_id,
            Err(e) => {
                if let Err(release) = self.store.delete_try_on(record.id).await {
                    tracing::error!(
                        record_id = %record.id,
                        error = %release,
                        "Failed to release try-on slot"
                    );
                }
                return Err(submission_error(e));
            }
        };

        if !self
            .store
            .attach_try_on_request(record.id, &request_id)
            .await?
        {
            tracing::warn!(
                record_id = %record.id,
                %request_id,
                "Try-on record removed during submission"
            );
            return Err(ServiceError::NotFound("Try-on record not found".to_string()));
        }
        record.request_id = Some(request_id.clone());

        metrics::counter!("try_on_jobs_submitted_total").increment(1);
        tracing::info!(record_id = %record.id, %request_id, "Try-on job submitted");

        self.spawn_poll(record.id, request_id);
        Ok(record)
    }

    /// Saves the user's own photos for later try-ons.
    pub async fn save_uploads(&self, user_id: UserId, urls: Vec<String>) -> Result<TryOnRecord> {
        if urls.is_empty() {
            return Err(ServiceError::BadRequest("No images uploaded".to_string()));
        }
        let record = TryOnRecord::reference(user_id, urls, Utc::now());
        self.store.insert_try_on(&record).await?;
        Ok(record)
    }

    /// Generated results, newest first.
    pub async fn generated_history(&self, user_id: UserId) -> Result<Vec<TryOnRecord>> {
        Ok(self
            .store
            .list_try_ons(user_id, TryOnKind::Generated)
            .await?)
    }

    /// Reference uploads, newest first.
    pub async fn uploads(&self, user_id: UserId) -> Result<Vec<TryOnRecord>> {
        Ok(self
            .store
            .list_try_ons(user_id, TryOnKind::Reference)
            .await?)
    }

    /// Deletes one of the user's records of the given kind, stopping its
    /// poll loop if it is still running.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, record_id: TryOnId, user_id: UserId, kind: TryOnKind) -> Result<()> {
        let not_found = || {
            ServiceError::NotFound(
                match kind {
                    TryOnKind::Reference => "Image not found",
                    TryOnKind::Generated => "Try-on record not found",
                }
                .to_string(),
            )
        };

        let record = self
            .store
            .get_try_on(record_id)
            .await?
            .filter(|r| r.user_id == user_id && r.kind == kind)
            .ok_or_else(not_found)?;

        self.cancel_poll(record.id);
        if !self.store.delete_try_on(record.id).await? {
            return Err(not_found());
        }
        Ok(())
    }

    /// Number of poll loops still running.
    pub fn active_polls(&self) -> usize {
        lock(&self.polls).len()
    }

    fn cancel_poll(&self, record_id: TryOnId) {
        if let Some(handle) = lock(&self.polls).remove(&record_id) {
            handle.abort();
            tracing::debug!(%record_id, "Poll loop cancelled");
        }
    }

    fn spawn_poll(&self, record_id: TryOnId, request_id: String) {
        let store = Arc::clone(&self.store);
        let generator = Arc::clone(&self.generator);
        let config = self.config.clone();
        let registry = Arc::clone(&self.polls);

        // The registry stays locked until the handle is in, so a loop that
        // settles immediately still finds its own entry to remove.
        let mut polls = lock(&self.polls);
        let task = tokio::spawn(async move {
            poll_until_settled(store.as_ref(), generator.as_ref(), &config, record_id, &request_id)
                .await;
            lock(&registry).remove(&record_id);
        });
        polls.insert(record_id, task.abort_handle());
    }
}

fn job_in_progress() -> ServiceError {
    ServiceError::Conflict("A try-on is already in progress. Please wait.".to_string())
}

fn submission_error(err: GatewayError) -> ServiceError {
    match err {
        GatewayError::Validation(message) => {
            ServiceError::BadRequest(format!("AI Validation Error: {message}"))
        }
        GatewayError::QuotaExhausted => ServiceError::Gateway(
            "AI Service Quota Exceeded. Please contact support.".to_string(),
        ),
        GatewayError::Rejected { message, .. } => ServiceError::BadRequest(message),
        other => ServiceError::Gateway(other.to_string()),
    }
}

fn record_finished(status: TryOnStatus) {
    metrics::counter!("try_on_jobs_finished_total", "status" => status.as_str()).increment(1);
}

/// Polls one job until it settles or the attempt bound is reached, then
/// writes the outcome. Returns the status the loop settled on.
#[tracing::instrument(skip(store, generator, config), fields(%record_id, %request_id))]
async fn poll_until_settled<S: TryOnStore + ?Sized>(
    store: &S,
    generator: &dyn TryOnGenerator,
    config: &TrackerConfig,
    record_id: TryOnId,
    request_id: &str,
) -> TryOnStatus {
    for attempt in 1..=config.max_attempts {
        tokio::time::sleep(config.poll_interval).await;
        metrics::counter!("try_on_poll_attempts_total").increment(1);

        let answer = generator.poll(request_id).await;
        match classify_poll(&answer) {
            PollOutcome::Continue => {
                tracing::debug!(attempt, "Try-on job still processing");
            }
            PollOutcome::Completed(url) => {
                tracing::info!(attempt, "Try-on job completed");
                return settle(store, record_id, TryOnStatus::Completed, vec![url]).await;
            }
            PollOutcome::Failed(reason) => {
                tracing::warn!(attempt, %reason, "Try-on job failed");
                return settle(store, record_id, TryOnStatus::Failed, Vec::new()).await;
            }
        }
    }

    tracing::warn!(attempts = config.max_attempts, "Try-on job timed out");
    settle(store, record_id, TryOnStatus::Timeout, Vec::new()).await
}

async fn settle<S: TryOnStore + ?Sized>(
    store: &S,
    record_id: TryOnId,
    status: TryOnStatus,
    result_urls: Vec<String>,
) -> TryOnStatus {
    match store.finish_try_on(record_id, status, result_urls).await {
        Ok(true) => record_finished(status),
        Ok(false) => tracing::debug!("Try-on record gone or already settled"),
        Err(e) => tracing::error!(error = %e, "Failed to store try-on outcome"),
    }
    status
}
