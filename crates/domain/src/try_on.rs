//! Virtual try-on records.

use chrono::{DateTime, Duration, Utc};
use common::{ProductId, TryOnId, UserId};
use serde::{Deserialize, Serialize};

use crate::DomainError;

/// Whether a record is a user upload or a generated result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TryOnKind {
    Reference,
    Generated,
}

impl TryOnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TryOnKind::Reference => "REFERENCE",
            TryOnKind::Generated => "GENERATED",
        }
    }
}

impl std::str::FromStr for TryOnKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REFERENCE" => Ok(TryOnKind::Reference),
            "GENERATED" => Ok(TryOnKind::Generated),
            other => Err(DomainError::UnknownVariant {
                kind: "try-on kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Status of a try-on job.
///
/// Everything except `Processing` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TryOnStatus {
    Processing,
    Completed,
    Failed,
    Timeout,
}

impl TryOnStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TryOnStatus::Processing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TryOnStatus::Processing => "PROCESSING",
            TryOnStatus::Completed => "COMPLETED",
            TryOnStatus::Failed => "FAILED",
            TryOnStatus::Timeout => "TIMEOUT",
        }
    }
}

impl std::fmt::Display for TryOnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TryOnStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESSING" => Ok(TryOnStatus::Processing),
            "COMPLETED" => Ok(TryOnStatus::Completed),
            "FAILED" => Ok(TryOnStatus::Failed),
            "TIMEOUT" => Ok(TryOnStatus::Timeout),
            other => Err(DomainError::UnknownVariant {
                kind: "try-on status",
                value: other.to_string(),
            }),
        }
    }
}

/// A user upload or a generation job and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TryOnRecord {
    pub id: TryOnId,
    pub user_id: UserId,
    pub product_id: Option<ProductId>,
    pub kind: TryOnKind,
    pub status: TryOnStatus,
    /// Provider job id; set on generated records once the provider accepts
    /// the job.
    pub request_id: Option<String>,
    pub source_urls: Vec<String>,
    pub garment_urls: Vec<String>,
    pub result_urls: Vec<String>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryOnRecord {
    /// A completed record holding the user's own reference images.
    pub fn reference(user_id: UserId, source_urls: Vec<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: TryOnId::new(),
            user_id,
            product_id: None,
            kind: TryOnKind::Reference,
            status: TryOnStatus::Completed,
            request_id: None,
            source_urls,
            garment_urls: Vec::new(),
            result_urls: Vec::new(),
            category: None,
            created_at: now,
        }
    }

    /// A generated job holding the user's active slot. The provider request
    /// id is attached once the provider accepts the job.
    pub fn processing(
        user_id: UserId,
        source_urls: Vec<String>,
        garment_urls: Vec<String>,
        category: String,
        product_id: Option<ProductId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TryOnId::new(),
            user_id,
            product_id,
            kind: TryOnKind::Generated,
            status: TryOnStatus::Processing,
            request_id: None,
            source_urls,
            garment_urls,
            result_urls: Vec::new(),
            category: Some(category),
            created_at: now,
        }
    }

    /// Returns true if this is an active generation job.
    pub fn is_active_job(&self) -> bool {
        self.kind == TryOnKind::Generated && self.status == TryOnStatus::Processing
    }

    /// Returns true if this job is still processing after `threshold`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.is_active_job() && now - self.created_at > threshold
    }
}
