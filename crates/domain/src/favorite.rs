//! Favorite markers.

use chrono::{DateTime, Utc};
use common::{FavoriteId, ProductId, UserId};
use serde::{Deserialize, Serialize};

/// A product marked as a favorite by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Favorite {
    pub id: FavoriteId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub created_at: DateTime<Utc>,
}

impl Favorite {
    pub fn new(user_id: UserId, product_id: ProductId, now: DateTime<Utc>) -> Self {
        Self {
            id: FavoriteId::new(),
            user_id,
            product_id,
            created_at: now,
        }
    }
}

/// Outcome of toggling a favorite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FavoriteToggle {
    Added,
    Removed,
}
