//! Push notifications.
//!
//! Notifications are fire-and-forget for callers: a failed send is logged by
//! the service layer and never fails the operation that triggered it.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use common::UserId;

use crate::error::{GatewayError, Result};

/// A push message addressed to one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub user_id: UserId,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn new(user_id: UserId, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            user_id,
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Trait for push delivery.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<()>;
}

/// Notifier that only writes the message to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) -> Result<()> {
        tracing::info!(
            user_id = %notification.user_id,
            title = %notification.title,
            "Push notification"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<Notification>,
    fail_on_send: bool,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<RwLock<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryNotifierState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryNotifierState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configures the notifier to fail every send.
    pub fn set_fail_on_send(&self, fail: bool) {
        self.write().fail_on_send = fail;
    }

    /// Returns the notifications delivered so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.read().sent.clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn send(&self, notification: Notification) -> Result<()> {
        let mut state = self.write();
        if state.fail_on_send {
            return Err(GatewayError::Unavailable("push provider down".to_string()));
        }
        state.sent.push(notification);
        Ok(())
    }
}
