//! SMS delivery for one-time login codes.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{GatewayError, Result};

/// Trait for sending a text message.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<()>;
}

/// Twilio account credentials and sender number.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

/// Twilio Messages API client.
pub struct TwilioSms {
    config: TwilioConfig,
    client: Client,
}

impl TwilioSms {
    #[must_use]
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.config.account_sid
        )
    }
}

#[async_trait]
impl SmsSender for TwilioSms {
    async fn send(&self, to: &str, body: &str) -> Result<()> {
        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", to),
                ("From", self.config.from_number.as_str()),
                ("Body", body),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::UnexpectedResponse(format!(
                "SMS send failed with status {status}: {text}"
            )));
        }

        tracing::debug!(to, "SMS sent");
        Ok(())
    }
}

/// A message captured by [`InMemorySmsSender`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentSms {
    pub to: String,
    pub body: String,
}

#[derive(Debug, Default)]
struct InMemorySmsState {
    sent: Vec<SentSms>,
    fail_on_send: bool,
}

/// In-memory SMS sender for testing and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemorySmsSender {
    state: Arc<RwLock<InMemorySmsState>>,
}

impl InMemorySmsSender {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemorySmsState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemorySmsState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_fail_on_send(&self, fail: bool) {
        self.write().fail_on_send = fail;
    }

    /// Returns every message sent so far.
    pub fn sent(&self) -> Vec<SentSms> {
        self.read().sent.clone()
    }

    /// Returns the most recent message sent to `to`.
    pub fn last_to(&self, to: &str) -> Option<SentSms> {
        self.read().sent.iter().rev().find(|m| m.to == to).cloned()
    }
}

#[async_trait]
impl SmsSender for InMemorySmsSender {
    async fn send(&self, to: &str, body: &str) -> Result<()> {
        let mut state = self.write();
        if state.fail_on_send {
            return Err(GatewayError::Unavailable("SMS provider down".to_string()));
        }
        state.sent.push(SentSms {
            to: to.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
