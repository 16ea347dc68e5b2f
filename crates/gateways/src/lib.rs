//! External collaborators of the storefront.
//!
//! Each provider sits behind an async trait with a real HTTP client and an
//! in-memory fake. The fakes record what they were asked to do and can be
//! told to fail, so service tests never touch the network.

pub mod error;
pub mod files;
pub mod notify;
pub mod payment;
pub mod sms;
pub mod try_on;

pub use error::{GatewayError, Result};
pub use files::PublicUrlResolver;
pub use notify::{InMemoryNotifier, LogNotifier, Notification, Notifier};
pub use payment::{
    InMemoryPaymentGateway, PaymentGateway, PaymentRequest, PaymentSession, PhonePeConfig,
    PhonePeGateway,
};
pub use sms::{InMemorySmsSender, SentSms, SmsSender, TwilioConfig, TwilioSms};
pub use try_on::{
    FalConfig, FalQueueClient, InMemoryTryOnGenerator, JobSnapshot, PollFailure, TryOnGenerator,
    TryOnRequest,
};
