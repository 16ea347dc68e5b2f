//! Accounts and one-time-code login.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::UserId;
use domain::{MAX_OTP_ATTEMPTS, NewUser, OtpCode, User};
use gateways::{Notification, Notifier, SmsSender};
use rand::Rng;
use store::{AccountStore, StoreError};

use crate::error::{Result, ServiceError};

/// Lifetime of a login code.
pub const OTP_TTL_MINUTES: i64 = 5;

/// Registration, login codes and welcome notifications.
///
/// Push notifications are sent from a detached task; a failed send is logged
/// and never reaches the caller.
pub struct AccountService<S> {
    store: Arc<S>,
    sms: Arc<dyn SmsSender>,
    notifier: Arc<dyn Notifier>,
}

impl<S: AccountStore> AccountService<S> {
    pub fn new(store: Arc<S>, sms: Arc<dyn SmsSender>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            sms,
            notifier,
        }
    }

    #[tracing::instrument(skip(self, data), fields(name = %data.name))]
    pub async fn register(&self, data: NewUser) -> Result<User> {
        data.validate()?;
        let user = User::from_new(data, Utc::now());
        self.store.insert_user(&user).await?;

        tracing::info!(user_id = %user.id, "User registered");
        self.notify(Notification::new(
            user.id,
            "Welcome",
            format!("Hi {}, thanks for joining us!", user.name),
        ));
        Ok(user)
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<User> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))
    }

    /// Stores a fresh six-digit code for `phone` and texts it.
    ///
    /// A new code replaces any earlier one for the same phone.
    #[tracing::instrument(skip(self))]
    pub async fn send_code(&self, phone: &str) -> Result<()> {
        let phone = phone.trim();
        if phone.is_empty() {
            return Err(ServiceError::BadRequest(
                "Phone number is required".to_string(),
            ));
        }

        let code = rand::thread_rng().gen_range(100_000..=999_999).to_string();
        let otp = OtpCode::new(phone, &code, Utc::now(), Duration::minutes(OTP_TTL_MINUTES));
        self.store.put_otp(&otp).await?;

        self.sms
            .send(phone, &format!("Your OTP code is {code}"))
            .await?;
        tracing::info!("Login code sent");
        Ok(())
    }

    /// Exchanges a valid code for the account behind `phone`.
    ///
    /// The code is consumed on success, or once it has taken
    /// `MAX_OTP_ATTEMPTS` wrong guesses. Unknown phones get a new, verified
    /// account.
    #[tracing::instrument(skip(self, code))]
    pub async fn login_with_code(&self, phone: &str, code: &str) -> Result<User> {
        let phone = phone.trim();
        let now = Utc::now();

        let Some(otp) = self.store.get_otp(phone).await? else {
            return Err(invalid_code());
        };
        if otp.is_expired(now) {
            self.store.delete_otp(phone).await?;
            return Err(invalid_code());
        }
        if !otp.accepts(code.trim(), now) {
            let attempts = self.store.record_otp_failure(phone).await?;
            if attempts.is_some_and(|n| n >= MAX_OTP_ATTEMPTS) {
                self.store.delete_otp(phone).await?;
                tracing::warn!("Login code discarded after too many wrong guesses");
            }
            return Err(invalid_code());
        }
        self.store.delete_otp(phone).await?;

        let mut user = match self.store.find_user_by_phone(phone).await? {
            Some(user) => user,
            None => self.create_phone_user(phone).await?,
        };
        if !user.is_verified {
            self.store.mark_user_verified(user.id).await?;
            user.is_verified = true;
        }

        tracing::info!(user_id = %user.id, "User logged in with code");
        self.notify(Notification::new(
            user.id,
            "New login",
            "You just signed in to your account.",
        ));
        Ok(user)
    }

    async fn create_phone_user(&self, phone: &str) -> Result<User> {
        let user = User::from_new(
            NewUser {
                name: String::new(),
                email: None,
                phone: Some(phone.to_string()),
            },
            Utc::now(),
        );
        match self.store.insert_user(&user).await {
            Ok(()) => Ok(user),
            // Lost a race with a concurrent login for the same phone.
            Err(StoreError::DuplicateAccount { .. }) => self
                .store
                .find_user_by_phone(phone)
                .await?
                .ok_or_else(|| ServiceError::NotFound("User not found".to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn notify(&self, notification: Notification) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            let user_id = notification.user_id;
            if let Err(e) = notifier.send(notification).await {
                tracing::warn!(%user_id, error = %e, "Push notification failed");
            }
        });
    }
}

fn invalid_code() -> ServiceError {
    ServiceError::Unauthorized("Invalid or expired OTP".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateways::{InMemoryNotifier, InMemorySmsSender};
    use store::InMemoryStore;

    struct Fixture {
        store: Arc<InMemoryStore>,
        sms: InMemorySmsSender,
        notifier: InMemoryNotifier,
        accounts: AccountService<InMemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let sms = InMemorySmsSender::new();
        let notifier = InMemoryNotifier::new();
        let accounts = AccountService::new(
            store.clone(),
            Arc::new(sms.clone()),
            Arc::new(notifier.clone()),
        );
        Fixture {
            store,
            sms,
            notifier,
            accounts,
        }
    }

    fn code_sent_to(sms: &InMemorySmsSender, phone: &str) -> String {
        let body = sms.last_to(phone).unwrap().body;
        body.rsplit(' ').next().unwrap().to_string()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_code_login_creates_verified_user_and_consumes_code() {
        let f = fixture();
        f.accounts.send_code("+919000000001").await.unwrap();
        let code = code_sent_to(&f.sms, "+919000000001");
        assert_eq!(code.len(), 6);

        let user = f
            .accounts
            .login_with_code("+919000000001", &code)
            .await
            .unwrap();
        assert!(user.is_verified);
        assert_eq!(user.phone.as_deref(), Some("+919000000001"));

        let err = f
            .accounts
            .login_with_code("+919000000001", &code)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_wrong_and_expired_codes_are_unauthorized() {
        let f = fixture();
        f.accounts.send_code("+919000000001").await.unwrap();
        assert!(matches!(
            f.accounts.login_with_code("+919000000001", "000000").await,
            Err(ServiceError::Unauthorized(_))
        ));

        let expired = OtpCode::new(
            "+919000000002",
            "123456",
            Utc::now() - Duration::minutes(10),
            Duration::minutes(OTP_TTL_MINUTES),
        );
        f.store.put_otp(&expired).await.unwrap();
        assert!(matches!(
            f.accounts.login_with_code("+919000000002", "123456").await,
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(f.store.get_otp("+919000000002").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_code_is_discarded_after_repeated_wrong_guesses() {
        let f = fixture();
        f.accounts.send_code("+919000000001").await.unwrap();
        let code = code_sent_to(&f.sms, "+919000000001");
        let wrong = if code == "100000" { "100001" } else { "100000" };

        for _ in 0..MAX_OTP_ATTEMPTS {
            assert!(matches!(
                f.accounts.login_with_code("+919000000001", wrong).await,
                Err(ServiceError::Unauthorized(_))
            ));
        }
        assert!(f.store.get_otp("+919000000001").await.unwrap().is_none());
        assert!(matches!(
            f.accounts.login_with_code("+919000000001", &code).await,
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_right_code_still_works_below_guess_limit() {
        let f = fixture();
        f.accounts.send_code("+919000000001").await.unwrap();
        let code = code_sent_to(&f.sms, "+919000000001");
        let wrong = if code == "100000" { "100001" } else { "100000" };

        for _ in 1..MAX_OTP_ATTEMPTS {
            f.accounts
                .login_with_code("+919000000001", wrong)
                .await
                .unwrap_err();
        }
        let otp = f.store.get_otp("+919000000001").await.unwrap().unwrap();
        assert_eq!(otp.attempts, MAX_OTP_ATTEMPTS - 1);

        let user = f
            .accounts
            .login_with_code("+919000000001", &code)
            .await
            .unwrap();
        assert!(user.is_verified);
    }

    #[tokio::test]
    async fn test_sms_failure_is_gateway_error() {
        let f = fixture();
        f.sms.set_fail_on_send(true);
        assert!(matches!(
            f.accounts.send_code("+919000000001").await,
            Err(ServiceError::Gateway(_))
        ));
    }

    #[tokio::test]
    async fn test_register_conflicts_on_duplicate_phone() {
        let f = fixture();
        let data = NewUser {
            name: "Asha".to_string(),
            email: None,
            phone: Some("+919000000001".to_string()),
        };
        f.accounts.register(data.clone()).await.unwrap();
        assert!(matches!(
            f.accounts.register(data).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_notification_failure_never_fails_registration() {
        let f = fixture();
        f.notifier.set_fail_on_send(true);

        let user = f
            .accounts
            .register(NewUser {
                name: "Asha".to_string(),
                email: Some("asha@example.com".to_string()),
                phone: None,
            })
            .await
            .unwrap();
        settle().await;

        assert!(f.notifier.sent().is_empty());
        assert_eq!(f.accounts.get_user(user.id).await.unwrap().name, "Asha");
    }

    #[tokio::test]
    async fn test_welcome_notification_is_sent() {
        let f = fixture();
        let user = f
            .accounts
            .register(NewUser {
                name: "Asha".to_string(),
                email: Some("asha@example.com".to_string()),
                phone: None,
            })
            .await
            .unwrap();
        settle().await;

        let sent = f.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user_id, user.id);
    }
}
