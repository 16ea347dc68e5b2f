//! Accounts, roles, shipping addresses and one-time login codes.

use chrono::{DateTime, Duration, Utc};
use common::{AddressId, UserId};
use serde::{Deserialize, Serialize};

use crate::DomainError;

/// Access role of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    SuperAdmin,
    Admin,
    Finance,
    Marketing,
    Support,
    #[default]
    User,
}

impl Role {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "superadmin",
            Role::Admin => "admin",
            Role::Finance => "finance",
            Role::Marketing => "marketing",
            Role::Support => "support",
            Role::User => "user",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "superadmin" => Ok(Role::SuperAdmin),
            "admin" => Ok(Role::Admin),
            "finance" => Ok(Role::Finance),
            "marketing" => Ok(Role::Marketing),
            "support" => Ok(Role::Support),
            "user" => Ok(Role::User),
            other => Err(DomainError::UnknownVariant {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: Role,
    /// Set once the phone number has been confirmed with a login code.
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn from_new(data: NewUser, now: DateTime<Utc>) -> Self {
        Self {
            id: UserId::new(),
            name: data.name,
            email: data.email,
            phone: data.phone,
            role: Role::User,
            is_verified: false,
            created_at: now,
        }
    }
}

/// Registration data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl NewUser {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::EmptyField { field: "name" });
        }
        if self.email.is_none() && self.phone.is_none() {
            return Err(DomainError::EmptyField {
                field: "email or phone",
            });
        }
        Ok(())
    }
}

/// Postal fields shared by saved addresses and order snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSnapshot {
    pub full_name: String,
    pub phone: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

/// A saved shipping address of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub user_id: UserId,
    #[serde(flatten)]
    pub postal: AddressSnapshot,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl Address {
    pub fn from_new(user_id: UserId, data: NewAddress, now: DateTime<Utc>) -> Self {
        Self {
            id: AddressId::new(),
            user_id,
            postal: data.postal,
            is_default: data.is_default,
            created_at: now,
        }
    }

    /// Copy of the postal fields, embedded into orders.
    pub fn snapshot(&self) -> AddressSnapshot {
        self.postal.clone()
    }
}

/// Data required to save an address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAddress {
    #[serde(flatten)]
    pub postal: AddressSnapshot,
    #[serde(default)]
    pub is_default: bool,
}

impl NewAddress {
    pub fn validate(&self) -> Result<(), DomainError> {
        let required = [
            ("full_name", &self.postal.full_name),
            ("phone", &self.postal.phone),
            ("line1", &self.postal.line1),
            ("city", &self.postal.city),
            ("postal_code", &self.postal.postal_code),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(DomainError::EmptyField { field });
            }
        }
        Ok(())
    }
}

/// Wrong guesses a login code survives before it is discarded.
pub const MAX_OTP_ATTEMPTS: u32 = 5;

/// A one-time login code bound to a phone number.
///
/// Expiry is checked on read; nothing evicts old codes in the background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpCode {
    pub phone: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    /// Wrong guesses made against this code so far.
    pub attempts: u32,
}

impl OtpCode {
    pub fn new(
        phone: impl Into<String>,
        code: impl Into<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            phone: phone.into(),
            code: code.into(),
            expires_at: now + ttl,
            attempts: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= MAX_OTP_ATTEMPTS
    }

    /// Returns true if `code` matches and the code is neither expired nor
    /// out of attempts.
    pub fn accepts(&self, code: &str, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && !self.is_exhausted() && self.code == code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn postal() -> AddressSnapshot {
        AddressSnapshot {
            full_name: "Asha Rao".to_string(),
            phone: "9000000001".to_string(),
            line1: "12 MG Road".to_string(),
            line2: None,
            city: "Pune".to_string(),
            state: "MH".to_string(),
            postal_code: "411001".to_string(),
            country: "IN".to_string(),
        }
    }

    #[test]
    fn roles_round_trip_through_wire_names() {
        for role in [
            Role::SuperAdmin,
            Role::Admin,
            Role::Finance,
            Role::Marketing,
            Role::Support,
            Role::User,
        ] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
            assert_eq!(
                serde_json::to_string(&role).unwrap(),
                format!("\"{}\"", role.as_str())
            );
        }
    }

    #[test]
    fn new_user_needs_a_contact() {
        let data = NewUser {
            name: "Asha".to_string(),
            email: None,
            phone: None,
        };
        assert!(data.validate().is_err());
    }

    #[test]
    fn new_address_requires_postal_fields() {
        let mut data = NewAddress {
            postal: postal(),
            is_default: false,
        };
        assert!(data.validate().is_ok());
        data.postal.city = "  ".to_string();
        assert_eq!(data.validate(), Err(DomainError::EmptyField { field: "city" }));
    }

    #[test]
    fn address_json_is_flat() {
        let address = Address::from_new(
            UserId::new(),
            NewAddress {
                postal: postal(),
                is_default: true,
            },
            Utc::now(),
        );
        let json = serde_json::to_value(&address).unwrap();
        assert_eq!(json["city"], "Pune");
        assert_eq!(json["is_default"], true);
    }

    #[test]
    fn otp_expires_after_ttl() {
        let now = Utc::now();
        let otp = OtpCode::new("9000000001", "123456", now, Duration::minutes(5));
        assert!(otp.accepts("123456", now + Duration::minutes(4)));
        assert!(!otp.accepts("654321", now));
        assert!(!otp.accepts("123456", now + Duration::minutes(5)));
    }

    #[test]
    fn exhausted_otp_rejects_right_code() {
        let now = Utc::now();
        let mut otp = OtpCode::new("9000000001", "123456", now, Duration::minutes(5));
        otp.attempts = MAX_OTP_ATTEMPTS - 1;
        assert!(otp.accepts("123456", now));
        otp.attempts = MAX_OTP_ATTEMPTS;
        assert!(!otp.accepts("123456", now));
    }
}
