//! Caller identity and role checks.

use common::UserId;
use domain::Role;

use crate::error::{Result, ServiceError};

/// Roles allowed to change the catalog.
pub const CATALOG_MANAGERS: &[Role] = &[Role::SuperAdmin, Role::Admin, Role::Marketing];

/// Roles allowed to move orders through their lifecycle.
pub const ORDER_MANAGERS: &[Role] = &[Role::SuperAdmin, Role::Admin, Role::Support];

/// The authenticated user making a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    /// A regular shopper.
    pub fn customer(user_id: UserId) -> Self {
        Self::new(user_id, Role::User)
    }

    /// Fails with `Forbidden` unless the caller holds one of `roles`.
    pub fn require_any(&self, roles: &[Role]) -> Result<()> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "Role {} may not perform this action",
                self.role
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_sets() {
        let marketing = Caller::new(UserId::new(), Role::Marketing);
        assert!(marketing.require_any(CATALOG_MANAGERS).is_ok());
        assert!(matches!(
            marketing.require_any(ORDER_MANAGERS),
            Err(ServiceError::Forbidden(_))
        ));

        let shopper = Caller::customer(UserId::new());
        assert!(shopper.require_any(CATALOG_MANAGERS).is_err());
    }
}
