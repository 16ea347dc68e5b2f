//! Order status machine.

use serde::{Deserialize, Serialize};

use crate::DomainError;

/// The status of an order in its lifecycle.
///
/// Happy path:
/// ```text
/// Pending ──► Placed ──► Accepted ──► Shipped ──► OutForDelivery ──► Delivered
///    │          │           │            │              │
///    └──────────┴───────────┴────────────┴──────────────┴──► Cancelled
/// ```
///
/// Staff may set any status; every change is recorded on the order timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Created from a cart, awaiting payment. Stock is untouched.
    #[default]
    Pending,

    /// Payment confirmed and stock committed.
    Placed,

    Accepted,

    Shipped,

    OutForDelivery,

    /// Handed to the customer (terminal state).
    Delivered,

    /// Cancelled by staff (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Placed,
        OrderStatus::Accepted,
        OrderStatus::Shipped,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    /// Returns true if a payment confirmation may move the order forward.
    pub fn awaits_payment(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if the order can be cancelled in this status.
    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Placed => "Placed",
            OrderStatus::Accepted => "Accepted",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::OutForDelivery => "OutForDelivery",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::UnknownVariant {
                kind: "order status",
                value: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
    }

    #[test]
    fn test_only_pending_awaits_payment() {
        for status in OrderStatus::ALL {
            assert_eq!(status.awaits_payment(), status == OrderStatus::Pending);
        }
    }

    #[test]
    fn test_can_cancel_from_non_terminal_states() {
        assert!(OrderStatus::Pending.can_cancel());
        assert!(OrderStatus::Placed.can_cancel());
        assert!(OrderStatus::Accepted.can_cancel());
        assert!(OrderStatus::Shipped.can_cancel());
        assert!(OrderStatus::OutForDelivery.can_cancel());
        assert!(!OrderStatus::Delivered.can_cancel());
        assert!(!OrderStatus::Cancelled.can_cancel());
    }

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = OrderStatus::ALL
            .into_iter()
            .filter(OrderStatus::is_terminal)
            .collect();
        assert_eq!(terminal, vec![OrderStatus::Delivered, OrderStatus::Cancelled]);
    }

    #[test]
    fn test_wire_names_round_trip() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert_eq!(OrderStatus::OutForDelivery.to_string(), "OutForDelivery");
    }

    #[test]
    fn test_rejects_unknown_status() {
        let err = "Lost".parse::<OrderStatus>().unwrap_err();
        assert_eq!(
            err,
            DomainError::UnknownVariant {
                kind: "order status",
                value: "Lost".to_string()
            }
        );
    }

    #[test]
    fn test_serialization_uses_wire_name() {
        let json = serde_json::to_string(&OrderStatus::OutForDelivery).unwrap();
        assert_eq!(json, "\"OutForDelivery\"");
        let back: OrderStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, OrderStatus::OutForDelivery);
    }
}
