//! Typed identifiers for every persisted entity.
//!
//! Each identifier wraps a UUID so that, for example, a `ProductId` can never
//! be passed where a `VariantId` is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

entity_id!(
    /// Identifier of a customer or staff account.
    UserId
);

entity_id!(
    /// Identifier of a catalog product.
    ProductId
);

entity_id!(
    /// Identifier of a size/color variant of a product.
    VariantId
);

entity_id!(
    /// Identifier of a single cart line.
    CartLineId
);

entity_id!(
    /// Identifier of a saved shipping address.
    AddressId
);

entity_id!(
    /// Identifier of an order.
    OrderId
);

entity_id!(
    /// Identifier of a try-on record (upload or generated result).
    TryOnId
);

entity_id!(
    /// Identifier of a favorite marker.
    FavoriteId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_creates_unique_ids() {
        let id1 = OrderId::new();
        let id2 = OrderId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = ProductId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn parses_from_display_form() {
        let id = VariantId::new();
        let parsed: VariantId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!("not-a-uuid".parse::<UserId>().is_err());
    }

    #[test]
    fn serializes_as_bare_uuid() {
        let uuid = Uuid::new_v4();
        let json = serde_json::to_string(&TryOnId::from_uuid(uuid)).unwrap();
        assert_eq!(json, format!("\"{uuid}\""));
    }
}
