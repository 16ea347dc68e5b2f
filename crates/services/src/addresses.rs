//! Saved shipping addresses.

use std::sync::Arc;

use chrono::Utc;
use common::{AddressId, UserId};
use domain::{Address, NewAddress};
use store::AddressStore;

use crate::error::{Result, ServiceError};

/// A user's address book. Every operation is scoped to the owner.
pub struct AddressService<S> {
    store: Arc<S>,
}

impl<S: AddressStore> AddressService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Saves an address. The first one becomes the default, and a new
    /// default replaces the previous one.
    pub async fn create(&self, user_id: UserId, data: NewAddress) -> Result<Address> {
        data.validate()?;
        let address = Address::from_new(user_id, data, Utc::now());
        Ok(self.store.insert_address(address).await?)
    }

    /// Default first, then newest.
    pub async fn list(&self, user_id: UserId) -> Result<Vec<Address>> {
        Ok(self.store.list_addresses(user_id).await?)
    }

    pub async fn get(&self, address_id: AddressId, user_id: UserId) -> Result<Address> {
        self.store
            .get_address(address_id)
            .await?
            .filter(|address| address.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound("Address not found".to_string()))
    }

    pub async fn set_default(&self, address_id: AddressId, user_id: UserId) -> Result<Address> {
        let address = self.get(address_id, user_id).await?;
        Ok(self.store.set_default_address(user_id, address.id).await?)
    }

    pub async fn delete(&self, address_id: AddressId, user_id: UserId) -> Result<()> {
        let address = self.get(address_id, user_id).await?;
        self.store.delete_address(address.id).await?;
        Ok(())
    }
}
