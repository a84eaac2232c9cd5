//! Typed access on top of a [`CredentialStore`].

use crate::{CredentialStore, StorageKeys, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Shared handle that stores JSON records and the device identity.
#[derive(Clone)]
pub struct CredentialVault {
    store: Arc<dyn CredentialStore>,
}

impl CredentialVault {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Decode the JSON record under `key`.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.store.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Encode `value` as JSON and store it under `key`.
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> StorageResult<()> {
        let raw = serde_json::to_string(value)?;
        self.store.set(key, &raw)
    }

    pub fn delete(&self, key: &str) -> StorageResult<bool> {
        self.store.delete(key)
    }

    pub fn has(&self, key: &str) -> StorageResult<bool> {
        self.store.has(key)
    }

    pub fn set_device_id(&self, device_id: &str) -> StorageResult<()> {
        self.store.set(StorageKeys::DEVICE_ID, device_id)
    }

    pub fn device_id(&self) -> StorageResult<Option<String>> {
        self.store.get(StorageKeys::DEVICE_ID)
    }

    /// Return the persisted device id, generating and storing a new one on
    /// first use.
    pub fn device_id_or_create(&self) -> StorageResult<String> {
        if let Some(existing) = self.device_id()?.filter(|id| !id.is_empty()) {
            return Ok(existing);
        }
        let device_id = uuid::Uuid::new_v4().to_string();
        self.set_device_id(&device_id)?;
        info!(device_id = %device_id, "generated new device id");
        Ok(device_id)
    }
}
