//! Credential persistence for the TV client.
//!
//! The session layer only needs a key/value contract, so backends are small:
//! - [`MemoryCredentialStore`] keeps everything in process
//! - [`FileCredentialStore`] keeps one private JSON file on disk
//!
//! [`CredentialVault`] layers JSON records and the device identity on top.

mod file;
mod keys;
mod memory;
mod traits;
mod vault;

pub use file::FileCredentialStore;
pub use keys::StorageKeys;
pub use memory::MemoryCredentialStore;
pub use traits::CredentialStore;
pub use vault::CredentialVault;

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Stored data is not in the expected shape
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Create a vault backed by the credentials file at `path`.
pub fn open_file_vault(path: &Path) -> CredentialVault {
    CredentialVault::new(Arc::new(FileCredentialStore::new(path)))
}
