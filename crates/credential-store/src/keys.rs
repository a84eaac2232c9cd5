//! Storage key constants.

/// Storage keys used by the TV client
pub struct StorageKeys;

impl StorageKeys {
    /// Serialized session record (tokens plus provider metadata).
    /// Absence means the client is logged out.
    pub const AUTH_DATA: &'static str = "auth_data";

    /// Stable identifier for this TV, used as the push channel name
    pub const DEVICE_ID: &'static str = "device_id";
}
