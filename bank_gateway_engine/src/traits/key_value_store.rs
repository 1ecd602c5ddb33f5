use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum KeyValueError {
    #[error("Key-value backend error: {0}")]
    Backend(String),
    #[error("Could not (de)serialize cached value: {0}")]
    Serialization(String),
}

/// A minimal persistent key-value store with per-entry expiry.
///
/// Implementations must treat an expired entry exactly like a missing one.
#[allow(async_fn_in_trait)]
pub trait KeyValueStore: Clone {
    async fn get(&self, key: &str) -> Result<Option<String>, KeyValueError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KeyValueError>;

    /// Deleting a key that does not exist is not an error.
    async fn delete(&self, key: &str) -> Result<(), KeyValueError>;
}
