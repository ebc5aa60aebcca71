//! Persistence layer for the offline subsystem.
//!
//! Every stateful component talks to a [`Store`]: a durable string-keyed map of
//! JSON values. Serialization lives here and nowhere else.

pub mod memory;
pub mod resilient;
pub mod sqlite;

pub use memory::MemoryStore;
pub use resilient::ResilientStore;
pub use sqlite::SqliteStore;

use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Well-known store keys.
pub mod keys {
    pub const QUEUE_REPORTS: &str = "queue.reports";
    pub const QUEUE_VERIFICATIONS: &str = "queue.verifications";
    pub const CACHE_RESOURCES: &str = "cache.resources";
    pub const DEVICE_IDENTITY: &str = "device.identity";

    /// Key of the sliding window for `action` performed by `device_id`.
    pub fn rate_limit(action: &str, device_id: &str) -> String {
        format!("ratelimit.{}.{}", action, device_id)
    }
}

/// Durable key/value store. Each call is atomic on its own.
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: &Value) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

impl dyn Store + '_ {
    /// Read and deserialize a value.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Serialize and write a value.
    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set(key, &value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn rate_limit_key_format() {
        assert_eq!(
            keys::rate_limit("reports", "abc123"),
            "ratelimit.reports.abc123"
        );
    }

    #[test]
    fn typed_roundtrip_through_dyn_store() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store.save("numbers", &vec![1i64, 2, 3]).unwrap();
        let loaded: Option<Vec<i64>> = store.load("numbers").unwrap();
        assert_eq!(loaded, Some(vec![1, 2, 3]));

        let missing: Option<Vec<i64>> = store.load("absent").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn load_with_wrong_shape_is_an_error() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store.save("text", "hello").unwrap();
        let result: Result<Option<Vec<i64>>> = store.load("text");
        assert!(matches!(result, Err(crate::FixerError::Serialization(_))));
    }
}
