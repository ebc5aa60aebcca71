//! In-memory store used by tests and by degraded operation.

use super::Store;
use crate::{FixerError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>> {
        self.entries
            .lock()
            .map_err(|_| FixerError::LockPoisoned("memory store".to_string()))
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_get_delete() {
        let store = MemoryStore::new();
        assert!(store.get("k").unwrap().is_none());

        store.set("k", &json!({"a": 1})).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!({"a": 1})));
        assert_eq!(store.len(), 1);

        store.delete("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn delete_missing_is_ok() {
        let store = MemoryStore::new();
        assert!(store.delete("nothing").is_ok());
    }
}
