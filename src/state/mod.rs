pub mod snapshot;
pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::StoreError;
use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

/// A value held by a [`KeyValueStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    Text(String),
    Set(BTreeSet<String>),
}

/// Flat, string-keyed, last-write-wins storage.
pub trait KeyValueStore: Send + Sync {
    fn get_string(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put_string(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn get_string_set(&self, key: &str) -> Result<Option<BTreeSet<String>>, StoreError>;
    fn put_string_set(&self, key: &str, value: BTreeSet<String>) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Process-local store. Also serves as the read mirror of [`SqliteStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_values(values: HashMap<String, StoredValue>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    pub fn len(&self) -> usize {
        self.values.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn insert(&self, key: &str, value: StoredValue) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }

    fn get(&self, key: &str) -> Option<StoredValue> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.get(key) {
            None => Ok(None),
            Some(StoredValue::Text(value)) => Ok(Some(value)),
            Some(StoredValue::Set(_)) => Err(StoreError::WrongType {
                key: key.to_string(),
                expected: "string",
            }),
        }
    }

    fn put_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.insert(key, StoredValue::Text(value.to_string()));
        Ok(())
    }

    fn get_string_set(&self, key: &str) -> Result<Option<BTreeSet<String>>, StoreError> {
        match self.get(key) {
            None => Ok(None),
            Some(StoredValue::Set(values)) => Ok(Some(values)),
            Some(StoredValue::Text(_)) => Err(StoreError::WrongType {
                key: key.to_string(),
                expected: "string set",
            }),
        }
    }

    fn put_string_set(&self, key: &str, value: BTreeSet<String>) -> Result<(), StoreError> {
        self.insert(key, StoredValue::Set(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}
