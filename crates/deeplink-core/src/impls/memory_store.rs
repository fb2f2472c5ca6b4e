//! MemoryStore - 開発用・テスト用の KeyValueStore
//!
//! プロセス内の HashMap に保存するだけ。`Arc` で共有すれば
//! 「プロセス再起動後に同じストレージを開く」状況を再現できます。

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::ports::{KeyValueStore, StorageError};

#[derive(Debug, Clone, PartialEq)]
enum Stored {
    Str(String),
    Int(i64),
    Bool(bool),
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Stored>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Stored>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn put(&self, key: &str, value: Stored) -> Result<(), StorageError> {
        self.lock().insert(key.to_string(), value);
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get_string(&self, key: &str) -> Option<String> {
        match self.lock().get(key) {
            Some(Stored::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.put(key, Stored::Str(value.to_string()))
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        match self.lock().get(key) {
            Some(Stored::Int(n)) => Some(*n),
            _ => None,
        }
    }

    fn set_int(&self, key: &str, value: i64) -> Result<(), StorageError> {
        self.put(key, Stored::Int(value))
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.lock().get(key) {
            Some(Stored::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), StorageError> {
        self.put(key, Stored::Bool(value))
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock().remove(key);
        Ok(())
    }
}
