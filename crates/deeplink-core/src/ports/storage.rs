//! KeyValueStore port - 端末ローカルの永続 KV ストア
//!
//! セッション状態（identity id, session id, ...）と、直列化した
//! リクエストキューの両方をここに保存します。実装側は内部で同期を取る前提です。

/// Failure reported by a key/value backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage write failed for key={key}: {message}")]
    Write { key: String, message: String },

    #[error("failed to encode value for key={key}: {message}")]
    Encode { key: String, message: String },
}

pub trait KeyValueStore: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;
    fn set_string(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn get_int(&self, key: &str) -> Option<i64>;
    fn set_int(&self, key: &str, value: i64) -> Result<(), StorageError>;

    fn get_bool(&self, key: &str) -> Option<bool>;
    fn set_bool(&self, key: &str, value: bool) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;
}
