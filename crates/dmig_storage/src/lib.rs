//! Persistent per-migration key/value storage.
//!
//! One SQLite file per `(project, migration)` pair holds named buckets of
//! string keys and values. The store backs the script host's `persistVal`:
//! a stable mapping from a key to the first value ever observed for it,
//! surviving across runs.

mod kv;
mod manager;

pub use kv::{KvStore, PERSIST_VAL_BUCKET};
pub use manager::StoreManager;

use thiserror::Error;

/// Storage failures. None of these abort a migration; callers log them and
/// fall back.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open kv store {path}: {message}")]
    Open { path: String, message: String },

    #[error("kv read failed: {0}")]
    Read(String),

    #[error("kv write failed: {0}")]
    Write(String),
}
