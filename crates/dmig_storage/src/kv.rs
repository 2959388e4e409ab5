use crate::StorageError;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// Bucket used by the script host's `persistVal`.
pub const PERSIST_VAL_BUCKET: &str = "persistVal";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    bucket TEXT NOT NULL,
    key    TEXT NOT NULL,
    value  TEXT NOT NULL,
    PRIMARY KEY (bucket, key)
)";

/// Tracks in-flight background writes so `flush` can wait for them.
#[derive(Default)]
struct PendingWrites {
    count: Mutex<usize>,
    zero: Condvar,
}

impl PendingWrites {
    fn enter(&self) {
        if let Ok(mut count) = self.count.lock() {
            *count += 1;
        }
    }

    fn leave(&self) {
        if let Ok(mut count) = self.count.lock() {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.zero.notify_all();
            }
        }
    }

    fn wait(&self) {
        if let Ok(mut count) = self.count.lock() {
            while *count > 0 {
                match self.zero.wait(count) {
                    Ok(guard) => count = guard,
                    Err(_) => return,
                }
            }
        }
    }
}

/// Bucketed key/value store over one SQLite file.
///
/// Values are write-once from `persist_val`'s point of view: the first
/// value stored under a key stays, later writes under the same key are
/// ignored. The connection uses a short busy timeout so a locked file
/// surfaces as an error instead of a hang.
#[derive(Clone)]
pub struct KvStore {
    conn: Arc<Mutex<Connection>>,
    pending: Arc<PendingWrites>,
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore").finish_non_exhaustive()
    }
}

impl KvStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let open_err = |e: rusqlite::Error| StorageError::Open {
            path: path.display().to_string(),
            message: e.to_string(),
        };

        let conn = Connection::open(path).map_err(open_err)?;
        conn.busy_timeout(Duration::from_secs(1)).map_err(open_err)?;
        conn.execute_batch(SCHEMA).map_err(open_err)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            pending: Arc::new(PendingWrites::default()),
        })
    }

    pub fn get(&self, bucket: &str, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StorageError::Read("kv connection poisoned".to_string()))?;

        conn.query_row(
            "SELECT value FROM kv WHERE bucket = ?1 AND key = ?2",
            params![bucket, key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| StorageError::Read(e.to_string()))
    }

    /// Store a value unless the key already holds one.
    pub fn put_if_absent(&self, bucket: &str, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StorageError::Write("kv connection poisoned".to_string()))?;

        conn.execute(
            "INSERT OR IGNORE INTO kv (bucket, key, value) VALUES (?1, ?2, ?3)",
            params![bucket, key, value],
        )
        .map(|_| ())
        .map_err(|e| StorageError::Write(e.to_string()))
    }

    /// The `persistVal` contract: return the stored value when the key is
    /// known; otherwise dispatch the write of `fallback` to a background
    /// thread and return `fallback`. Two concurrent misses of one key may
    /// both see `fallback` — which is the point: fallback *is* the value.
    pub fn persist_val(&self, key: &str, fallback: &str) -> Result<String, StorageError> {
        if let Some(stored) = self.get(PERSIST_VAL_BUCKET, key)? {
            return Ok(stored);
        }

        let store = self.clone();
        let key = key.to_string();
        let value = fallback.to_string();
        self.pending.enter();
        thread::spawn(move || {
            if let Err(e) = store.put_if_absent(PERSIST_VAL_BUCKET, &key, &value) {
                log::error!("persistVal write for {} failed: {}", key, e);
            }
            store.pending.leave();
        });

        Ok(fallback.to_string())
    }

    /// Block until every dispatched background write has landed.
    pub fn flush(&self) {
        self.pending.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, KvStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open(&dir.path().join("example-people.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn get_on_a_fresh_store_is_none() {
        let (_dir, store) = open_temp();
        assert!(store.get(PERSIST_VAL_BUCKET, "k").unwrap().is_none());
    }

    #[test]
    fn first_value_wins() {
        let (_dir, store) = open_temp();
        store.put_if_absent("b", "k", "first").unwrap();
        store.put_if_absent("b", "k", "second").unwrap();
        assert_eq!(store.get("b", "k").unwrap().as_deref(), Some("first"));
    }

    #[test]
    fn buckets_are_isolated() {
        let (_dir, store) = open_temp();
        store.put_if_absent("a", "k", "in-a").unwrap();
        assert!(store.get("b", "k").unwrap().is_none());
    }

    #[test]
    fn persist_val_returns_fallback_then_sticks() {
        let (_dir, store) = open_temp();

        assert_eq!(store.persist_val("id", "A").unwrap(), "A");
        store.flush();
        assert_eq!(store.persist_val("id", "B").unwrap(), "A");
        assert_eq!(store.persist_val("id", "C").unwrap(), "A");
    }

    #[test]
    fn persist_val_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("example-people.db");

        {
            let store = KvStore::open(&path).unwrap();
            assert_eq!(store.persist_val("id", "A").unwrap(), "A");
            store.flush();
        }

        let store = KvStore::open(&path).unwrap();
        assert_eq!(store.persist_val("id", "Z").unwrap(), "A");
    }

    #[test]
    fn open_fails_on_an_unwritable_path() {
        let err = KvStore::open(Path::new("/proc/definitely/not/here.db")).unwrap_err();
        assert!(matches!(err, StorageError::Open { .. }));
    }
}
