use crate::{KvStore, StorageError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Opens and memoises one [`KvStore`] per migration.
///
/// Files live at `<dir>/<project>-<migration>.db`. Memoisation keeps a
/// single connection per file inside the process, which is what makes the
/// single-writer assumption of the store hold.
pub struct StoreManager {
    dir: PathBuf,
    project: String,
    open: Mutex<HashMap<String, Arc<KvStore>>>,
}

impl StoreManager {
    pub fn new(dir: impl Into<PathBuf>, project: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            project: project.into(),
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn db_path(&self, migration: &str) -> PathBuf {
        self.dir.join(format!("{}-{}.db", self.project, migration))
    }

    pub fn for_migration(&self, migration: &str) -> Result<Arc<KvStore>, StorageError> {
        let mut open = self
            .open
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(store) = open.get(migration) {
            return Ok(store.clone());
        }

        let store = Arc::new(KvStore::open(&self.db_path(migration))?);
        open.insert(migration.to_string(), store.clone());
        Ok(store)
    }

    /// Wait for every open store's background writes to land. For orderly
    /// shutdown and deterministic tests.
    pub fn flush_all(&self) {
        let open = self
            .open
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for store in open.values() {
            store.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_joins_project_and_migration() {
        let manager = StoreManager::new("/tmp/proj", "example");
        assert_eq!(
            manager.db_path("people"),
            PathBuf::from("/tmp/proj/example-people.db")
        );
    }

    #[test]
    fn stores_are_memoised_per_migration() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StoreManager::new(dir.path(), "example");

        let first = manager.for_migration("people").unwrap();
        let again = manager.for_migration("people").unwrap();
        let other = manager.for_migration("orders").unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert!(dir.path().join("example-people.db").exists());
        assert!(dir.path().join("example-orders.db").exists());
    }
}
