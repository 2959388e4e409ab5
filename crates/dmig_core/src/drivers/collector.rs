use crate::{ConfigMap, CoreError, Driver, Record, RecordStream, ResultCollectionItem, SourceEstimate};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Shared keyed store behind every collector driver instance.
///
/// The store is owned by the embedding application (one per runner wiring,
/// typically) and handed to each collector through its factory closure, so
/// a parent migration can replay what a child populated. Appends are
/// serialised by the mutex; the store is append-only during a run and
/// cross-run cleanup is the caller's call.
#[derive(Clone, Default)]
pub struct CollectorStore {
    inner: Arc<Mutex<HashMap<String, Vec<ResultCollectionItem>>>>,
}

impl CollectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, key: &str, item: ResultCollectionItem) {
        if let Ok(mut store) = self.inner.lock() {
            store.entry(key.to_string()).or_default().push(item);
        }
    }

    /// Snapshot of the keyed sequence in insertion order.
    pub fn items(&self, key: &str) -> Vec<ResultCollectionItem> {
        self.inner
            .lock()
            .ok()
            .and_then(|store| store.get(key).cloned())
            .unwrap_or_default()
    }

    pub fn len(&self, key: &str) -> usize {
        self.inner
            .lock()
            .ok()
            .map(|store| store.get(key).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }

    /// Drop one keyed sequence. Never called by the runner; exposed for
    /// embedders that reuse a store across unrelated top-level runs.
    pub fn clear(&self, key: &str) {
        if let Ok(mut store) = self.inner.lock() {
            store.remove(key);
        }
    }
}

/// In-memory fan-in destination and replay source.
///
/// `write_in` appends to the keyed sequence in the shared store and to an
/// instance-local sequence; `init` clears only the local one, so recursive
/// sub-migrations keep accumulating under the same collection key.
pub struct CollectorDriver {
    store: CollectorStore,
    collection_key: Option<String>,
    local: Vec<ResultCollectionItem>,
}

impl CollectorDriver {
    pub fn new(store: CollectorStore) -> Self {
        Self {
            store,
            collection_key: None,
            local: Vec::new(),
        }
    }

    /// Everything collected under this instance's key, across all
    /// producers, in insertion order.
    pub fn collection(&self) -> Vec<ResultCollectionItem> {
        match &self.collection_key {
            Some(key) => self.store.items(key),
            None => Vec::new(),
        }
    }

    /// What this instance itself accepted since the last `init`.
    pub fn local_collection(&self) -> &[ResultCollectionItem] {
        &self.local
    }

    fn key(&self) -> Result<&str, CoreError> {
        self.collection_key
            .as_deref()
            .ok_or(CoreError::NotConfigured("collector"))
    }
}

impl Driver for CollectorDriver {
    fn configure(&mut self, config: &ConfigMap) -> Result<(), CoreError> {
        self.collection_key = Some(config.require_str("collectionKey")?.to_string());
        Ok(())
    }

    fn init(&mut self) {
        self.local.clear();
    }

    fn stream_out(&mut self, _query: &str, _args: &[String]) -> Result<RecordStream, CoreError> {
        let key = self.key()?;
        let records = self
            .store
            .items(key)
            .into_iter()
            .map(|item| item.record)
            .collect();
        Ok(RecordStream::from_records(records))
    }

    fn write_in(&mut self, _query: &str, args: &[String], record: &Record) -> Result<(), CoreError> {
        let key = self.key()?.to_string();
        let item = ResultCollectionItem {
            record: record.clone(),
            args: args.to_vec(),
        };
        self.store.append(&key, item.clone());
        self.local.push(item);
        Ok(())
    }

    fn expected_out(&mut self) -> Result<SourceEstimate, CoreError> {
        let key = self.key()?;
        Ok(SourceEstimate::exactly(self.store.len(key) as u64))
    }

    fn has_out_query(&self) -> bool {
        true
    }

    fn has_in_query(&self) -> bool {
        true
    }

    fn has_count_query(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
