//! In-process record store for dry runs and tests

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use waldo_common::{Attributes, MetadataRecord};

use super::RecordStore;
use crate::error::StoreError;

/// Map-backed [`RecordStore`]; clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    records: Arc<Mutex<BTreeMap<String, Attributes>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored record, ordered by key.
    pub fn snapshot(&self) -> Vec<MetadataRecord> {
        match self.records.lock() {
            Ok(records) => records
                .iter()
                .map(|(key, attributes)| MetadataRecord::from_parts(key.clone(), attributes.clone()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn open_records(&self) -> Result<MutexGuard<'_, BTreeMap<String, Attributes>>, StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        self.records
            .lock()
            .map_err(|_| StoreError::Rejected("record map lock poisoned".to_string()))
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn upsert(&self, record: &MetadataRecord) -> Result<(), StoreError> {
        let mut records = self.open_records()?;
        let replaced = records
            .insert(record.source_key().to_string(), record.attributes().clone())
            .is_some();
        debug!(source_key = record.source_key(), replaced, "Stored record in memory");
        Ok(())
    }

    async fn find_by_key(&self, source_key: &str) -> Result<Option<MetadataRecord>, StoreError> {
        let records = self.open_records()?;
        Ok(records
            .get(source_key)
            .map(|attributes| MetadataRecord::from_parts(source_key, attributes.clone())))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(key: &str, make: &str) -> MetadataRecord {
        let mut attributes = Attributes::new();
        attributes.insert("image".into(), json!({ "Make": make }));
        MetadataRecord::from_parts(key, attributes)
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_key() {
        let store = MemoryRecordStore::new();
        store.upsert(&record("a.jpg", "Acme")).await.unwrap();
        store.upsert(&record("a.jpg", "Globex")).await.unwrap();
        store.upsert(&record("b.jpg", "Acme")).await.unwrap();

        assert_eq!(store.len(), 2);
        let found = store.find_by_key("a.jpg").await.unwrap().unwrap();
        assert_eq!(found.attributes()["image"]["Make"], "Globex");
        assert!(store.find_by_key("c.jpg").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_store_rejects_calls() {
        let store = MemoryRecordStore::new();
        let handle = store.clone();
        store.close().await;

        assert!(handle.is_closed());
        assert!(matches!(
            handle.upsert(&record("a.jpg", "Acme")).await,
            Err(StoreError::Closed)
        ));
        assert!(matches!(handle.find_by_key("a.jpg").await, Err(StoreError::Closed)));
    }
}
