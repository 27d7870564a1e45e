//! Persistence sink
//!
//! Upserts every extracted record into a [`RecordStore`], one write per
//! record, through the batch runner so a failed write never blocks the
//! rest of the batch.

use tracing::{info, warn};
use waldo_common::MetadataRecord;

use crate::error::PersistenceError;
use crate::runner::{BatchResult, BatchRunner};
use crate::store::RecordStore;

pub const STAGE_NAME: &str = "persist";

pub struct PersistenceSink<'a> {
    store: &'a dyn RecordStore,
}

impl<'a> PersistenceSink<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self { store }
    }

    /// Write one record, returning its key.
    pub async fn upsert(&self, record: MetadataRecord) -> Result<String, PersistenceError> {
        self.store
            .upsert(&record)
            .await
            .map_err(|e| PersistenceError::new(record.source_key(), e))?;
        let (source_key, _) = record.into_parts();
        Ok(source_key)
    }

    /// Upsert every record; outputs are the persisted keys in input order.
    pub async fn upsert_all(
        &self,
        runner: &BatchRunner,
        records: Vec<MetadataRecord>,
    ) -> BatchResult<String, PersistenceError> {
        runner.run(records, move |record| self.upsert(record)).await
    }

    /// Read one record back to confirm it was stored.
    pub async fn verify(&self, source_key: &str) -> Result<Option<MetadataRecord>, PersistenceError> {
        let found = self
            .store
            .find_by_key(source_key)
            .await
            .map_err(|e| PersistenceError::new(source_key, e))?;

        match &found {
            Some(record) => info!(
                source_key,
                sections = record.attributes().len(),
                "Verified stored record"
            ),
            None => warn!(source_key, "Record not found in store"),
        }
        Ok(found)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::runner::RunnerConfig;
    use crate::store::MemoryRecordStore;
    use async_trait::async_trait;
    use serde_json::json;
    use waldo_common::Attributes;

    fn record(key: &str, iso: u32) -> MetadataRecord {
        let mut attributes = Attributes::new();
        attributes.insert("exif".into(), json!({ "PhotographicSensitivity": iso }));
        MetadataRecord::from_parts(key, attributes)
    }

    fn runner() -> BatchRunner {
        BatchRunner::new(STAGE_NAME, RunnerConfig::default()).unwrap()
    }

    /// Rejects writes for one key, delegating the rest.
    struct RejectingStore {
        inner: MemoryRecordStore,
        reject: &'static str,
    }

    #[async_trait]
    impl RecordStore for RejectingStore {
        async fn upsert(&self, record: &MetadataRecord) -> Result<(), StoreError> {
            if record.source_key() == self.reject {
                return Err(StoreError::Rejected("value too long".into()));
            }
            self.inner.upsert(record).await
        }

        async fn find_by_key(&self, key: &str) -> Result<Option<MetadataRecord>, StoreError> {
            self.inner.find_by_key(key).await
        }

        async fn close(&self) {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_upsert_all_is_idempotent() {
        let store = MemoryRecordStore::new();
        let sink = PersistenceSink::new(&store);

        sink.upsert_all(&runner(), vec![record("a.jpg", 100), record("b.jpg", 200)])
            .await;
        let second = sink.upsert_all(&runner(), vec![record("a.jpg", 400)]).await;

        assert_eq!(second.outputs, vec!["a.jpg".to_string()]);
        assert_eq!(store.len(), 2);
        let stored = sink.verify("a.jpg").await.unwrap().unwrap();
        assert_eq!(stored.attributes()["exif"]["PhotographicSensitivity"], 400);
    }

    #[tokio::test]
    async fn test_failed_write_does_not_block_batch() {
        let store = RejectingStore {
            inner: MemoryRecordStore::new(),
            reject: "bad.jpg",
        };
        let sink = PersistenceSink::new(&store);

        let result = sink
            .upsert_all(
                &runner(),
                vec![record("bad.jpg", 1), record("c.jpg", 2), record("d.jpg", 3)],
            )
            .await;

        assert_eq!(result.outputs, vec!["c.jpg".to_string(), "d.jpg".to_string()]);
        assert_eq!(result.failed_items().collect::<Vec<_>>(), vec!["bad.jpg"]);
        let error = result.failures[0].error.as_failure().unwrap();
        assert_eq!(error.source_key, "bad.jpg");
        assert!(sink.verify("bad.jpg").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_verify_on_closed_store() {
        let store = MemoryRecordStore::new();
        store.close().await;

        let err = PersistenceSink::new(&store).verify("a.jpg").await.unwrap_err();
        assert!(matches!(err.cause, StoreError::Closed));
    }
}
