use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::{RecordStore, StoreError};
use crate::models::{NewRecord, QueueRecord, RecordStatus, RecordUpdate};

/// In-process record store, used when no database is configured.
///
/// Each record lives behind its dashmap shard lock, so a patch is never
/// observed half-applied.
pub struct MemoryRecordStore {
    records: DashMap<Uuid, QueueRecord>,
    next_seq: AtomicI64,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_seq: AtomicI64::new(1),
        }
    }

    fn collect<F>(&self, pred: F) -> Vec<QueueRecord>
    where
        F: Fn(&QueueRecord) -> bool,
    {
        let mut out: Vec<QueueRecord> = self
            .records
            .iter()
            .filter(|entry| pred(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        out.sort_by_key(|r| r.seq);
        out
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, new: NewRecord) -> Result<QueueRecord, StoreError> {
        let now = Utc::now();
        let record = QueueRecord {
            id: Uuid::now_v7(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            asset_ref: new.asset_ref,
            filename: new.context.filename,
            caption: new.context.caption,
            status: RecordStatus::Pending,
            priority: new.context.priority,
            metadata: None,
            scheduled_for: None,
            attempts: 0,
            last_error: None,
            published_at: None,
            publish_ref: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<QueueRecord, StoreError> {
        self.records
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn list_by_status(&self, status: RecordStatus) -> Result<Vec<QueueRecord>, StoreError> {
        Ok(self.collect(|r| r.status == status))
    }

    async fn list_scheduled_on(&self, date: NaiveDate) -> Result<Vec<QueueRecord>, StoreError> {
        Ok(self.collect(|r| r.scheduled_for == Some(date)))
    }

    async fn update(
        &self,
        id: Uuid,
        expected_version: i64,
        patch: RecordUpdate,
    ) -> Result<QueueRecord, StoreError> {
        let mut entry = self.records.get_mut(&id).ok_or(StoreError::NotFound)?;
        if entry.version != expected_version {
            return Err(StoreError::Conflict);
        }
        patch.apply_to(entry.value_mut(), Utc::now());
        Ok(entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssetRef, SubmissionContext};

    fn new_record(name: &str) -> NewRecord {
        NewRecord {
            asset_ref: AssetRef(format!("local:{name}")),
            context: SubmissionContext {
                filename: name.to_string(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let store = MemoryRecordStore::new();
        let rec = store.create(new_record("a.mp4")).await.unwrap();

        let updated = store
            .update(rec.id, rec.version, RecordUpdate::status(RecordStatus::Scheduled))
            .await
            .unwrap();
        assert_eq!(updated.version, rec.version + 1);

        let err = store
            .update(rec.id, rec.version, RecordUpdate::status(RecordStatus::Failed))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
        assert_eq!(store.get(rec.id).await.unwrap().status, RecordStatus::Scheduled);
    }

    #[tokio::test]
    async fn listings_are_fifo() {
        let store = MemoryRecordStore::new();
        let a = store.create(new_record("a.mp4")).await.unwrap();
        let b = store.create(new_record("b.mp4")).await.unwrap();
        let c = store.create(new_record("c.mp4")).await.unwrap();

        let ids: Vec<Uuid> = store
            .list_by_status(RecordStatus::Pending)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let store = MemoryRecordStore::new();
        let err = store
            .update(Uuid::now_v7(), 0, RecordUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}
