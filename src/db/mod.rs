pub mod memory;
pub mod queue_records;

use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate};
use uuid::Uuid;

use crate::models::{NewRecord, QueueRecord, RecordStatus, RecordUpdate};

pub use memory::MemoryRecordStore;
pub use queue_records::PgRecordStore;

#[derive(Debug)]
pub enum StoreError {
    NotFound,
    /// The record changed since it was read; the caller should re-read and retry.
    Conflict,
    Corrupt(String),
    Database(sqlx::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "record not found"),
            StoreError::Conflict => write!(f, "record was modified concurrently"),
            StoreError::Corrupt(msg) => write!(f, "corrupt record: {msg}"),
            StoreError::Database(err) => write!(f, "database error: {err}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err)
    }
}

/// Durable home of queue records.
///
/// `update` is the only write after creation. It applies the whole patch or
/// nothing, and only when the stored version still equals `expected_version`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, new: NewRecord) -> Result<QueueRecord, StoreError>;

    async fn get(&self, id: Uuid) -> Result<QueueRecord, StoreError>;

    /// Records with the given status, oldest first.
    async fn list_by_status(&self, status: RecordStatus) -> Result<Vec<QueueRecord>, StoreError>;

    /// Records of any status whose `scheduled_for` equals `date`, oldest first.
    async fn list_scheduled_on(&self, date: NaiveDate) -> Result<Vec<QueueRecord>, StoreError>;

    async fn update(
        &self,
        id: Uuid,
        expected_version: i64,
        patch: RecordUpdate,
    ) -> Result<QueueRecord, StoreError>;

    /// Number of `Uploaded` records whose `published_at` falls on `date` in `offset`.
    async fn count_published_on(
        &self,
        date: NaiveDate,
        offset: FixedOffset,
    ) -> Result<usize, StoreError> {
        let uploaded = self.list_by_status(RecordStatus::Uploaded).await?;
        Ok(uploaded
            .iter()
            .filter_map(|r| r.published_at)
            .filter(|ts| ts.with_timezone(&offset).date_naive() == date)
            .count())
    }
}
