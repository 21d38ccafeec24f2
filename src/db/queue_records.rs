use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{RecordStore, StoreError};
use crate::models::{
    AssetRef, NewRecord, QueueRecord, RecordStatus, RecordUpdate, VideoMetadata,
};

#[derive(Debug, Clone, sqlx::FromRow)]
struct QueueRecordRow {
    id: Uuid,
    seq: i64,
    asset_ref: String,
    filename: String,
    caption: Option<String>,
    status: String,
    priority: Option<i32>,
    title: Option<String>,
    description: Option<String>,
    tags: Option<Vec<String>>,
    scheduled_for: Option<NaiveDate>,
    attempts: i32,
    last_error: Option<String>,
    published_at: Option<DateTime<Utc>>,
    publish_ref: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<QueueRecordRow> for QueueRecord {
    type Error = StoreError;

    fn try_from(row: QueueRecordRow) -> Result<Self, Self::Error> {
        let status = RecordStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("record {} has unknown status '{}'", row.id, row.status))
        })?;

        let metadata = row.title.map(|title| VideoMetadata {
            title,
            description: row.description.unwrap_or_default(),
            tags: row.tags.unwrap_or_default(),
        });

        Ok(QueueRecord {
            id: row.id,
            seq: row.seq,
            asset_ref: AssetRef(row.asset_ref),
            filename: row.filename,
            caption: row.caption,
            status,
            priority: row.priority,
            metadata,
            scheduled_for: row.scheduled_for,
            attempts: row.attempts,
            last_error: row.last_error,
            published_at: row.published_at,
            publish_ref: row.publish_ref,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_records(rows: Vec<QueueRecordRow>) -> Result<Vec<QueueRecord>, StoreError> {
    rows.into_iter().map(QueueRecord::try_from).collect()
}

/// PostgreSQL-backed record store.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn create(&self, new: NewRecord) -> Result<QueueRecord, StoreError> {
        let row = sqlx::query_as::<_, QueueRecordRow>(
            "INSERT INTO queue_records (id, asset_ref, filename, caption, priority)
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(new.asset_ref.as_str())
        .bind(&new.context.filename)
        .bind(&new.context.caption)
        .bind(new.context.priority)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get(&self, id: Uuid) -> Result<QueueRecord, StoreError> {
        let row = sqlx::query_as::<_, QueueRecordRow>("SELECT * FROM queue_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        row.try_into()
    }

    async fn list_by_status(&self, status: RecordStatus) -> Result<Vec<QueueRecord>, StoreError> {
        let rows = sqlx::query_as::<_, QueueRecordRow>(
            "SELECT * FROM queue_records WHERE status = $1 ORDER BY seq ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        into_records(rows)
    }

    async fn list_scheduled_on(&self, date: NaiveDate) -> Result<Vec<QueueRecord>, StoreError> {
        let rows = sqlx::query_as::<_, QueueRecordRow>(
            "SELECT * FROM queue_records WHERE scheduled_for = $1 ORDER BY seq ASC",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        into_records(rows)
    }

    /// Row-locked read-modify-write inside one transaction.
    async fn update(
        &self,
        id: Uuid,
        expected_version: i64,
        patch: RecordUpdate,
    ) -> Result<QueueRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, QueueRecordRow>(
            "SELECT * FROM queue_records WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound)?;

        let mut record = QueueRecord::try_from(row)?;
        if record.version != expected_version {
            return Err(StoreError::Conflict);
        }
        patch.apply_to(&mut record, Utc::now());

        let (title, description, tags) = match record.metadata {
            Some(ref m) => (
                Some(m.title.as_str()),
                Some(m.description.as_str()),
                Some(m.tags.clone()),
            ),
            None => (None, None, None),
        };

        let row = sqlx::query_as::<_, QueueRecordRow>(
            "UPDATE queue_records
             SET status = $2, priority = $3, title = $4, description = $5, tags = $6,
                 scheduled_for = $7, attempts = $8, last_error = $9, published_at = $10,
                 publish_ref = $11, version = $12, updated_at = $13
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(record.status.as_str())
        .bind(record.priority)
        .bind(title)
        .bind(description)
        .bind(tags)
        .bind(record.scheduled_for)
        .bind(record.attempts)
        .bind(&record.last_error)
        .bind(record.published_at)
        .bind(&record.publish_ref)
        .bind(record.version)
        .bind(record.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn count_published_on(
        &self,
        date: NaiveDate,
        offset: FixedOffset,
    ) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_records
             WHERE status = 'uploaded'
               AND ((published_at AT TIME ZONE 'UTC')
                    + make_interval(secs => $2::double precision))::date = $1",
        )
        .bind(date)
        .bind(offset.local_minus_utc() as f64)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as usize)
    }
}
