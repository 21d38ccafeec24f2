pub mod clock;
pub mod pass;
pub mod planner;
pub mod quota;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ScheduleConfig;
use crate::db::{RecordStore, StoreError};
use crate::models::{
    AssetRef, NewRecord, QueueRecord, RecordStatus, RecordUpdate, SubmissionContext,
    VideoMetadata,
};
use crate::providers::Providers;

pub use clock::{Clock, ManualClock, SystemClock};
pub use pass::{PassSummary, PassTrigger, Transition};
use pass::UnsettledOutcome;
pub use quota::QuotaCounter;

#[derive(Debug)]
pub enum SchedulerError {
    NotFound,
    /// Another writer changed the record between read and write.
    Conflict,
    InvalidTransition {
        from: RecordStatus,
        to: RecordStatus,
    },
    InvalidEdit(String),
    Store(StoreError),
    /// The scheduler task is gone (shutdown in progress).
    Unavailable,
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::NotFound => write!(f, "record not found"),
            SchedulerError::Conflict => write!(f, "record was modified concurrently, retry"),
            SchedulerError::InvalidTransition { from, to } => {
                write!(f, "cannot move a {from} record to {to}")
            }
            SchedulerError::InvalidEdit(msg) => write!(f, "invalid edit: {msg}"),
            SchedulerError::Store(err) => write!(f, "store error: {err}"),
            SchedulerError::Unavailable => write!(f, "scheduler is not running"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => SchedulerError::NotFound,
            StoreError::Conflict => SchedulerError::Conflict,
            other => SchedulerError::Store(other),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSummary {
    pub pending: usize,
    pub scheduled: usize,
    pub uploading: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub total: usize,
    pub uploads_today: usize,
    pub remaining_today: usize,
    pub max_uploads_per_day: u32,
}

/// Operator changes allowed while a record is still Pending or Scheduled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperatorEdit {
    pub metadata: Option<VideoMetadata>,
    pub scheduled_for: Option<NaiveDate>,
    #[serde(default, with = "double_option")]
    pub priority: Option<Option<i32>>,
}

/// Distinguishes an absent field from an explicit `null`.
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(de).map(Some)
    }
}

/// The upload queue: owns the record lifecycle, the daily quota and the
/// overflow schedule.
pub struct Scheduler {
    store: Arc<dyn RecordStore>,
    providers: Providers,
    clock: Arc<dyn Clock>,
    config: ScheduleConfig,
    quota: QuotaCounter,
    pass_lock: tokio::sync::Mutex<()>,
    /// Publish outcomes the store refused to take; written back by the next pass.
    unsettled: std::sync::Mutex<Vec<UnsettledOutcome>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        providers: Providers,
        clock: Arc<dyn Clock>,
        config: ScheduleConfig,
    ) -> Self {
        let quota = QuotaCounter::new(config.max_uploads_per_day);
        Self {
            store,
            providers,
            clock,
            config,
            quota,
            pass_lock: tokio::sync::Mutex::new(()),
            unsettled: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    pub fn quota(&self) -> &QuotaCounter {
        &self.quota
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The current calendar date in the scheduling timezone.
    pub fn today(&self) -> NaiveDate {
        self.date_of(self.clock.now())
    }

    pub fn date_of(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.config.utc_offset).date_naive()
    }

    /// Prepare for the first pass after a (re)start: rebuild today's quota
    /// from the store and settle uploads a crash left half-done.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let today = self.today();
        let published = self
            .store
            .count_published_on(today, self.config.utc_offset)
            .await?;
        self.quota.sync(today, published);
        tracing::info!(
            "Quota rebuilt for {today}: {published}/{} used",
            self.config.max_uploads_per_day
        );

        self.recover_interrupted().await?;
        Ok(())
    }

    /// Records stuck in Uploading lost their publish call mid-flight. Treat
    /// that as a retriable failure.
    pub async fn recover_interrupted(&self) -> Result<usize, SchedulerError> {
        let stuck = self.store.list_by_status(RecordStatus::Uploading).await?;
        let mut recovered = 0;

        for record in stuck {
            // Its publish finished; the next pass writes the real outcome
            if self.is_unsettled(record.id) {
                continue;
            }

            let error = "Upload interrupted before completion".to_string();
            let patch = if record.attempts >= self.config.retry_ceiling {
                RecordUpdate::status(RecordStatus::Failed).with_last_error(Some(error))
            } else {
                RecordUpdate::status(RecordStatus::Scheduled).with_last_error(Some(error))
            };

            match self.store.update(record.id, record.version, patch).await {
                Ok(updated) => {
                    tracing::warn!(
                        "Recovered interrupted upload {} -> {}",
                        record.id,
                        updated.status
                    );
                    recovered += 1;
                }
                Err(StoreError::Conflict) => {
                    tracing::debug!("Record {} changed during recovery, leaving it", record.id);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(recovered)
    }

    /// Records `Scheduled`/`Uploading` for `day` plus those already published on it.
    pub(crate) async fn committed_on(&self, day: NaiveDate) -> Result<usize, StoreError> {
        let scheduled = self
            .store
            .list_scheduled_on(day)
            .await?
            .iter()
            .filter(|r| planner::occupies_schedule(r))
            .count();
        let published = self
            .store
            .count_published_on(day, self.config.utc_offset)
            .await?;
        Ok(scheduled + published)
    }

    /// Queue a stored asset. The record is scheduled for today straight away
    /// when today still has room, otherwise it waits for the next pass.
    pub async fn submit(
        &self,
        asset_ref: AssetRef,
        context: SubmissionContext,
    ) -> Result<Uuid, SchedulerError> {
        let record = self
            .store
            .create(NewRecord {
                asset_ref,
                context,
            })
            .await?;
        tracing::info!("Queued '{}' as {}", record.filename, record.id);

        let today = self.today();
        let committed = self.committed_on(today).await?;
        if committed < self.config.max_uploads_per_day as usize {
            let patch = RecordUpdate::status(RecordStatus::Scheduled).with_scheduled_for(Some(today));
            match self.store.update(record.id, record.version, patch).await {
                Ok(_) => tracing::info!("Record {} scheduled for today ({today})", record.id),
                // A pass picked it up already; it will take it from here
                Err(StoreError::Conflict) => {}
                Err(e) => return Err(e.into()),
            }
        } else {
            tracing::info!("Daily limit reached, record {} left for overflow", record.id);
        }

        Ok(record.id)
    }

    pub async fn get(&self, id: Uuid) -> Result<QueueRecord, SchedulerError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn status_summary(&self) -> Result<StatusSummary, SchedulerError> {
        let mut summary = StatusSummary {
            max_uploads_per_day: self.config.max_uploads_per_day,
            ..Default::default()
        };

        for status in RecordStatus::ALL {
            let count = self.store.list_by_status(status).await?.len();
            match status {
                RecordStatus::Pending => summary.pending = count,
                RecordStatus::Scheduled => summary.scheduled = count,
                RecordStatus::Uploading => summary.uploading = count,
                RecordStatus::Uploaded => summary.uploaded = count,
                RecordStatus::Failed => summary.failed = count,
            }
            summary.total += count;
        }

        summary.uploads_today = self
            .store
            .count_published_on(self.today(), self.config.utc_offset)
            .await?;
        summary.remaining_today =
            (self.config.max_uploads_per_day as usize).saturating_sub(summary.uploads_today);

        Ok(summary)
    }

    /// Everything whose scheduled date is today, whatever its status.
    pub async fn today_schedule(&self) -> Result<Vec<QueueRecord>, SchedulerError> {
        Ok(self.store.list_scheduled_on(self.today()).await?)
    }

    /// Manual requeue of a failed record: back to Pending with a clean slate.
    pub async fn requeue(&self, id: Uuid) -> Result<QueueRecord, SchedulerError> {
        let record = self.store.get(id).await?;
        if !record.status.can_transition_to(RecordStatus::Pending) {
            return Err(SchedulerError::InvalidTransition {
                from: record.status,
                to: RecordStatus::Pending,
            });
        }

        let patch = RecordUpdate::status(RecordStatus::Pending)
            .with_attempts(0)
            .with_scheduled_for(None)
            .with_last_error(None);
        let updated = self.store.update(id, record.version, patch).await?;
        tracing::info!("Record {id} requeued");
        Ok(updated)
    }

    pub async fn edit(&self, id: Uuid, edit: OperatorEdit) -> Result<QueueRecord, SchedulerError> {
        let record = self.store.get(id).await?;
        if !record.status.is_editable() {
            return Err(SchedulerError::InvalidEdit(format!(
                "record is {}, only pending or scheduled records can be edited",
                record.status
            )));
        }

        let mut patch = RecordUpdate::default();

        if let Some(metadata) = edit.metadata {
            if metadata.title.trim().is_empty() {
                return Err(SchedulerError::InvalidEdit("title must not be empty".into()));
            }
            patch.metadata = Some(metadata);
        }

        if let Some(date) = edit.scheduled_for {
            let today = self.today();
            if date < today {
                return Err(SchedulerError::InvalidEdit(format!(
                    "scheduled_for {date} is in the past (today is {today})"
                )));
            }
            patch.scheduled_for = Some(Some(date));
            if record.status == RecordStatus::Pending {
                patch.status = Some(RecordStatus::Scheduled);
            }
        }

        patch.priority = edit.priority;

        if patch.is_empty() {
            return Ok(record);
        }

        let updated = self.store.update(id, record.version, patch).await?;
        tracing::info!("Record {id} edited by operator");
        Ok(updated)
    }
}
