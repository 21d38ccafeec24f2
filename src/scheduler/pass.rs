use std::future::Future;
use std::sync::MutexGuard;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use super::planner::{self, CapacityLedger, Scan};
use super::{Scheduler, SchedulerError};
use crate::db::StoreError;
use crate::models::{QueueRecord, RecordStatus, RecordUpdate, VideoMetadata};
use crate::providers::ExternalError;

/// How often a record is re-read and retried within one pass after losing an
/// update race.
const CONFLICT_RETRIES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassTrigger {
    Tick,
    Manual,
}

impl std::fmt::Display for PassTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassTrigger::Tick => f.write_str("tick"),
            PassTrigger::Manual => f.write_str("manual"),
        }
    }
}

/// One committed status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub id: Uuid,
    pub from: RecordStatus,
    pub to: RecordStatus,
    pub scheduled_for: Option<NaiveDate>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassSummary {
    pub trigger: PassTrigger,
    pub date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub candidates: usize,
    pub transitions: Vec<Transition>,
    /// Records left untouched this pass (lost update races, no day with room).
    pub skipped: Vec<Uuid>,
    pub remaining_today: u32,
    pub cancelled: bool,
}

impl PassSummary {
    /// Ids that ended up in `status` during the pass, in order.
    pub fn moved_to(&self, status: RecordStatus) -> Vec<Uuid> {
        self.transitions
            .iter()
            .filter(|t| t.to == status)
            .map(|t| t.id)
            .collect()
    }

    pub fn uploaded(&self) -> Vec<Uuid> {
        self.moved_to(RecordStatus::Uploaded)
    }
}

enum Outcome {
    Published,
    RetryLater,
    Failed,
    /// Needs a later day.
    Overflow(QueueRecord),
    Skipped(Uuid),
}

/// A publish that went through while the store refused its outcome. The
/// record stays `Uploading` until a later pass writes `to` + `patch`.
#[derive(Debug, Clone)]
pub(crate) struct UnsettledOutcome {
    id: Uuid,
    to: RecordStatus,
    patch: RecordUpdate,
    detail: Option<String>,
}

fn is_cancelled(shutdown: Option<&watch::Receiver<bool>>) -> bool {
    shutdown.is_some_and(|rx| *rx.borrow())
}

impl Scheduler {
    /// Run one scheduling pass.
    ///
    /// Passes never overlap. When `shutdown` flips to true the pass stops
    /// between records; every record keeps its last committed state.
    pub async fn run_pass(
        &self,
        trigger: PassTrigger,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<PassSummary, SchedulerError> {
        let _pass = self.pass_lock.lock().await;

        let started_at = self.clock.now();
        let today = self.date_of(started_at);

        // Before the quota sync so finished publishes are counted
        let settled = self.flush_unsettled().await?;

        let published = self
            .store
            .count_published_on(today, self.config.utc_offset)
            .await?;
        self.quota.sync(today, published);

        let mut records = self.store.list_by_status(RecordStatus::Pending).await?;
        records.extend(self.store.list_by_status(RecordStatus::Scheduled).await?);
        let candidates = planner::order_candidates(records, today);

        let mut summary = PassSummary {
            trigger,
            date: today,
            started_at,
            candidates: candidates.len(),
            transitions: settled,
            skipped: Vec::new(),
            remaining_today: 0,
            cancelled: false,
        };

        if candidates.is_empty() {
            summary.remaining_today = self.quota.remaining(today);
            tracing::debug!("Pass ({trigger}) on {today}: nothing due");
            return Ok(summary);
        }

        tracing::info!(
            "Pass ({trigger}) on {today}: {} due, {} slots left",
            candidates.len(),
            self.quota.remaining(today)
        );

        let mut overflow = Vec::new();
        for record in candidates {
            if is_cancelled(shutdown) {
                tracing::info!("Pass cancelled, stopping before record {}", record.id);
                summary.cancelled = true;
                break;
            }

            match self.handle_candidate(record, today, &mut summary).await? {
                Outcome::Overflow(record) => overflow.push(record),
                Outcome::Skipped(id) => summary.skipped.push(id),
                Outcome::Published | Outcome::RetryLater | Outcome::Failed => {}
            }
        }

        if !summary.cancelled {
            self.roll_over(overflow, today, &mut summary).await?;
        }

        summary.remaining_today = self.quota.remaining(today);
        tracing::info!(
            "Pass ({trigger}) done: {} uploaded, {} transitions, {} slots left",
            summary.uploaded().len(),
            summary.transitions.len(),
            summary.remaining_today
        );

        Ok(summary)
    }

    async fn handle_candidate(
        &self,
        record: QueueRecord,
        today: NaiveDate,
        summary: &mut PassSummary,
    ) -> Result<Outcome, StoreError> {
        let id = record.id;
        let mut record = record;

        for _ in 0..CONFLICT_RETRIES {
            match self.advance(record, today, summary).await {
                Err(StoreError::Conflict) => {
                    tracing::debug!("Record {id} changed under us, re-reading");
                    record = match self.store.get(id).await {
                        Ok(fresh) => fresh,
                        Err(StoreError::NotFound) => return Ok(Outcome::Skipped(id)),
                        Err(e) => return Err(e),
                    };
                    if !planner::is_due(&record, today) {
                        return Ok(Outcome::Skipped(id));
                    }
                }
                other => return other,
            }
        }

        tracing::warn!("Record {id} kept conflicting, leaving it for the next pass");
        Ok(Outcome::Skipped(id))
    }

    /// Drive one due record as far as quota and collaborators allow.
    async fn advance(
        &self,
        record: QueueRecord,
        today: NaiveDate,
        summary: &mut PassSummary,
    ) -> Result<Outcome, StoreError> {
        let Some(slot) = self.quota.try_reserve(today) else {
            return Ok(Outcome::Overflow(record));
        };

        let mut record = record;
        if record.status == RecordStatus::Pending {
            let patch = RecordUpdate::default().with_scheduled_for(Some(today));
            record = self
                .transition(&record, RecordStatus::Scheduled, patch, summary, None)
                .await?;
        }

        let metadata = match record.metadata.clone() {
            Some(metadata) => metadata,
            None => match self.resolve_metadata(&record).await {
                Ok(metadata) => {
                    let patch = RecordUpdate {
                        metadata: Some(metadata.clone()),
                        ..Default::default()
                    };
                    record = self.store.update(record.id, record.version, patch).await?;
                    metadata
                }
                Err(e) => {
                    drop(slot);
                    return self.metadata_failed(record, e, summary).await;
                }
            },
        };

        let attempts = record.attempts + 1;
        let patch = RecordUpdate::default().with_attempts(attempts);
        record = self
            .transition(&record, RecordStatus::Uploading, patch, summary, None)
            .await?;

        let target_time = self.clock.now();
        let result = self
            .call_external(
                self.config.publish_timeout,
                self.providers
                    .publisher
                    .publish(&record.asset_ref, &metadata, target_time),
            )
            .await;

        match result {
            Ok(confirmation) => {
                slot.commit();
                let patch = RecordUpdate {
                    published_at: Some(self.clock.now()),
                    publish_ref: Some(confirmation.url.clone()),
                    last_error: Some(None),
                    ..Default::default()
                };
                tracing::info!("Record {} published: {}", record.id, confirmation.url);
                self.settle(record, RecordStatus::Uploaded, patch, summary, Some(confirmation.url))
                    .await?;
                Ok(Outcome::Published)
            }
            Err(e) => {
                drop(slot);
                let retry = e.is_retriable() && attempts < self.config.retry_ceiling;
                let to = if retry {
                    RecordStatus::Scheduled
                } else {
                    RecordStatus::Failed
                };
                tracing::warn!(
                    "Publish of {} failed (attempt {attempts}/{}): {e}",
                    record.id,
                    self.config.retry_ceiling
                );
                let patch = RecordUpdate::default().with_last_error(Some(e.to_string()));
                self.settle(record, to, patch, summary, Some(e.to_string()))
                    .await?;
                Ok(if retry {
                    Outcome::RetryLater
                } else {
                    Outcome::Failed
                })
            }
        }
    }

    async fn resolve_metadata(&self, record: &QueueRecord) -> Result<VideoMetadata, ExternalError> {
        let context = record.context();
        self.call_external(
            self.config.metadata_timeout,
            self.providers
                .metadata
                .generate(&record.asset_ref, &context),
        )
        .await
    }

    /// Metadata failures share the attempts counter with publish failures.
    async fn metadata_failed(
        &self,
        record: QueueRecord,
        error: ExternalError,
        summary: &mut PassSummary,
    ) -> Result<Outcome, StoreError> {
        let attempts = record.attempts + 1;
        let message = format!("metadata: {error}");
        tracing::warn!(
            "Metadata for {} failed (attempt {attempts}/{}): {error}",
            record.id,
            self.config.retry_ceiling
        );

        let patch = RecordUpdate::default()
            .with_attempts(attempts)
            .with_last_error(Some(message.clone()));

        if attempts >= self.config.retry_ceiling {
            self.transition(&record, RecordStatus::Failed, patch, summary, Some(message))
                .await?;
            return Ok(Outcome::Failed);
        }

        let record = self.store.update(record.id, record.version, patch).await?;
        Ok(Outcome::Overflow(record))
    }

    async fn call_external<T, F>(&self, limit: Duration, call: F) -> Result<T, ExternalError>
    where
        F: Future<Output = Result<T, ExternalError>>,
    {
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(ExternalError::Transient(format!(
                "timed out after {}s",
                limit.as_secs()
            ))),
        }
    }

    async fn transition(
        &self,
        record: &QueueRecord,
        to: RecordStatus,
        mut patch: RecordUpdate,
        summary: &mut PassSummary,
        detail: Option<String>,
    ) -> Result<QueueRecord, StoreError> {
        debug_assert!(
            record.status.can_transition_to(to),
            "illegal transition {} -> {to}",
            record.status
        );
        patch.status = Some(to);
        let updated = self.store.update(record.id, record.version, patch).await?;
        summary.transitions.push(Transition {
            id: record.id,
            from: record.status,
            to,
            scheduled_for: updated.scheduled_for,
            detail,
        });
        Ok(updated)
    }

    /// Commit the outcome of a publish call. The call already happened, so a
    /// lost race is retried against the fresh version instead of redoing it.
    /// An outcome the store will not take is parked for the next pass.
    async fn settle(
        &self,
        record: QueueRecord,
        to: RecordStatus,
        patch: RecordUpdate,
        summary: &mut PassSummary,
        detail: Option<String>,
    ) -> Result<(), StoreError> {
        let mut record = record;
        for _ in 0..CONFLICT_RETRIES {
            match self
                .transition(&record, to, patch.clone(), summary, detail.clone())
                .await
            {
                Ok(_) => return Ok(()),
                Err(StoreError::Conflict) => {
                    record = match self.store.get(record.id).await {
                        Ok(fresh) => fresh,
                        Err(e) => {
                            self.park(UnsettledOutcome {
                                id: record.id,
                                to,
                                patch,
                                detail,
                            });
                            return Err(e);
                        }
                    };
                    if record.status != RecordStatus::Uploading {
                        tracing::error!(
                            "Record {} left Uploading while its publish was in flight (now {})",
                            record.id,
                            record.status
                        );
                        return Ok(());
                    }
                }
                Err(e) => {
                    self.park(UnsettledOutcome {
                        id: record.id,
                        to,
                        patch,
                        detail,
                    });
                    return Err(e);
                }
            }
        }
        tracing::warn!(
            "Could not record publish outcome for {}, retrying next pass",
            record.id
        );
        self.park(UnsettledOutcome {
            id: record.id,
            to,
            patch,
            detail,
        });
        Ok(())
    }

    fn lock_unsettled(&self) -> MutexGuard<'_, Vec<UnsettledOutcome>> {
        self.unsettled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn park(&self, outcome: UnsettledOutcome) {
        tracing::error!(
            "Outcome {} for record {} not stored, holding it for the next pass",
            outcome.to,
            outcome.id
        );
        self.lock_unsettled().push(outcome);
    }

    /// Whether a finished publish for `id` is still waiting to be stored.
    pub(crate) fn is_unsettled(&self, id: Uuid) -> bool {
        self.lock_unsettled().iter().any(|outcome| outcome.id == id)
    }

    /// Write back parked publish outcomes. Whatever is not written stays
    /// parked.
    async fn flush_unsettled(&self) -> Result<Vec<Transition>, StoreError> {
        let parked = std::mem::take(&mut *self.lock_unsettled());
        let mut written = Vec::new();

        let mut queue = parked.into_iter();
        while let Some(outcome) = queue.next() {
            match self.write_outcome(&outcome).await {
                Ok(Some(transition)) => written.push(transition),
                Ok(None) => {}
                Err(e) => {
                    let mut parked = self.lock_unsettled();
                    parked.push(outcome);
                    parked.extend(queue);
                    return Err(e);
                }
            }
        }
        Ok(written)
    }

    async fn write_outcome(
        &self,
        outcome: &UnsettledOutcome,
    ) -> Result<Option<Transition>, StoreError> {
        for _ in 0..CONFLICT_RETRIES {
            let record = match self.store.get(outcome.id).await {
                Ok(record) => record,
                Err(StoreError::NotFound) => {
                    tracing::warn!("Record {} vanished before its outcome was stored", outcome.id);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };
            if record.status != RecordStatus::Uploading {
                tracing::error!(
                    "Record {} left Uploading before its outcome was stored (now {})",
                    record.id,
                    record.status
                );
                return Ok(None);
            }

            let mut patch = outcome.patch.clone();
            patch.status = Some(outcome.to);
            match self.store.update(record.id, record.version, patch).await {
                Ok(updated) => {
                    tracing::info!("Stored held outcome {} for record {}", outcome.to, record.id);
                    return Ok(Some(Transition {
                        id: record.id,
                        from: RecordStatus::Uploading,
                        to: outcome.to,
                        scheduled_for: updated.scheduled_for,
                        detail: outcome.detail.clone(),
                    }));
                }
                Err(StoreError::Conflict) => continue,
                Err(e) => return Err(e),
            }
        }

        self.lock_unsettled().push(outcome.clone());
        Ok(None)
    }

    /// Give every leftover the earliest later day that still has room.
    async fn roll_over(
        &self,
        overflow: Vec<QueueRecord>,
        today: NaiveDate,
        summary: &mut PassSummary,
    ) -> Result<(), StoreError> {
        if overflow.is_empty() {
            return Ok(());
        }

        let mut ledger = CapacityLedger::new(self.config.max_uploads_per_day);
        for record in overflow {
            let Some(day) = self.next_date_with_capacity(&mut ledger, today).await? else {
                tracing::warn!("No day with spare capacity, holding record {}", record.id);
                summary.skipped.push(record.id);
                continue;
            };

            if self.reschedule(record, day, today, summary).await? {
                ledger.claim(day);
            }
        }
        Ok(())
    }

    async fn next_date_with_capacity(
        &self,
        ledger: &mut CapacityLedger,
        today: NaiveDate,
    ) -> Result<Option<NaiveDate>, StoreError> {
        loop {
            match ledger.scan_from(today) {
                Scan::Found(day) => return Ok(Some(day)),
                Scan::NeedsLoad(day) => {
                    let committed = self.committed_on(day).await?;
                    ledger.load(day, committed);
                }
                Scan::Exhausted => return Ok(None),
            }
        }
    }

    async fn reschedule(
        &self,
        record: QueueRecord,
        day: NaiveDate,
        today: NaiveDate,
        summary: &mut PassSummary,
    ) -> Result<bool, StoreError> {
        let id = record.id;
        let mut record = record;

        for _ in 0..CONFLICT_RETRIES {
            let patch = RecordUpdate::default().with_scheduled_for(Some(day));
            let detail = Some(format!("overflow to {day}"));
            match self
                .transition(&record, RecordStatus::Scheduled, patch, summary, detail)
                .await
            {
                Ok(_) => {
                    tracing::info!("Record {id} rolled over to {day}");
                    return Ok(true);
                }
                Err(StoreError::Conflict) => {
                    record = self.store.get(id).await?;
                    if !planner::is_due(&record, today) {
                        return Ok(false);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        summary.skipped.push(id);
        Ok(false)
    }
}
