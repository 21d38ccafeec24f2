use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque reference into the asset store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRef(pub String);

impl AssetRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AssetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Scheduled,
    Uploading,
    Uploaded,
    Failed,
}

impl RecordStatus {
    pub const ALL: [RecordStatus; 5] = [
        RecordStatus::Pending,
        RecordStatus::Scheduled,
        RecordStatus::Uploading,
        RecordStatus::Uploaded,
        RecordStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Scheduled => "scheduled",
            RecordStatus::Uploading => "uploading",
            RecordStatus::Uploaded => "uploaded",
            RecordStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(RecordStatus::Pending),
            "scheduled" => Some(RecordStatus::Scheduled),
            "uploading" => Some(RecordStatus::Uploading),
            "uploaded" => Some(RecordStatus::Uploaded),
            "failed" => Some(RecordStatus::Failed),
            _ => None,
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// `Failed -> Pending` is the manual requeue; nothing else re-enters
    /// `Pending`.
    pub fn can_transition_to(self, next: RecordStatus) -> bool {
        use RecordStatus::*;
        matches!(
            (self, next),
            (Pending, Scheduled)
                | (Scheduled, Scheduled)
                | (Scheduled, Uploading)
                | (Uploading, Uploaded)
                | (Uploading, Failed)
                | (Uploading, Scheduled)
                | (Pending, Failed)
                | (Scheduled, Failed)
                | (Failed, Pending)
        )
    }

    /// Operators may edit metadata and schedule only before publishing starts.
    pub fn is_editable(self) -> bool {
        matches!(self, RecordStatus::Pending | RecordStatus::Scheduled)
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// What the intake channel knows about a video besides its bytes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionContext {
    pub filename: String,
    pub caption: Option<String>,
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRecord {
    pub id: Uuid,
    pub seq: i64,
    pub asset_ref: AssetRef,
    pub filename: String,
    pub caption: Option<String>,
    pub status: RecordStatus,
    pub priority: Option<i32>,
    pub metadata: Option<VideoMetadata>,
    pub scheduled_for: Option<NaiveDate>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub publish_ref: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueRecord {
    pub fn context(&self) -> SubmissionContext {
        SubmissionContext {
            filename: self.filename.clone(),
            caption: self.caption.clone(),
            priority: self.priority,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewRecord {
    pub asset_ref: AssetRef,
    pub context: SubmissionContext,
}

/// A field patch applied atomically by `RecordStore::update`.
///
/// `None` leaves a field untouched. Nested options clear the field when set to
/// `Some(None)`.
#[derive(Debug, Clone, Default)]
pub struct RecordUpdate {
    pub status: Option<RecordStatus>,
    pub metadata: Option<VideoMetadata>,
    pub scheduled_for: Option<Option<NaiveDate>>,
    pub priority: Option<Option<i32>>,
    pub attempts: Option<i32>,
    pub last_error: Option<Option<String>>,
    pub published_at: Option<DateTime<Utc>>,
    pub publish_ref: Option<String>,
}

impl RecordUpdate {
    pub fn status(status: RecordStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_scheduled_for(mut self, date: Option<NaiveDate>) -> Self {
        self.scheduled_for = Some(date);
        self
    }

    pub fn with_attempts(mut self, attempts: i32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_last_error(mut self, error: Option<String>) -> Self {
        self.last_error = Some(error);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.metadata.is_none()
            && self.scheduled_for.is_none()
            && self.priority.is_none()
            && self.attempts.is_none()
            && self.last_error.is_none()
            && self.published_at.is_none()
            && self.publish_ref.is_none()
    }

    /// Apply the patch in place, bumping the version.
    pub fn apply_to(&self, record: &mut QueueRecord, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(ref metadata) = self.metadata {
            record.metadata = Some(metadata.clone());
        }
        if let Some(scheduled_for) = self.scheduled_for {
            record.scheduled_for = scheduled_for;
        }
        if let Some(priority) = self.priority {
            record.priority = priority;
        }
        if let Some(attempts) = self.attempts {
            record.attempts = attempts;
        }
        if let Some(ref last_error) = self.last_error {
            record.last_error = last_error.clone();
        }
        if let Some(published_at) = self.published_at {
            // published_at is write-once
            if record.published_at.is_none() {
                record.published_at = Some(published_at);
            }
        }
        if let Some(ref publish_ref) = self.publish_ref {
            record.publish_ref = Some(publish_ref.clone());
        }
        record.version += 1;
        record.updated_at = now;
    }
}
