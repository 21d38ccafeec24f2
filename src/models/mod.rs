pub mod queue_record;

pub use queue_record::{
    AssetRef, NewRecord, QueueRecord, RecordStatus, RecordUpdate, SubmissionContext,
    VideoMetadata,
};
