pub mod filename;
pub mod groq;
pub mod local;
pub mod youtube;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{AssetRef, SubmissionContext, VideoMetadata};

/// Failure of a call to an outside service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalError {
    /// Network trouble, rate limits, quota exhaustion. Worth retrying.
    Transient(String),
    /// Invalid asset, rejected content, bad credentials. Retrying won't help.
    Permanent(String),
}

impl ExternalError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, ExternalError::Transient(_))
    }

    /// Classify an HTTP status from an upstream API.
    pub fn from_status(status: u16, body: &str) -> Self {
        let msg = format!("HTTP {status}: {body}");
        match status {
            408 | 429 | 500..=599 => ExternalError::Transient(msg),
            // YouTube signals daily quota exhaustion with 403 + quotaExceeded
            403 if body.contains("quotaExceeded") || body.contains("rateLimitExceeded") => {
                ExternalError::Transient(msg)
            }
            _ => ExternalError::Permanent(msg),
        }
    }

    /// Classify a transport-level failure.
    pub fn from_reqwest(context: &str, err: reqwest::Error) -> Self {
        if err.is_builder() {
            ExternalError::Permanent(format!("{context}: {err}"))
        } else {
            ExternalError::Transient(format!("{context}: {err}"))
        }
    }
}

impl std::fmt::Display for ExternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExternalError::Transient(msg) => write!(f, "transient: {msg}"),
            ExternalError::Permanent(msg) => write!(f, "permanent: {msg}"),
        }
    }
}

impl std::error::Error for ExternalError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishConfirmation {
    pub video_id: String,
    pub url: String,
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        asset: &AssetRef,
        context: &SubmissionContext,
    ) -> Result<VideoMetadata, ExternalError>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(
        &self,
        asset: &AssetRef,
        metadata: &VideoMetadata,
        target_time: DateTime<Utc>,
    ) -> Result<PublishConfirmation, ExternalError>;
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn put(&self, filename: &str, data: Bytes) -> Result<AssetRef, ExternalError>;

    async fn fetch(&self, asset: &AssetRef) -> Result<Bytes, ExternalError>;
}

/// The external collaborators a scheduler talks to.
#[derive(Clone)]
pub struct Providers {
    pub metadata: Arc<dyn MetadataProvider>,
    pub publisher: Arc<dyn Publisher>,
    pub assets: Arc<dyn AssetStore>,
}
