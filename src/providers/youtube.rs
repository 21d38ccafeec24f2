use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;

use super::{AssetStore, ExternalError, PublishConfirmation, Publisher};
use crate::config::YoutubeConfig;
use crate::models::{AssetRef, VideoMetadata};

const UPLOAD_URL: &str =
    "https://www.googleapis.com/upload/youtube/v3/videos?uploadType=resumable&part=snippet,status";

/// HTTP timeout of a whole upload; the scheduler's publish ceiling sits above it.
pub(crate) const CLIENT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const MAX_TITLE_CHARS: usize = 100;
const MAX_DESCRIPTION_CHARS: usize = 5000;

/// Publishes through the YouTube Data API v3 resumable upload protocol.
///
/// Takes a ready OAuth2 access token from configuration.
pub struct YoutubePublisher {
    client: reqwest::Client,
    config: YoutubeConfig,
    assets: Arc<dyn AssetStore>,
    upload_url: String,
}

impl YoutubePublisher {
    pub fn new(config: YoutubeConfig, assets: Arc<dyn AssetStore>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()
            .map_err(|e| format!("Failed to build reqwest client: {e}"))?;
        Ok(Self {
            client,
            config,
            assets,
            upload_url: UPLOAD_URL.to_string(),
        })
    }

    /// Point the publisher at a different upload endpoint.
    pub fn with_upload_url(mut self, url: impl Into<String>) -> Self {
        self.upload_url = url.into();
        self
    }

    fn video_resource(
        &self,
        metadata: &VideoMetadata,
        target_time: DateTime<Utc>,
    ) -> serde_json::Value {
        let title: String = metadata.title.chars().take(MAX_TITLE_CHARS).collect();
        let description: String = metadata
            .description
            .chars()
            .take(MAX_DESCRIPTION_CHARS)
            .collect();

        let mut status = json!({
            "privacyStatus": self.config.privacy,
            "selfDeclaredMadeForKids": false,
        });

        // Future targets are uploaded private and released by the platform
        if target_time > Utc::now() + chrono::Duration::minutes(1) {
            status["privacyStatus"] = json!("private");
            status["publishAt"] = json!(target_time.to_rfc3339_opts(SecondsFormat::Secs, true));
        }

        json!({
            "snippet": {
                "title": title,
                "description": description,
                "tags": metadata.tags,
                "categoryId": self.config.category,
            },
            "status": status,
        })
    }
}

#[async_trait]
impl Publisher for YoutubePublisher {
    fn name(&self) -> &str {
        "youtube"
    }

    async fn publish(
        &self,
        asset: &AssetRef,
        metadata: &VideoMetadata,
        target_time: DateTime<Utc>,
    ) -> Result<PublishConfirmation, ExternalError> {
        let data = self.assets.fetch(asset).await?;

        tracing::info!("Uploading to YouTube: '{}' ({} bytes)", metadata.title, data.len());

        // Step 1: open a resumable session
        let init = self
            .client
            .post(&self.upload_url)
            .bearer_auth(&self.config.access_token)
            .header("X-Upload-Content-Type", "video/*")
            .header("X-Upload-Content-Length", data.len().to_string())
            .json(&self.video_resource(metadata, target_time))
            .send()
            .await
            .map_err(|e| ExternalError::from_reqwest("Upload session request failed", e))?;

        if !init.status().is_success() {
            let status = init.status().as_u16();
            let body = init.text().await.unwrap_or_default();
            return Err(ExternalError::from_status(status, &truncate(&body)));
        }

        let session_url = init
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                ExternalError::Transient("Upload session response had no Location header".into())
            })?;

        // Step 2: send the bytes
        let resp = self
            .client
            .put(&session_url)
            .bearer_auth(&self.config.access_token)
            .header("Content-Type", "video/*")
            .body(data)
            .send()
            .await
            .map_err(|e| ExternalError::from_reqwest("Video upload failed", e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ExternalError::from_status(status, &truncate(&body)));
        }

        // The video is accepted at this point; retrying would upload it twice
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ExternalError::Permanent(format!("Invalid upload response: {e}")))?;

        let confirmation = confirmation_from(&body)?;
        tracing::info!("Upload complete: {}", confirmation.url);
        Ok(confirmation)
    }
}

fn confirmation_from(body: &serde_json::Value) -> Result<PublishConfirmation, ExternalError> {
    let video_id = body["id"]
        .as_str()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ExternalError::Permanent("Upload response had no video id".into()))?
        .to_string();

    let url = format!("https://youtu.be/{video_id}");
    Ok(PublishConfirmation { video_id, url })
}

fn truncate(body: &str) -> String {
    body.chars().take(1024).collect()
}
