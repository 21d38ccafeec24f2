use async_trait::async_trait;

use super::{ExternalError, MetadataProvider};
use crate::models::{AssetRef, SubmissionContext, VideoMetadata};

/// Derives plain metadata from the filename alone.
///
/// Used when no AI provider is configured, and as the fallback when the AI
/// answer cannot be parsed.
pub struct FilenameMetadata;

#[async_trait]
impl MetadataProvider for FilenameMetadata {
    fn name(&self) -> &str {
        "filename"
    }

    async fn generate(
        &self,
        _asset: &AssetRef,
        context: &SubmissionContext,
    ) -> Result<VideoMetadata, ExternalError> {
        Ok(from_filename(&context.filename, context.caption.as_deref()))
    }
}

/// `my_cool_clip.mp4` becomes "My Cool Clip".
pub fn title_from_filename(filename: &str) -> String {
    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename);

    stem.split(['_', '-', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn from_filename(filename: &str, caption: Option<&str>) -> VideoMetadata {
    let mut title = title_from_filename(filename);
    if title.is_empty() {
        title = "Untitled video".to_string();
    }

    let description = match caption.map(str::trim).filter(|c| !c.is_empty()) {
        Some(caption) => caption.to_string(),
        None => format!("Video: {filename}"),
    };

    VideoMetadata {
        title,
        description,
        tags: vec!["video".to_string()],
    }
}
