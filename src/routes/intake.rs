use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::{json, Value};

use crate::auth::Operator;
use crate::error::AppError;
use crate::models::SubmissionContext;
use crate::state::SharedState;

/// A video upload as read from a multipart form.
#[derive(Debug)]
pub struct VideoUpload {
    pub filename: String,
    pub data: Bytes,
    pub caption: Option<String>,
    pub priority: Option<i32>,
}

/// Accept a video and queue it.
///
/// Multipart fields: `file` (required), `caption`, `priority`.
pub async fn submit_video(
    State(state): State<SharedState>,
    _operator: Operator,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let upload = parse_upload(&headers, body).await?;

    let asset_ref = state
        .scheduler
        .providers()
        .assets
        .put(&upload.filename, upload.data)
        .await?;

    let context = SubmissionContext {
        filename: upload.filename,
        caption: upload.caption,
        priority: upload.priority,
    };
    let record_id = state.scheduler.submit(asset_ref, context).await?;
    let record = state.scheduler.get(record_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "created",
            "record_id": record_id,
            "record_status": record.status,
            "scheduled_for": record.scheduled_for,
        })),
    ))
}

pub async fn parse_upload(headers: &HeaderMap, body: Bytes) -> Result<VideoUpload, AppError> {
    let boundary = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| multer::parse_boundary(ct).ok())
        .ok_or_else(|| AppError::BadRequest("Expected multipart/form-data".to_string()))?;

    let stream = futures_util::stream::once(async { Ok::<_, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut file: Option<(String, Bytes)> = None;
    let mut caption = None;
    let mut priority = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Multipart error: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let is_video = field
                    .content_type()
                    .is_some_and(|mime| mime.type_().as_str() == "video");
                if !is_video {
                    let got = field
                        .content_type()
                        .map(|mime| mime.essence_str().to_string())
                        .unwrap_or_else(|| "no content type".to_string());
                    return Err(AppError::BadRequest(format!(
                        "Only video files are accepted, got {got}"
                    )));
                }
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| "video.mp4".to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("File read error: {e}")))?;
                file = Some((filename, data));
            }
            "caption" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Field read error: {e}")))?;
                caption = Some(text.trim().to_string()).filter(|c| !c.is_empty());
            }
            "priority" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Field read error: {e}")))?;
                let text = text.trim();
                if !text.is_empty() {
                    priority = Some(text.parse::<i32>().map_err(|_| {
                        AppError::BadRequest(format!("priority must be an integer, got '{text}'"))
                    })?);
                }
            }
            _ => {}
        }
    }

    let (filename, data) =
        file.ok_or_else(|| AppError::BadRequest("Missing 'file' field".to_string()))?;
    if data.is_empty() {
        return Err(AppError::BadRequest("Uploaded file is empty".to_string()));
    }

    Ok(VideoUpload {
        filename,
        data,
        caption,
        priority,
    })
}
