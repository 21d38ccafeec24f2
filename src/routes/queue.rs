use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::auth::Operator;
use crate::error::AppError;
use crate::models::QueueRecord;
use crate::scheduler::{OperatorEdit, PassSummary, StatusSummary};
use crate::state::SharedState;

pub async fn status(
    State(state): State<SharedState>,
    _operator: Operator,
) -> Result<Json<StatusSummary>, AppError> {
    Ok(Json(state.scheduler.status_summary().await?))
}

pub async fn today(
    State(state): State<SharedState>,
    _operator: Operator,
) -> Result<Json<Vec<QueueRecord>>, AppError> {
    Ok(Json(state.scheduler.today_schedule().await?))
}

/// Run a pass now. Waits for any pass already in progress.
pub async fn run_pass(
    State(state): State<SharedState>,
    _operator: Operator,
) -> Result<Json<PassSummary>, AppError> {
    Ok(Json(state.handle.trigger_manual_pass().await?))
}

pub async fn get_record(
    State(state): State<SharedState>,
    _operator: Operator,
    Path(id): Path<Uuid>,
) -> Result<Json<QueueRecord>, AppError> {
    Ok(Json(state.scheduler.get(id).await?))
}

pub async fn edit_record(
    State(state): State<SharedState>,
    _operator: Operator,
    Path(id): Path<Uuid>,
    Json(edit): Json<OperatorEdit>,
) -> Result<Json<QueueRecord>, AppError> {
    Ok(Json(state.scheduler.edit(id, edit).await?))
}

pub async fn requeue(
    State(state): State<SharedState>,
    _operator: Operator,
    Path(id): Path<Uuid>,
) -> Result<Json<QueueRecord>, AppError> {
    Ok(Json(state.scheduler.requeue(id).await?))
}
