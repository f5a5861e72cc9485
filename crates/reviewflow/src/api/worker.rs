//! Worker-facing routes under `/api/worker`. All sit behind
//! [`super::auth::require_worker_secret`].

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use super::models::{ClaimQuery, ClaimedJob, OkResponse, ResultSubmission, SessionRecord, WorkerJobStatus};
use super::ApiState;
use crate::error::AppError;
use crate::jobs::JobStatus;

pub const DEFAULT_WORKER_ID: &str = "local-1";

pub async fn claim_job(
    State(state): State<ApiState>,
    Query(q): Query<ClaimQuery>,
) -> Result<Response, AppError> {
    let worker_id = q
        .worker_id
        .filter(|w| !w.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_WORKER_ID.to_string());

    match state.jobs.claim_next(&worker_id).await? {
        Some(job) => Ok(Json(ClaimedJob::from(job)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub async fn job_status(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkerJobStatus>, AppError> {
    let job = state
        .jobs
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Job not found".to_string()))?;

    Ok(Json(WorkerJobStatus {
        id: job.id,
        job_type: job.kind.to_string(),
        status: job.status,
    }))
}

/// Session artifacts for the job's (store, platform). Only answered while the
/// job is `processing`, i.e. owned by a worker.
pub async fn job_session(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionRecord>, AppError> {
    let job = state
        .jobs
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Job not found".to_string()))?;

    if job.status != JobStatus::Processing {
        return Err(AppError::Conflict {
            message: "Job is not in processing state".to_string(),
            status: Some(job.status.to_string()),
        });
    }

    let record = state
        .sessions
        .get(job.store_id, job.kind.platform)
        .await?
        .ok_or_else(|| AppError::NotFound("No session record for this store and platform".to_string()))?;

    Ok(Json(record))
}

pub async fn submit_result(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(submission): Json<ResultSubmission>,
) -> Result<Json<OkResponse>, AppError> {
    state.reconciler.submit(id, submission).await?;
    Ok(Json(OkResponse { ok: true }))
}
