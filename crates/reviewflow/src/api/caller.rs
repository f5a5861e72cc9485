//! Dashboard-facing routes under `/api/stores/:store_id`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use super::auth::CallerId;
use super::models::{CreateJobRequest, CreateJobResponse, Credentials, JobView, OkResponse};
use super::{ensure_owner, ApiState};
use crate::error::AppError;
use crate::jobs::NewJob;
use crate::platform::{JobKind, Operation, Platform};

pub async fn create_job(
    State(state): State<ApiState>,
    CallerId(user_id): CallerId,
    Path(store_id): Path<Uuid>,
    Json(body): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), AppError> {
    ensure_owner(&state, store_id, user_id).await?;

    let kind = JobKind::parse(body.job_type.trim())
        .ok_or_else(|| AppError::Validation(format!("Unknown job type: {}", body.job_type)))?;
    let payload = body.payload.unwrap_or_else(|| json!({}));

    let job = NewJob::new(kind, store_id, user_id, payload)?;
    let job_id = state.jobs.create(job).await?;

    Ok((StatusCode::ACCEPTED, Json(CreateJobResponse { job_id })))
}

/// Stores the owner's platform login (encrypted) and queues a link job that
/// will use it. Credentials never enter the job payload.
pub async fn request_link(
    State(state): State<ApiState>,
    CallerId(user_id): CallerId,
    Path((store_id, platform)): Path<(Uuid, String)>,
    Json(credentials): Json<Credentials>,
) -> Result<(StatusCode, Json<CreateJobResponse>), AppError> {
    let platform = Platform::parse(&platform)
        .ok_or_else(|| AppError::NotFound(format!("Unknown platform: {platform}")))?;

    if credentials.username.trim().is_empty() || credentials.password.is_empty() {
        return Err(AppError::Validation(
            "username and password are required".to_string(),
        ));
    }

    ensure_owner(&state, store_id, user_id).await?;

    state
        .sessions
        .store_credentials(store_id, platform, &credentials)
        .await?;

    let kind = JobKind::new(platform, Operation::Link);
    let job = NewJob::new(kind, store_id, user_id, Value::Object(Default::default()))?;
    let job_id = state.jobs.create(job).await?;

    Ok((StatusCode::ACCEPTED, Json(CreateJobResponse { job_id })))
}

pub async fn job_status(
    State(state): State<ApiState>,
    CallerId(user_id): CallerId,
    Path((store_id, job_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<JobView>, AppError> {
    ensure_owner(&state, store_id, user_id).await?;

    let job = state
        .jobs
        .get_for_owner(job_id, store_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Job not found".to_string()))?;

    Ok(Json(JobView::from(job)))
}

pub async fn cancel_job(
    State(state): State<ApiState>,
    CallerId(user_id): CallerId,
    Path((store_id, job_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<OkResponse>, AppError> {
    ensure_owner(&state, store_id, user_id).await?;

    let job = state
        .jobs
        .get_for_owner(job_id, store_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Job not found".to_string()))?;

    if job.status.is_terminal() {
        return Err(AppError::Conflict {
            message: "Job already finished".to_string(),
            status: Some(job.status.to_string()),
        });
    }

    if !state.jobs.cancel(job.id).await? {
        // Finished between our read and the update.
        let status = state
            .jobs
            .get_by_id(job.id)
            .await?
            .map(|j| j.status.to_string());
        return Err(AppError::Conflict {
            message: "Job already finished".to_string(),
            status,
        });
    }

    Ok(Json(OkResponse { ok: true }))
}
