use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::jobs::{Job, JobStatus};

pub use crate::reconcile::ResultSubmission;
pub use crate::sessions::{Credentials, SessionRecord};

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateJobResponse {
    #[serde(rename = "jobId")]
    pub job_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// Caller-facing status view.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobView {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            job_type: job.kind.to_string(),
            status: job.status,
            result: job.result,
            error_message: job.error_message,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ClaimQuery {
    #[serde(rename = "workerId")]
    pub worker_id: Option<String>,
}

/// What a worker receives from a successful claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedJob {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: String,
    pub store_id: Uuid,
    pub user_id: Uuid,
    pub payload: Value,
}

impl From<Job> for ClaimedJob {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            job_type: job.kind.to_string(),
            store_id: job.store_id,
            user_id: job.user_id,
            payload: job.payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerJobStatus {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
}
