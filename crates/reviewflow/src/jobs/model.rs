use chrono::{DateTime, Utc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use uuid::Uuid;

use crate::jobs::payload::{self, ValidationError};
use crate::platform::JobKind;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    #[sqlx(rename = "job_type", try_from = "String")]
    pub kind: JobKind,
    pub store_id: Uuid,
    pub user_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    pub payload: Value,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub worker_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A job request whose payload has already passed validation for its kind.
#[derive(Debug, Clone)]
pub struct NewJob {
    kind: JobKind,
    store_id: Uuid,
    user_id: Uuid,
    payload: Value,
}

impl NewJob {
    pub fn new(
        kind: JobKind,
        store_id: Uuid,
        user_id: Uuid,
        payload: Value,
    ) -> Result<Self, ValidationError> {
        payload::validate(kind, &payload)?;
        Ok(Self {
            kind,
            store_id,
            user_id,
            payload,
        })
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn store_id(&self) -> Uuid {
        self.store_id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown job status: {0}")]
pub struct UnknownStatus(pub String);

impl TryFrom<String> for JobStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        JobStatus::parse(&value).ok_or(UnknownStatus(value))
    }
}
