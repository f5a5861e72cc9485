//! Applies worker results to canonical storage.
//!
//! Every successful submission is applied in one transaction together with
//! the job's `processing -> completed` transition, so either both land or
//! neither does.

pub mod fields;
pub mod normalize;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::AppError;
use crate::jobs::payload::SECRET_KEYS;
use crate::jobs::{Job, JobStatus, JobsRepo, ReplyTarget};
use crate::platform::{Operation, Platform};
use crate::reviews::{ReviewKey, ReviewsRepo};
use crate::sessions::{SessionUpdate, SessionsRepo};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("link result carries no session artifacts (expected `session`, `cookies` or `token`)")]
    MissingSession,

    #[error("sync result carries no review list")]
    MissingReviewList,

    #[error("register_reply needs a review_id or external_id and non-empty content")]
    IncompleteReply,

    #[error("no review matched the reply target (review_id={review_id:?}, external_id={external_id:?})")]
    ReviewNotFound {
        review_id: Option<String>,
        external_id: Option<String>,
    },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<sqlx::Error> for ReconcileError {
    fn from(e: sqlx::Error) -> Self {
        ReconcileError::Storage(e.into())
    }
}

/// Body of `POST /api/worker/jobs/:id/result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSubmission {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(
        default,
        rename = "errorMessage",
        skip_serializing_if = "Option::is_none"
    )]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Submitted {
    Completed(Value),
    Failed,
    /// The job was cancelled while the worker ran; nothing changed.
    IgnoredCancelled,
}

#[derive(Clone)]
pub struct Reconciler {
    pool: PgPool,
    jobs: JobsRepo,
    sessions: SessionsRepo,
}

impl Reconciler {
    pub fn new(pool: PgPool, jobs: JobsRepo, sessions: SessionsRepo) -> Self {
        Self {
            pool,
            jobs,
            sessions,
        }
    }

    /// Records a worker's outcome for `job_id`.
    ///
    /// Cancelled jobs accept any submission as a no-op. Other terminal jobs,
    /// and jobs that were never claimed, are a conflict.
    pub async fn submit(
        &self,
        job_id: Uuid,
        submission: ResultSubmission,
    ) -> Result<Submitted, AppError> {
        let job = self
            .jobs
            .get_by_id(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Job not found".to_string()))?;

        match job.status {
            JobStatus::Cancelled => return Ok(Submitted::IgnoredCancelled),
            JobStatus::Processing => {}
            other => {
                return Err(AppError::Conflict {
                    message: "Job is not in processing state".to_string(),
                    status: Some(other.to_string()),
                })
            }
        }

        if !submission.success {
            let message = submission
                .error_message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "Unknown error".to_string());
            return Ok(if self.jobs.fail(job.id, &message).await? {
                Submitted::Failed
            } else {
                self.lost_race(job.id).await?
            });
        }

        let result = submission.result.unwrap_or_else(|| json!({}));
        match self.apply_success(&job, result).await {
            Ok(Some(stored)) => Ok(Submitted::Completed(stored)),
            Ok(None) => self.lost_race(job.id).await,
            Err(e) => {
                let detail = e.to_string();
                tracing::error!(job_id = %job.id, job_type = %job.kind, error = %detail, "reconciliation failed");
                if self.jobs.fail(job.id, &detail).await? {
                    Err(AppError::Reconciliation(detail))
                } else {
                    self.lost_race(job.id).await
                }
            }
        }
    }

    /// The job left `processing` between our read and our write.
    async fn lost_race(&self, job_id: Uuid) -> Result<Submitted, AppError> {
        let status = self.jobs.get_by_id(job_id).await?.map(|j| j.status);
        match status {
            Some(JobStatus::Cancelled) => {
                tracing::info!(%job_id, "job cancelled while result was being applied; result dropped");
                Ok(Submitted::IgnoredCancelled)
            }
            other => Err(AppError::Conflict {
                message: "Job is not in processing state".to_string(),
                status: other.map(|s| s.to_string()),
            }),
        }
    }

    /// Applies `result` and completes the job atomically. `Ok(None)` means the
    /// job was no longer `processing` and everything was rolled back.
    pub async fn apply_success(
        &self,
        job: &Job,
        result: Value,
    ) -> Result<Option<Value>, ReconcileError> {
        let mut tx = self.pool.begin().await?;

        let stored = match job.kind.operation {
            Operation::Link => {
                self.apply_link(&mut tx, job, &result).await?;
                without_session_material(result)
            }
            Operation::Sync => self.apply_sync(&mut tx, job, &result).await?,
            Operation::RegisterReply => {
                let merged = merge_register_reply(&job.payload, result);
                apply_register_reply(&mut tx, job, &merged).await?;
                merged
            }
        };

        if !JobsRepo::complete_in(&mut tx, job.id, &stored).await? {
            tx.rollback().await?;
            return Ok(None);
        }
        tx.commit().await?;

        tracing::info!(job_id = %job.id, job_type = %job.kind, "job completed");
        Ok(Some(stored))
    }

    async fn apply_link(
        &self,
        conn: &mut PgConnection,
        job: &Job,
        result: &Value,
    ) -> Result<(), ReconcileError> {
        let session = session_artifacts(result).ok_or(ReconcileError::MissingSession)?;

        let shop_category = text_field(result, "shop_category").or_else(|| {
            text_field(result, "shop_display_label")
                .and_then(|label| category_from_display_label(&label))
        });

        let update = SessionUpdate {
            session,
            external_shop_id: text_field(result, "external_shop_id"),
            shop_owner_number: text_field(result, "shop_owner_number"),
            shop_category,
        };

        self.sessions
            .upsert_session(conn, job.store_id, job.kind.platform, &update)
            .await?;
        Ok(())
    }

    /// Returns the summary stored as the job result.
    async fn apply_sync(
        &self,
        conn: &mut PgConnection,
        job: &Job,
        result: &Value,
    ) -> Result<Value, ReconcileError> {
        let platform = job.kind.platform;
        let items =
            normalize::extract_items(platform, result).ok_or(ReconcileError::MissingReviewList)?;
        let normalized = normalize::normalize_all(platform, &items);

        let outcome =
            ReviewsRepo::mirror_replace(conn, job.store_id, platform, &normalized.reviews).await?;

        if platform == Platform::Baemin {
            if let Some(category) = text_field(result, "shop_category") {
                self.record_category(conn, job, &category).await?;
            }
        }

        tracing::info!(
            job_id = %job.id,
            %platform,
            upserted = outcome.upserted,
            deleted = outcome.deleted,
            skipped = normalized.skipped,
            "reviews mirrored"
        );

        let mut summary = Map::new();
        if let Some(count) = result.get("count") {
            summary.insert("count".to_string(), count.clone());
        }
        summary.insert("upserted".to_string(), json!(outcome.upserted));
        summary.insert("deleted".to_string(), json!(outcome.deleted));
        summary.insert("skipped".to_string(), json!(normalized.skipped));
        Ok(Value::Object(summary))
    }

    /// Best effort: a failed category write is logged and the sync still lands.
    ///
    /// Runs under a savepoint so a failing statement does not abort the
    /// surrounding transaction.
    async fn record_category(
        &self,
        conn: &mut PgConnection,
        job: &Job,
        category: &str,
    ) -> Result<(), ReconcileError> {
        let mut savepoint = sqlx::Connection::begin(&mut *conn).await?;
        match self
            .sessions
            .update_category(&mut savepoint, job.store_id, job.kind.platform, category)
            .await
        {
            Ok(updated) => {
                savepoint.commit().await?;
                if !updated {
                    tracing::debug!(store_id = %job.store_id, "no session record to carry shop_category");
                }
            }
            Err(e) => {
                savepoint.rollback().await?;
                tracing::warn!(job_id = %job.id, store_id = %job.store_id, error = %e, "shop_category not updated");
            }
        }
        Ok(())
    }
}

async fn apply_register_reply(
    conn: &mut PgConnection,
    job: &Job,
    merged: &Value,
) -> Result<(), ReconcileError> {
    let target = ReplyTarget::from_value(merged).ok_or(ReconcileError::IncompleteReply)?;
    if target.content.trim().is_empty() {
        return Err(ReconcileError::IncompleteReply);
    }

    let key = match (target.review_id.as_deref(), target.external_id.as_deref()) {
        (Some(id), _) => ReviewKey::Id(id),
        (None, Some(ext)) => ReviewKey::ExternalId(ext),
        (None, None) => return Err(ReconcileError::IncompleteReply),
    };

    let touched =
        ReviewsRepo::set_platform_reply(conn, job.store_id, job.kind.platform, key, &target.content)
            .await?;
    if touched == 0 {
        return Err(ReconcileError::ReviewNotFound {
            review_id: target.review_id,
            external_id: target.external_id,
        });
    }
    Ok(())
}

/// `payload ∪ result`, with the reply target and text pinned to the payload.
pub fn merge_register_reply(payload: &Value, result: Value) -> Value {
    let mut merged = payload.as_object().cloned().unwrap_or_default();
    if let Value::Object(extra) = result {
        merged.extend(extra);
    }

    let review_id = payload
        .get("review_id")
        .or_else(|| payload.get("reviewId"))
        .filter(|v| !v.is_null());
    if let Some(review_id) = review_id {
        merged.insert("review_id".to_string(), review_id.clone());
    }
    for key in ["external_id", "content"] {
        if let Some(v) = payload.get(key).filter(|v| !v.is_null()) {
            merged.insert(key.to_string(), v.clone());
        }
    }
    Value::Object(merged)
}

fn text_field(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The `session` object if the adapter sent one, else whichever of
/// `cookies`/`token` are present.
fn session_artifacts(result: &Value) -> Option<Value> {
    if let Some(session) = result.get("session").filter(|v| !v.is_null()) {
        return Some(session.clone());
    }
    let mut artifacts = Map::new();
    for key in ["cookies", "token"] {
        if let Some(v) = result.get(key).filter(|v| !v.is_null()) {
            artifacts.insert(key.to_string(), v.clone());
        }
    }
    (!artifacts.is_empty()).then_some(Value::Object(artifacts))
}

/// Link results are kept on the job for inspection, minus anything secret.
fn without_session_material(result: Value) -> Value {
    match result {
        Value::Object(mut obj) => {
            obj.remove("session");
            obj.retain(|k, _| !SECRET_KEYS.contains(&k.to_ascii_lowercase().as_str()));
            Value::Object(obj)
        }
        other => other,
    }
}

/// `"[음식배달] 가게 / 족발·보쌈 14680344"` -> `"족발·보쌈"`.
pub fn category_from_display_label(label: &str) -> Option<String> {
    let (_, tail) = label.split_once(" / ")?;
    let category = tail
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .trim_end();
    (!category.is_empty()).then(|| category.to_string())
}
