use crate::jobs::model::{Job, JobStatus, NewJob};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

pub const CANCELLED_BY_USER: &str = "cancelled by user";
pub const WORKER_TIMED_OUT: &str = "worker timed out; result never submitted";

#[derive(Clone)]
pub struct JobsRepo {
    pool: PgPool,
}

impl JobsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ----------------------------
    // Create
    // ----------------------------

    pub async fn create(&self, job: NewJob) -> anyhow::Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (job_type, store_id, user_id, status, payload)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(job.kind().to_string())
        .bind(job.store_id())
        .bind(job.user_id())
        .bind(JobStatus::Pending.as_str())
        .bind(job.payload())
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(job_id = %id, job_type = %job.kind(), store_id = %job.store_id(), "job created");
        Ok(id)
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn get_by_id(&self, job_id: Uuid) -> anyhow::Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn get_for_owner(&self, job_id: Uuid, store_id: Uuid) -> anyhow::Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1 AND store_id = $2")
            .bind(job_id)
            .bind(store_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Newest first; limit is clamped to [1, 500].
    pub async fn list_for_store(&self, store_id: Uuid, limit: i64) -> anyhow::Result<Vec<Job>> {
        let limit = limit.clamp(1, 500);
        let rows = sqlx::query_as::<_, Job>(
            r#"
            SELECT *
            FROM jobs
            WHERE store_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(store_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ----------------------------
    // Claim
    // ----------------------------

    /// Hands the oldest pending job to `worker_id`.
    ///
    /// One statement: the inner SELECT locks a single pending row and skips rows
    /// another claimer holds, so concurrent claimers never receive the same job.
    pub async fn claim_next(&self, worker_id: &str) -> anyhow::Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs j
            SET status = 'processing',
                worker_id = $1,
                updated_at = now()
            FROM (
                SELECT id
                FROM jobs
                WHERE status = 'pending'
                ORDER BY created_at ASC, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            ) candidate
            WHERE j.id = candidate.id
            RETURNING j.*
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(job) = &job {
            tracing::info!(job_id = %job.id, job_type = %job.kind, worker_id, "job claimed");
        }
        Ok(job)
    }

    // ----------------------------
    // State transitions
    // ----------------------------
    //
    // Every transition is a single conditional UPDATE; the boolean says whether
    // this call performed it. Terminal rows never match.

    pub async fn cancel(&self, job_id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'cancelled',
                error_message = $2,
                result = NULL,
                worker_id = NULL,
                updated_at = now()
            WHERE id = $1
              AND status IN ('pending', 'processing')
            "#,
        )
        .bind(job_id)
        .bind(CANCELLED_BY_USER)
        .execute(&self.pool)
        .await?;

        let cancelled = res.rows_affected() == 1;
        if cancelled {
            tracing::info!(job_id = %job_id, "job cancelled");
        }
        Ok(cancelled)
    }

    pub async fn complete(&self, job_id: Uuid, result: &Value) -> anyhow::Result<bool> {
        let mut conn = self.pool.acquire().await?;
        Self::complete_in(&mut conn, job_id, result).await
    }

    /// `complete` on a caller-owned connection, typically the reconciliation
    /// transaction.
    pub async fn complete_in(
        conn: &mut PgConnection,
        job_id: Uuid,
        result: &Value,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                result = $2,
                error_message = NULL,
                updated_at = now()
            WHERE id = $1
              AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(result)
        .execute(&mut *conn)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    pub async fn fail(&self, job_id: Uuid, error_message: &str) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                error_message = $2,
                result = NULL,
                updated_at = now()
            WHERE id = $1
              AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        let failed = res.rows_affected() == 1;
        if failed {
            tracing::info!(job_id = %job_id, error_message, "job failed");
        }
        Ok(failed)
    }

    // ----------------------------
    // Maintenance
    // ----------------------------

    /// Fails `processing` jobs untouched for longer than `older_than_secs`.
    pub async fn reap_stale_processing(&self, older_than_secs: i64) -> anyhow::Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                error_message = $2,
                result = NULL,
                updated_at = now()
            WHERE status = 'processing'
              AND updated_at < now() - ($1::bigint * interval '1 second')
            "#,
        )
        .bind(older_than_secs)
        .bind(WORKER_TIMED_OUT)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }
}
