mod common;

use std::time::Duration;

use common::Fixture;
use reviewflow::jobs::{JobStatus, JobsRepo, CANCELLED_BY_USER, WORKER_TIMED_OUT};
use reviewflow::reconcile::{Reconciler, ResultSubmission, Submitted};
use reviewflow::sessions::SessionUpdate;
use reviewflow::{AppError, Platform};
use serde_json::json;
use serial_test::serial;
use sqlx::postgres::PgPoolOptions;

fn success(result: serde_json::Value) -> ResultSubmission {
    ResultSubmission {
        success: true,
        result: Some(result),
        error_message: None,
    }
}

fn failure(message: Option<&str>) -> ResultSubmission {
    ResultSubmission {
        success: false,
        result: None,
        error_message: message.map(str::to_string),
    }
}

#[tokio::test]
#[serial]
async fn cancel_pending_job() {
    let fx = Fixture::new().await;
    let id = fx.create_job("baemin_sync", json!({})).await;

    assert!(fx.jobs.cancel(id).await.unwrap());

    let job = fx.job(id).await;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.error_message.as_deref(), Some(CANCELLED_BY_USER));
    assert!(job.result.is_none());
    assert!(job.worker_id.is_none());
}

#[tokio::test]
#[serial]
async fn cancel_processing_job_clears_worker() {
    let fx = Fixture::new().await;
    let job = fx.processing_job("baemin_sync", json!({})).await;
    assert!(job.worker_id.is_some());

    assert!(fx.jobs.cancel(job.id).await.unwrap());
    let job = fx.job(job.id).await;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.worker_id.is_none());
}

#[tokio::test]
#[serial]
async fn terminal_jobs_never_change_again() {
    let fx = Fixture::new().await;

    let done = fx.processing_job("naver_link", json!({})).await;
    assert!(fx.jobs.complete(done.id, &json!({ "ok": 1 })).await.unwrap());

    let failed = fx.processing_job("naver_link", json!({})).await;
    assert!(fx.jobs.fail(failed.id, "boom").await.unwrap());

    let cancelled = fx.create_job("naver_link", json!({})).await;
    assert!(fx.jobs.cancel(cancelled).await.unwrap());

    for id in [done.id, failed.id, cancelled] {
        let before = fx.job(id).await;

        assert!(!fx.jobs.cancel(id).await.unwrap());
        assert!(!fx.jobs.complete(id, &json!({ "late": true })).await.unwrap());
        assert!(!fx.jobs.fail(id, "late failure").await.unwrap());

        let after = fx.job(id).await;
        assert_eq!(after.status, before.status);
        assert_eq!(after.result, before.result);
        assert_eq!(after.error_message, before.error_message);
        assert_eq!(after.updated_at, before.updated_at);
    }
}

#[tokio::test]
#[serial]
async fn complete_and_fail_require_processing() {
    let fx = Fixture::new().await;
    let id = fx.create_job("yogiyo_sync", json!({})).await;

    assert!(!fx.jobs.complete(id, &json!({})).await.unwrap());
    assert!(!fx.jobs.fail(id, "nope").await.unwrap());
    assert_eq!(fx.job(id).await.status, JobStatus::Pending);
}

#[tokio::test]
#[serial]
async fn result_after_cancel_is_a_benign_no_op() {
    let fx = Fixture::new().await;
    let job = fx.processing_job("baemin_sync", json!({})).await;
    assert!(fx.jobs.cancel(job.id).await.unwrap());

    let outcome = fx
        .reconciler
        .submit(job.id, success(json!({ "list": [{ "id": "1", "contents": "hi" }] })))
        .await
        .unwrap();
    assert_eq!(outcome, Submitted::IgnoredCancelled);

    let outcome = fx.reconciler.submit(job.id, failure(Some("boom"))).await.unwrap();
    assert_eq!(outcome, Submitted::IgnoredCancelled);

    let job = fx.job(job.id).await;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.error_message.as_deref(), Some(CANCELLED_BY_USER));
    assert!(job.result.is_none());

    let reviews: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews")
        .fetch_one(&fx.pool)
        .await
        .unwrap();
    assert_eq!(reviews, 0, "cancelled job must not write reviews");
}

#[tokio::test]
#[serial]
async fn failure_without_message_records_unknown_error() {
    let fx = Fixture::new().await;
    let job = fx.processing_job("ddangyo_sync", json!({})).await;

    let outcome = fx.reconciler.submit(job.id, failure(None)).await.unwrap();
    assert_eq!(outcome, Submitted::Failed);

    let job = fx.job(job.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some("Unknown error"));
    assert!(job.result.is_none());
}

#[tokio::test]
#[serial]
async fn submission_for_pending_or_completed_job_conflicts() {
    let fx = Fixture::new().await;

    let pending = fx.create_job("baemin_sync", json!({})).await;
    let err = fx.reconciler.submit(pending, failure(Some("x"))).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict { status: Some(ref s), .. } if s == "pending"));
    assert_eq!(fx.job(pending).await.status, JobStatus::Pending);
    assert!(fx.jobs.cancel(pending).await.unwrap());

    let done = fx.processing_job("naver_link", json!({})).await;
    fx.reconciler
        .submit(done.id, success(json!({ "token": "t" })))
        .await
        .unwrap();
    let err = fx.reconciler.submit(done.id, failure(Some("x"))).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict { status: Some(ref s), .. } if s == "completed"));
}

#[tokio::test]
#[serial]
async fn submission_for_unknown_job_is_not_found() {
    let fx = Fixture::new().await;
    let err = fx
        .reconciler
        .submit(uuid::Uuid::new_v4(), failure(None))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
#[serial]
async fn stale_processing_jobs_are_reaped() {
    let fx = Fixture::new().await;
    let stale = fx.processing_job("baemin_sync", json!({})).await;
    let fresh = fx.processing_job("baemin_sync", json!({})).await;

    sqlx::query("UPDATE jobs SET updated_at = now() - interval '2 hours' WHERE id = $1")
        .bind(stale.id)
        .execute(&fx.pool)
        .await
        .unwrap();

    let reaped = fx.jobs.reap_stale_processing(1800).await.unwrap();
    assert_eq!(reaped, 1);

    let stale = fx.job(stale.id).await;
    assert_eq!(stale.status, JobStatus::Failed);
    assert_eq!(stale.error_message.as_deref(), Some(WORKER_TIMED_OUT));
    assert_eq!(fx.job(fresh.id).await.status, JobStatus::Processing);

    // the reaped job's worker reporting late is a conflict, not an overwrite
    let err = fx
        .reconciler
        .submit(stale.id, success(json!({ "list": [] })))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict { .. }));
}

#[tokio::test]
#[serial]
async fn payload_cannot_be_rewritten() {
    let fx = Fixture::new().await;
    let id = fx
        .create_job(
            "baemin_register_reply",
            json!({ "external_id": "r1", "content": "thanks" }),
        )
        .await;

    let res = sqlx::query("UPDATE jobs SET payload = '{}'::jsonb WHERE id = $1")
        .bind(id)
        .execute(&fx.pool)
        .await;
    assert!(res.is_err(), "payload update must be rejected by the database");
}

#[tokio::test]
#[serial]
async fn apply_error_after_cancel_is_acknowledged() {
    let fx = Fixture::new().await;

    let mut tx = fx.pool.begin().await.unwrap();
    fx.sessions
        .upsert_session(
            &mut tx,
            fx.store_id,
            Platform::Baemin,
            &SessionUpdate {
                session: json!({ "cookies": [] }),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    tx.commit().await.unwrap();

    // A reconciler whose statements give up quickly on row locks.
    let url = std::env::var("TEST_DATABASE_URL").unwrap();
    let impatient = PgPoolOptions::new()
        .max_connections(2)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("SET lock_timeout = '2s'").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(&url)
        .await
        .unwrap();
    let reconciler = Reconciler::new(
        impatient.clone(),
        JobsRepo::new(impatient.clone()),
        fx.sessions.clone(),
    );

    let job = fx.processing_job("baemin_link", json!({})).await;

    let mut blocker = fx.pool.begin().await.unwrap();
    sqlx::query(
        "SELECT 1 FROM platform_sessions WHERE store_id = $1 AND platform = 'baemin' FOR UPDATE",
    )
    .bind(fx.store_id)
    .execute(&mut *blocker)
    .await
    .unwrap();

    let submit = tokio::spawn({
        let reconciler = reconciler.clone();
        let id = job.id;
        async move { reconciler.submit(id, success(json!({ "token": "t" }))).await }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(fx.jobs.cancel(job.id).await.unwrap());

    let outcome = submit.await.unwrap().unwrap();
    blocker.rollback().await.unwrap();
    assert_eq!(outcome, Submitted::IgnoredCancelled);

    let job = fx.job(job.id).await;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.error_message.as_deref(), Some(CANCELLED_BY_USER));

    let record = fx.sessions.get(fx.store_id, Platform::Baemin).await.unwrap().unwrap();
    assert_eq!(record.session, Some(json!({ "cookies": [] })));
}
