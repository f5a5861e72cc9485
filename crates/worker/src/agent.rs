//! The worker's poll, dispatch and submit loop. One job in flight at a time.

use std::sync::Arc;
use std::time::Duration;

use reviewflow::api::models::{ClaimedJob, ResultSubmission};
use reviewflow::JobKind;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adapters::{AdapterError, AdapterRegistry, AdapterRequest};
use crate::cancel;
use crate::client::{ClientError, ServerClient};

/// What one pass of the loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Queue was empty.
    Idle,
    /// Configuration or transport problem; wait before retrying.
    Backoff,
    Processed(Uuid),
}

pub struct Agent {
    client: ServerClient,
    registry: Arc<AdapterRegistry>,
    poll_interval: Duration,
    cancel_check_interval: Duration,
}

impl Agent {
    pub fn new(
        client: ServerClient,
        registry: Arc<AdapterRegistry>,
        poll_interval: Duration,
        cancel_check_interval: Duration,
    ) -> Self {
        Self {
            client,
            registry,
            poll_interval,
            cancel_check_interval,
        }
    }

    /// Loops until `shutdown` fires. A job already in flight is finished and
    /// submitted first.
    pub async fn run(&self, shutdown: CancellationToken) {
        while !shutdown.is_cancelled() {
            match self.tick().await {
                Tick::Processed(_) => continue,
                Tick::Idle | Tick::Backoff => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }
        tracing::info!(worker_id = self.client.worker_id(), "worker stopped");
    }

    pub async fn tick(&self) -> Tick {
        if !self.client.has_secret() {
            tracing::error!("WORKER_SECRET is not set; cannot authenticate to the server");
            return Tick::Backoff;
        }
        if self.registry.is_empty() {
            tracing::error!("no platform adapters registered (set ADAPTER_COMMAND); not claiming work");
            return Tick::Backoff;
        }

        let job = match self.client.claim().await {
            Ok(Some(job)) => job,
            Ok(None) => return Tick::Idle,
            Err(ClientError::Unreachable(e)) => {
                tracing::warn!(error = %e, "server unreachable");
                return Tick::Backoff;
            }
            Err(e) => {
                tracing::error!(error = %e, "claim failed");
                return Tick::Backoff;
            }
        };

        tracing::info!(job_id = %job.id, job_type = %job.job_type, "claimed job");

        let submission = match self.execute(&job).await {
            Ok(result) => {
                tracing::info!(job_id = %job.id, "adapter succeeded");
                ResultSubmission {
                    success: true,
                    result: Some(result),
                    error_message: None,
                }
            }
            Err(e) => {
                match &e {
                    AdapterError::Cancelled => tracing::info!(job_id = %job.id, "job cancelled"),
                    other => tracing::warn!(job_id = %job.id, error = %other, "adapter failed"),
                }
                ResultSubmission {
                    success: false,
                    result: None,
                    error_message: Some(e.to_string()),
                }
            }
        };

        if let Err(e) = self.client.submit(job.id, &submission).await {
            tracing::error!(
                job_id = %job.id,
                error = %e,
                "failed to submit result; the outcome was NOT recorded server-side"
            );
        }

        Tick::Processed(job.id)
    }

    async fn execute(&self, job: &ClaimedJob) -> Result<Value, AdapterError> {
        let kind = JobKind::parse(&job.job_type)
            .ok_or_else(|| AdapterError::Unsupported(job.job_type.clone()))?;
        let entry = self
            .registry
            .adapter_for(kind.platform)
            .ok_or_else(|| AdapterError::Unsupported(kind.platform.to_string()))?;

        let session = self
            .client
            .session(job.id)
            .await
            .map_err(|e| AdapterError::Failed(format!("could not load session: {e}")))?;

        let today = chrono::Utc::now().date_naive();
        let request = AdapterRequest::new(job, kind, session, today);

        let cancel = CancellationToken::new();
        let watcher = cancel::spawn_watcher(
            self.client.clone(),
            job.id,
            self.cancel_check_interval,
            cancel.clone(),
        );

        let res = entry.run(&request, &cancel).await;
        watcher.abort();
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AdapterTimeouts, PlatformAdapter};
    use async_trait::async_trait;
    use axum::{
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post},
        Json, Router,
    };
    use reviewflow::api::models::{SessionRecord, WorkerJobStatus};
    use reviewflow::jobs::JobStatus;
    use reviewflow::Platform;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    const SECRET: &str = "s3cret";

    #[derive(Default)]
    struct Fake {
        queue: VecDeque<ClaimedJob>,
        statuses: HashMap<Uuid, JobStatus>,
        sessions: HashMap<Uuid, SessionRecord>,
        submissions: Vec<(Uuid, ResultSubmission)>,
        claims: usize,
    }

    type Shared = Arc<Mutex<Fake>>;

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get("x-worker-secret").and_then(|v| v.to_str().ok()) == Some(SECRET)
    }

    async fn claim(State(s): State<Shared>, headers: HeaderMap) -> Response {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        let mut fake = s.lock().unwrap();
        fake.claims += 1;
        match fake.queue.pop_front() {
            Some(job) => {
                fake.statuses.insert(job.id, JobStatus::Processing);
                Json(job).into_response()
            }
            None => StatusCode::NO_CONTENT.into_response(),
        }
    }

    async fn status(State(s): State<Shared>, Path(id): Path<Uuid>) -> Response {
        let fake = s.lock().unwrap();
        match fake.statuses.get(&id) {
            Some(status) => Json(WorkerJobStatus {
                id,
                job_type: "baemin_sync".to_string(),
                status: *status,
            })
            .into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn session(State(s): State<Shared>, Path(id): Path<Uuid>) -> Response {
        match s.lock().unwrap().sessions.get(&id) {
            Some(record) => Json(record.clone()).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn result(
        State(s): State<Shared>,
        Path(id): Path<Uuid>,
        Json(body): Json<ResultSubmission>,
    ) -> Response {
        s.lock().unwrap().submissions.push((id, body));
        Json(json!({ "ok": true })).into_response()
    }

    async fn serve(fake: Shared) -> String {
        let app = Router::new()
            .route("/api/worker/jobs", get(claim))
            .route("/api/worker/jobs/:id", get(status))
            .route("/api/worker/jobs/:id/session", get(session))
            .route("/api/worker/jobs/:id/result", post(result))
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Replies with a fixed value, or never when `hang` is set.
    struct Scripted {
        reply: Value,
        hang: bool,
        seen: Mutex<Vec<AdapterRequest>>,
    }

    impl Scripted {
        fn replying(reply: Value) -> Arc<Self> {
            Arc::new(Self {
                reply,
                hang: false,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn hanging() -> Arc<Self> {
            Arc::new(Self {
                reply: Value::Null,
                hang: true,
                seen: Mutex::new(Vec::new()),
            })
        }

        async fn answer(&self, req: &AdapterRequest) -> Result<Value, AdapterError> {
            self.seen.lock().unwrap().push(req.clone());
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(self.reply.clone())
        }
    }

    #[async_trait]
    impl PlatformAdapter for Scripted {
        async fn link(&self, req: &AdapterRequest) -> Result<Value, AdapterError> {
            self.answer(req).await
        }
        async fn sync(&self, req: &AdapterRequest) -> Result<Value, AdapterError> {
            self.answer(req).await
        }
        async fn register_reply(&self, req: &AdapterRequest) -> Result<Value, AdapterError> {
            self.answer(req).await
        }
    }

    fn job(job_type: &str, payload: Value) -> ClaimedJob {
        ClaimedJob {
            id: Uuid::new_v4(),
            job_type: job_type.to_string(),
            store_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            payload,
        }
    }

    fn agent(base: &str, secret: Option<&str>, registry: AdapterRegistry) -> Agent {
        let client = ServerClient::new(base, secret.map(str::to_string), "w-test").unwrap();
        Agent::new(
            client,
            Arc::new(registry),
            Duration::from_millis(10),
            Duration::from_millis(20),
        )
    }

    fn registry_with(platform: Platform, adapter: Arc<Scripted>) -> AdapterRegistry {
        let mut r = AdapterRegistry::new();
        r.register(platform, adapter);
        r
    }

    #[tokio::test]
    async fn empty_queue_is_idle() {
        let fake = Shared::default();
        let base = serve(fake.clone()).await;
        let a = agent(&base, Some(SECRET), registry_with(Platform::Baemin, Scripted::replying(json!({}))));

        assert_eq!(a.tick().await, Tick::Idle);
        assert_eq!(fake.lock().unwrap().claims, 1);
    }

    #[tokio::test]
    async fn successful_job_is_submitted_with_result_and_session() {
        let fake = Shared::default();
        let queued = job("baemin_sync", json!({}));
        let record = SessionRecord {
            store_id: queued.store_id,
            platform: Platform::Baemin,
            session: Some(json!({ "cookies": ["c"] })),
            credentials: None,
            external_shop_id: Some("14680344".to_string()),
            shop_owner_number: None,
            shop_category: None,
            updated_at: chrono::Utc::now(),
        };
        {
            let mut f = fake.lock().unwrap();
            f.queue.push_back(queued.clone());
            f.sessions.insert(queued.id, record);
        }
        let base = serve(fake.clone()).await;
        let adapter = Scripted::replying(json!({ "list": [{ "id": "42" }] }));
        let a = agent(&base, Some(SECRET), registry_with(Platform::Baemin, adapter.clone()));

        assert_eq!(a.tick().await, Tick::Processed(queued.id));

        let f = fake.lock().unwrap();
        assert_eq!(f.submissions.len(), 1);
        let (id, sub) = &f.submissions[0];
        assert_eq!(*id, queued.id);
        assert!(sub.success);
        assert_eq!(sub.result, Some(json!({ "list": [{ "id": "42" }] })));

        let seen = adapter.seen.lock().unwrap();
        let req = &seen[0];
        assert_eq!(
            req.session.as_ref().and_then(|s| s.external_shop_id.as_deref()),
            Some("14680344")
        );
        assert!(req.payload.get("from").is_some(), "sync window filled in");
    }

    #[tokio::test]
    async fn cancellation_stops_the_adapter_and_reports_it() {
        let fake = Shared::default();
        let queued = job("baemin_sync", json!({}));
        fake.lock().unwrap().queue.push_back(queued.clone());
        let base = serve(fake.clone()).await;
        let a = agent(&base, Some(SECRET), registry_with(Platform::Baemin, Scripted::hanging()));

        let canceller = fake.clone();
        let id = queued.id;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.lock().unwrap().statuses.insert(id, JobStatus::Cancelled);
        });

        let tick = tokio::time::timeout(Duration::from_secs(5), a.tick())
            .await
            .expect("cancellation should interrupt the adapter");
        assert_eq!(tick, Tick::Processed(queued.id));

        let f = fake.lock().unwrap();
        let (_, sub) = &f.submissions[0];
        assert!(!sub.success);
        assert_eq!(sub.error_message.as_deref(), Some("cancelled by user"));
    }

    #[tokio::test]
    async fn adapter_timeout_is_reported_as_failure() {
        let fake = Shared::default();
        let queued = job("naver_link", json!({}));
        fake.lock().unwrap().queue.push_back(queued);
        let base = serve(fake.clone()).await;

        let mut registry = AdapterRegistry::new();
        registry.register_with_timeouts(
            Platform::Naver,
            Scripted::hanging(),
            AdapterTimeouts {
                link: Duration::from_millis(30),
                ..AdapterTimeouts::default()
            },
        );
        let a = agent(&base, Some(SECRET), registry);

        a.tick().await;
        let f = fake.lock().unwrap();
        let (_, sub) = &f.submissions[0];
        assert!(!sub.success);
        assert!(sub
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("adapter timed out after"));
    }

    #[tokio::test]
    async fn job_without_adapter_fails_as_unsupported() {
        let fake = Shared::default();
        fake.lock().unwrap().queue.push_back(job("yogiyo_sync", json!({})));
        let base = serve(fake.clone()).await;
        let a = agent(&base, Some(SECRET), registry_with(Platform::Baemin, Scripted::replying(json!({}))));

        a.tick().await;
        let f = fake.lock().unwrap();
        let (_, sub) = &f.submissions[0];
        assert!(!sub.success);
        assert_eq!(
            sub.error_message.as_deref(),
            Some("no adapter registered for yogiyo")
        );
    }

    #[tokio::test]
    async fn missing_secret_backs_off_without_calling_server() {
        let fake = Shared::default();
        fake.lock().unwrap().queue.push_back(job("baemin_sync", json!({})));
        let base = serve(fake.clone()).await;
        let a = agent(&base, None, registry_with(Platform::Baemin, Scripted::replying(json!({}))));

        assert_eq!(a.tick().await, Tick::Backoff);
        let f = fake.lock().unwrap();
        assert_eq!(f.claims, 0);
        assert_eq!(f.queue.len(), 1);
    }

    #[tokio::test]
    async fn unreachable_server_backs_off() {
        // nothing listens on the discard port
        let a = agent(
            "http://127.0.0.1:9",
            Some(SECRET),
            registry_with(Platform::Baemin, Scripted::replying(json!({}))),
        );
        assert_eq!(a.tick().await, Tick::Backoff);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let fake = Shared::default();
        let base = serve(fake.clone()).await;
        let a = agent(&base, Some(SECRET), registry_with(Platform::Baemin, Scripted::replying(json!({}))));

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            trigger.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), a.run(shutdown))
            .await
            .expect("run returns after shutdown");
        assert!(fake.lock().unwrap().claims >= 1);
    }

    #[tokio::test]
    async fn run_processes_back_to_back_without_sleeping() {
        let fake = Shared::default();
        for _ in 0..3 {
            fake.lock().unwrap().queue.push_back(job("baemin_sync", json!({})));
        }
        let base = serve(fake.clone()).await;
        let a = agent(&base, Some(SECRET), registry_with(Platform::Baemin, Scripted::replying(json!({ "list": [] }))));

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        let watcher = fake.clone();
        tokio::spawn(async move {
            loop {
                let done = watcher.lock().unwrap().submissions.len();
                if done >= 3 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            trigger.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), a.run(shutdown))
            .await
            .expect("all queued jobs processed");
        assert_eq!(fake.lock().unwrap().submissions.len(), 3);
    }
}
