use axum::{
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::jobs::JobsRepo;
use crate::reconcile::Reconciler;
use crate::sessions::SessionsRepo;
use crate::stores::StoresRepo;

pub mod auth;
pub mod caller;
pub mod models;
pub mod worker;

#[derive(Clone)]
pub struct ApiState {
    pub jobs: JobsRepo,
    pub stores: StoresRepo,
    pub sessions: SessionsRepo,
    pub reconciler: Reconciler,
    /// Shared secret for `/api/worker/*`. `None` rejects every worker call.
    pub worker_secret: Option<String>,
}

pub fn router(state: ApiState) -> Router {
    let worker_routes = Router::new()
        .route("/jobs", get(worker::claim_job))
        .route("/jobs/:id", get(worker::job_status))
        .route("/jobs/:id/session", get(worker::job_session))
        .route("/jobs/:id/result", post(worker::submit_result))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_worker_secret,
        ));

    Router::new()
        // Caller (dashboard) routes
        .route("/api/stores/:store_id/jobs", post(caller::create_job))
        .route(
            "/api/stores/:store_id/platforms/:platform/link",
            post(caller::request_link),
        )
        .route("/api/stores/:store_id/jobs/:job_id", get(caller::job_status))
        .route(
            "/api/stores/:store_id/jobs/:job_id/cancel",
            post(caller::cancel_job),
        )
        // Worker routes
        .nest("/api/worker", worker_routes)
        // Health
        .route("/health", get(health))
        .with_state(state)
}

/// Callers may only touch stores they own.
async fn ensure_owner(state: &ApiState, store_id: Uuid, user_id: Uuid) -> Result<(), AppError> {
    if state.stores.is_owner(store_id, user_id).await? {
        Ok(())
    } else {
        Err(AppError::Forbidden("store not owned by caller".to_string()))
    }
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
