use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use super::ApiState;
use crate::error::AppError;

pub const WORKER_SECRET_HEADER: &str = "x-worker-secret";
pub const USER_ID_HEADER: &str = "x-user-id";

/// Guards `/api/worker/*`: the secret may come as `x-worker-secret` or as a
/// bearer token.
pub async fn require_worker_secret(
    State(state): State<ApiState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.worker_secret.as_deref() else {
        tracing::warn!("worker call rejected: WORKER_SECRET is not configured");
        return AppError::Unauthorized.into_response();
    };

    let headers = req.headers();
    let presented = headers
        .get(WORKER_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(bearer_token)
        });

    match presented {
        Some(secret) if secret == expected => next.run(req).await,
        _ => AppError::Unauthorized.into_response(),
    }
}

/// `Bearer <token>` with any casing of the scheme.
fn bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();
    let (scheme, token) = header.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}

/// Identity of the dashboard user, as asserted by the upstream web tier.
#[derive(Debug, Clone, Copy)]
pub struct CallerId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(CallerId)
            .ok_or(AppError::Unauthorized)
    }
}
