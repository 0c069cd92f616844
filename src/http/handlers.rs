//! Route handlers for the standalone admission service.

use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::{info, instrument};

use super::middleware::{descriptor_from_request, AppState};
use crate::ratelimit::{AdmissionBackend, RequestDescriptor};

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    /// Endpoint to report on. Defaults to the status path itself.
    pub path: Option<String>,
}

/// Report the caller's quota for an endpoint without consuming any.
pub async fn rate_limit_status<B>(
    State(state): State<AppState<B>>,
    Query(query): Query<StatusQuery>,
    request: Request,
) -> impl IntoResponse
where
    B: AdmissionBackend + 'static,
{
    let mut descriptor = descriptor_from_request(&request);
    if let Some(path) = query.path.filter(|p| !p.is_empty()) {
        descriptor.path = path;
    }

    let status = state.backend.status(&descriptor).await;
    Json(serde_json::json!({
        "rate_limiting": true,
        "status": status,
    }))
}

/// Evaluate a descriptor supplied by an external caller.
///
/// Admitted requests answer 200, rejected ones 429; the body is the
/// admission result either way.
#[instrument(skip_all, fields(path = %descriptor.path))]
pub async fn check<B>(
    State(state): State<AppState<B>>,
    Json(descriptor): Json<RequestDescriptor>,
) -> impl IntoResponse
where
    B: AdmissionBackend + 'static,
{
    let result = state.backend.check(&descriptor).await;

    info!(
        tier = %result.tier,
        allowed = result.allowed,
        remaining = result.remaining,
        "Admission decision made"
    );

    let code = if result.allowed {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    (code, Json(result))
}

pub async fn not_found(request: Request) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "not_found",
            "path": request.uri().path(),
        })),
    )
}
