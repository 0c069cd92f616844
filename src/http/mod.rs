//! HTTP surface: admission middleware, service routes and server.

mod handlers;
pub mod middleware;
mod server;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub use middleware::{
    admission_middleware, apply_quota_headers, descriptor_from_request, AppState, BypassList,
    RateLimitRejection,
};
pub use server::HttpServer;

use crate::ratelimit::AdmissionBackend;

/// Path of the non-consuming status query.
pub const STATUS_PATH: &str = "/api/rate-limit-status";
/// Path of the external admission check.
pub const CHECK_PATH: &str = "/v1/check";

/// Build the service router.
///
/// Every route except the external check runs behind the admission
/// middleware. The check endpoint evaluates descriptors on behalf of other
/// callers and is not itself limited. Unknown paths answer 404 after
/// admission.
pub fn router<B>(backend: Arc<B>, bypass: BypassList) -> Router
where
    B: AdmissionBackend + 'static,
{
    let state = AppState::new(backend, bypass);

    Router::new()
        .route("/health", get(handlers::health))
        .route(STATUS_PATH, get(handlers::rate_limit_status::<B>))
        .fallback(handlers::not_found)
        .layer(from_fn_with_state(state.clone(), admission_middleware::<B>))
        .route(CHECK_PATH, post(handlers::check::<B>))
        .with_state(state)
}
