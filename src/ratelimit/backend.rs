//! Admission backend trait for abstracting the engine behind the HTTP layer.

use async_trait::async_trait;
use chrono::Duration;

use super::descriptor::RequestDescriptor;
use super::engine::{AdmissionResult, RateLimitStatus};

/// Trait for admission backends.
///
/// This trait lets the middleware and the HTTP handlers work with any
/// engine implementation, using the backend's own notion of "now".
#[async_trait]
pub trait AdmissionBackend: Send + Sync {
    /// Decide whether to admit a request, consuming quota when admitted.
    async fn check(&self, descriptor: &RequestDescriptor) -> AdmissionResult;

    /// Report quota usage for the caller without consuming any.
    async fn status(&self, descriptor: &RequestDescriptor) -> RateLimitStatus;

    /// Length of the sliding window.
    fn window(&self) -> Duration;
}
