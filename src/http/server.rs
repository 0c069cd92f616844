//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::BypassList;
use super::router;
use crate::error::{Result, TiergateError};
use crate::ratelimit::AdmissionBackend;

/// HTTP server for the admission service.
pub struct HttpServer<B: AdmissionBackend + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// The admission backend
    backend: Arc<B>,
    /// Paths exempt from admission
    bypass: BypassList,
}

impl<B: AdmissionBackend + 'static> HttpServer<B> {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, backend: Arc<B>, bypass: BypassList) -> Self {
        Self {
            addr,
            backend,
            bypass,
        }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            TiergateError::Io(e)
        })?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "Starting HTTP admission service");

        let app = router(self.backend, self.bypass);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TiergateError::Server(e.to_string())
        })
    }
}
