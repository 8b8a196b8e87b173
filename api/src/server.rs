use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storage::BlobStore;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::handlers::*;
use crate::{ApiError, ApiResult, Orchestrator};

/// How long in-flight requests get to finish once shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(20);

/// Public API: whole-object upload and download plus a health probe.
pub fn front_router(orchestrator: Arc<Orchestrator>) -> Router {
    let api_routes = Router::new()
        .route("/api/v1/uploadFile/:object_id", post(upload_file))
        .route("/api/v1/getFile/:object_id", get(get_file))
        .route("/health", get(health_check))
        .with_state(orchestrator);

    with_common_layers(api_routes)
}

/// Node-facing API of a storage node.
pub fn store_router(store: Arc<BlobStore>) -> Router {
    let api_routes = Router::new()
        .route("/api/v1/uploadFile/:part_name", post(upload_part))
        .route("/api/v1/getFile/:part_name", get(get_part))
        .route("/api/v1/getAvailableSpace", get(available_space))
        .with_state(store);

    with_common_layers(api_routes)
}

fn with_common_layers(routes: Router) -> Router {
    routes
        .fallback(not_found)
        // bodies are streamed, size is policed by the handlers
        .layer(DefaultBodyLimit::disable())
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

#[derive(Debug, Clone)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

pub struct Server {
    addr: SocketAddr,
    tls: Option<TlsFiles>,
    router: Router,
}

impl Server {
    pub fn new(addr: SocketAddr, tls: Option<TlsFiles>, router: Router) -> Self {
        Self { addr, tls, router }
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests for
    /// up to [`SHUTDOWN_GRACE`].
    pub async fn serve<F>(self, shutdown: F) -> ApiResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            shutdown.await;
            tracing::info!(
                "Shutting down, draining connections for up to {:?}",
                SHUTDOWN_GRACE
            );
            drain.graceful_shutdown(Some(SHUTDOWN_GRACE));
        });

        let app = self.router.into_make_service();
        let served = match self.tls {
            Some(tls) => {
                // reqwest and axum-server each enable a rustls backend; pin one
                let _ = rustls::crypto::ring::default_provider().install_default();
                let config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                    .await
                    .map_err(|e| {
                        ApiError::Internal(format!(
                            "Failed to load TLS certificate {} / key {}: {}",
                            tls.cert.display(),
                            tls.key.display(),
                            e
                        ))
                    })?;
                tracing::info!("Listening on https://{}", self.addr);
                axum_server::bind_rustls(self.addr, config)
                    .handle(handle)
                    .serve(app)
                    .await
            }
            None => {
                tracing::warn!("Listening on http://{} without TLS", self.addr);
                axum_server::bind(self.addr).handle(handle).serve(app).await
            }
        };

        served.map_err(|e| ApiError::Internal(format!("Server error on {}: {}", self.addr, e)))?;
        tracing::info!("Server on {} stopped", self.addr);
        Ok(())
    }
}
