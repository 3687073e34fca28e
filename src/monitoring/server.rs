//! HTTP endpoint for metrics and health checks

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::PrometheusExporter;
use crate::cache::CacheManager;
use crate::error::{Error, Result};

/// Serve `/metrics` and `/healthz` until `shutdown` fires
///
/// Every scrape refreshes the exporter from the manager's live stats.
pub async fn serve_metrics(
    addr: SocketAddr,
    exporter: Arc<PrometheusExporter>,
    manager: CacheManager,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted
                .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?,
        };

        let io = TokioIo::new(stream);
        let exporter = Arc::clone(&exporter);
        let manager = manager.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = route(&req, &exporter, &manager);
                async move { Ok::<_, Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }

    info!("Metrics server stopped");
    Ok(())
}

fn route(
    req: &Request<hyper::body::Incoming>,
    exporter: &PrometheusExporter,
    manager: &CacheManager,
) -> Response<Full<Bytes>> {
    match req.uri().path() {
        "/metrics" => {
            exporter.update(&manager.stats());
            match exporter.encode() {
                Ok(body) => {
                    let mut response = text(StatusCode::OK, body);
                    response.headers_mut().insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static(prometheus::TEXT_FORMAT),
                    );
                    response
                }
                Err(e) => {
                    error!(error = %e, "Failed to encode metrics");
                    text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                }
            }
        }
        "/healthz" | "/livez" => text(StatusCode::OK, "ok"),
        "/readyz" if manager.is_shutdown() => text(StatusCode::SERVICE_UNAVAILABLE, "shutting down"),
        "/readyz" => text(StatusCode::OK, "ok"),
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}
