use crate::engine::Engine;
use crate::telemetry::handlers::{
    handle_metrics, health_check_response, internal_error_response, not_found_response, RespBody,
};
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Start the observability server.
///
/// Serves `/metrics` (Prometheus) and `/health` on a dedicated port until `shutdown` is
/// cancelled.
pub async fn start_observability_server(
    port: u16,
    registry: Registry,
    engine: Arc<Engine>,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let registry = Arc::new(registry);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(?addr, "Observability server started (metrics + health checks)");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Observability server: shutting down");
                break;
            }
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok((stream, peer)) => (stream, peer),
                    Err(e) => {
                        warn!(error = %e, "Observability server: accept error");
                        continue;
                    }
                };

                let registry = registry.clone();
                let engine = engine.clone();
                tokio::spawn(async move {
                    let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let registry = registry.clone();
                        let engine = engine.clone();
                        async move { Ok::<_, hyper::Error>(route(req.uri().path(), &registry, &engine)) }
                    });

                    let builder = ConnBuilder::new(TokioExecutor::new());
                    if let Err(e) = builder.serve_connection(TokioIo::new(stream), svc).await {
                        warn!(?peer, error = %e, "Observability server: serve_connection error");
                    }
                });
            }
        }
    }

    info!("Observability server stopped");
    Ok(())
}

fn route(path: &str, registry: &Registry, engine: &Engine) -> Response<RespBody> {
    let result = match path {
        "/health" => health_check_response(engine.active_vote_sessions()),
        "/metrics" => handle_metrics(registry),
        _ => not_found_response(),
    };
    result.unwrap_or_else(|e| {
        warn!(path, error = %e, "Observability server: handler error");
        internal_error_response()
    })
}
