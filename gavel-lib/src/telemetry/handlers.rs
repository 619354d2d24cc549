use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;

use crate::error::{GavelError, Result};

pub type RespBody = BoxBody<Bytes, hyper::Error>;

/// Prometheus text exposition of `registry`.
pub fn handle_metrics(registry: &prometheus::Registry) -> Result<Response<RespBody>> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| GavelError::Telemetry(format!("Failed to encode metrics: {e}")))?;

    build_response(StatusCode::OK, encoder.format_type(), buffer)
}

/// Health check response: 200 with the number of collecting vote sessions.
pub fn health_check_response(active_sessions: usize) -> Result<Response<RespBody>> {
    let body = json!({"status": "healthy", "active_vote_sessions": active_sessions});
    let body_bytes = serde_json::to_vec(&body)?;
    build_response(StatusCode::OK, "application/json", body_bytes)
}

pub fn not_found_response() -> Result<Response<RespBody>> {
    build_response(StatusCode::NOT_FOUND, "text/plain", b"Not Found".to_vec())
}

pub fn internal_error_response() -> Response<RespBody> {
    let mut resp = Response::new(full(b"Internal Server Error".to_vec()));
    *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    resp
}

fn build_response(
    status: StatusCode,
    content_type: &str,
    body: Vec<u8>,
) -> Result<Response<RespBody>> {
    Response::builder()
        .status(status)
        .header("Content-Type", content_type)
        .body(full(body))
        .map_err(|e| GavelError::Telemetry(format!("Failed to build response: {e}")))
}

fn full(body: Vec<u8>) -> RespBody {
    Full::new(Bytes::from(body))
        .map_err(|never| match never {})
        .boxed()
}
