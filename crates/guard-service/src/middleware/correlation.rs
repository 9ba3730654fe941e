//! Correlation id middleware.
//!
//! Reads `X-Correlation-ID` from the request or generates one, runs the rest
//! of the stack inside a `request` span carrying it, and echoes it back on
//! the response.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

pub const CORRELATION_ID_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

const MAX_CORRELATION_ID_LEN: usize = 128;

/// Correlation id of the current request, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

/// Accept a caller-supplied id only if it is short printable ASCII.
fn usable(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_CORRELATION_ID_LEN
        && value.bytes().all(|b| b.is_ascii_graphic())
}

pub async fn correlation_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(&CORRELATION_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .filter(|v| usable(v))
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);

    req.extensions_mut().insert(CorrelationId(id.clone()));

    let span = tracing::info_span!(
        "request",
        correlation_id = %id,
        method = %req.method(),
        path = %req.uri().path()
    );

    let mut response = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}
