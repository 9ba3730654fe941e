//! Pre-authentication rate limiting by client IP.

use crate::errors::GuardError;
use crate::observability::metrics;
use crate::rate_limit::RateLimiter;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;

/// Rate-limit key for a connection; `ip:unknown` when the server was not
/// started with connect info.
pub fn ip_key(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "ip:unknown".to_string(), |ci| format!("ip:{}", ci.0.ip()))
}

/// Marks a request whose IP key was already counted by [`limit_by_ip`].
#[derive(Debug, Clone)]
pub struct CountedIpKey(pub String);

/// IP key for a caller without a `client_id`, unless this request already
/// spent it in [`limit_by_ip`].
pub fn uncounted_ip_key(req: &Request) -> Option<String> {
    if req.extensions().get::<CountedIpKey>().is_some() {
        return None;
    }
    Some(ip_key(req))
}

pub async fn limit_by_ip(
    State(limiter): State<Arc<RateLimiter>>,
    mut req: Request,
    next: Next,
) -> Result<Response, GuardError> {
    let key = ip_key(&req);
    if !limiter.allow(&key) {
        metrics::record_rate_limit_rejection("pre_auth");
        return Err(GuardError::RateLimited);
    }
    req.extensions_mut().insert(CountedIpKey(key));
    Ok(next.run(req).await)
}
