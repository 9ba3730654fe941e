//! Rate-limit sweeper background task.
//!
//! Evicts keys whose window has lapsed so the limiter map stays bounded by
//! the number of recently active clients.

use crate::rate_limit::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

#[instrument(skip_all, name = "guard.task.rate_limit_sweeper")]
pub async fn start_rate_limit_sweeper(
    limiter: Arc<RateLimiter>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "guard.task.rate_limit_sweeper",
        interval_secs = interval.as_secs(),
        "Starting rate-limit sweeper task"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = limiter.evict_expired();
                if evicted > 0 {
                    tracing::debug!(
                        target: "guard.task.rate_limit_sweeper",
                        evicted,
                        remaining = limiter.tracked_keys(),
                        "Evicted expired rate-limit windows"
                    );
                }
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "guard.task.rate_limit_sweeper",
                    "Rate-limit sweeper received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}
