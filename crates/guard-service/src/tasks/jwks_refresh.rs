//! JWKS refresh background task.
//!
//! Refetches every trust source's key set on a fixed interval so requests
//! rarely pay for a fetch. A failed refresh keeps the previous key set.
//!
//! # Graceful Shutdown
//!
//! The task exits when the cancellation token is triggered. A refresh that
//! is already running finishes on its own fetch task.

use crate::auth::jwks::JwksCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Start the JWKS refresh task.
///
/// The first refresh happens one `interval` after start; warm-up covers
/// startup.
#[instrument(skip_all, name = "guard.task.jwks_refresh")]
pub async fn start_jwks_refresh(
    cache: Arc<JwksCache>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "guard.task.jwks_refresh",
        interval_secs = interval.as_secs(),
        "Starting JWKS refresh task"
    );

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let refreshed = cache.refresh_all().await;
                tracing::debug!(
                    target: "guard.task.jwks_refresh",
                    refreshed,
                    "JWKS refresh pass complete"
                );
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "guard.task.jwks_refresh",
                    "JWKS refresh task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "guard.task.jwks_refresh", "JWKS refresh task stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::jwks::{JwksCacheSettings, JwksDocument, JwksFetcher};
    use crate::config::{Provider, TrustSource};
    use crate::errors::GuardError;
    use async_trait::async_trait;
    use guard_test_utils::crypto_fixtures::TestKeypair;
    use jsonwebtoken::Algorithm;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
        jwks: serde_json::Value,
    }

    #[async_trait]
    impl JwksFetcher for CountingFetcher {
        async fn fetch(&self, _source: &TrustSource) -> Result<JwksDocument, GuardError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::from_value(self.jwks.clone()).unwrap())
        }
    }

    fn cache(fetcher: Arc<CountingFetcher>) -> Arc<JwksCache> {
        let source = TrustSource {
            provider: Provider::Apigee,
            name: "apigee".to_string(),
            jwks_url: "https://idpA/jwks".to_string(),
            expected_issuers: vec!["https://idpA".to_string()],
            expected_audience: "TSIAM".to_string(),
            client_id: None,
            algorithms: vec![Algorithm::EdDSA],
        };
        Arc::new(JwksCache::new(
            vec![source],
            fetcher,
            JwksCacheSettings {
                ttl: Duration::from_secs(900),
                fetch_timeout: Duration::from_secs(5),
                min_forced_refresh: Duration::from_secs(5),
            },
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_on_interval_and_stops_on_cancel() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            jwks: serde_json::json!({"keys": [TestKeypair::new(1, "key-1").jwk_json()]}),
        });
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(start_jwks_refresh(
            cache(Arc::clone(&fetcher)),
            Duration::from_secs(600),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task should exit after cancellation")
            .unwrap();
    }
}
