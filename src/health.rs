//! Readiness probing for ship containers.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("health probe timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("health probe cancelled")]
    Cancelled,
}

/// Waits for a ship's HTTP service to report healthy.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Poll until healthy, the deadline passes, or `cancel` fires.
    async fn wait_ready(
        &self,
        address: &str,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ProbeError>;

    /// One-shot check (recovery path).
    async fn check(&self, address: &str) -> bool;
}

/// Polls `GET http://{address}/health` until 200 OK.
pub struct HttpHealthProber {
    client: reqwest::Client,
    interval: Duration,
}

impl HttpHealthProber {
    pub fn new(client: reqwest::Client, interval: Duration) -> Self {
        Self { client, interval }
    }

    async fn attempt(&self, url: &str) -> bool {
        match self.client.get(url).timeout(self.interval).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProber {
    async fn wait_ready(
        &self,
        address: &str,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ProbeError> {
        let url = format!("http://{address}/health");
        let poll = async {
            loop {
                if self.attempt(&url).await {
                    return;
                }
                tokio::time::sleep(self.interval).await;
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(ProbeError::Cancelled),
            outcome = tokio::time::timeout(deadline, poll) => {
                outcome.map_err(|_| ProbeError::Timeout { timeout: deadline })
            }
        }
    }

    async fn check(&self, address: &str) -> bool {
        self.attempt(&format!("http://{address}/health")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn ready_upstream_resolves_immediately() {
        let addr = serve(Router::new().route("/health", get(|| async { "ok" }))).await;
        let prober =
            HttpHealthProber::new(reqwest::Client::new(), Duration::from_millis(50));
        let cancel = CancellationToken::new();
        prober
            .wait_ready(&addr, Duration::from_secs(5), &cancel)
            .await
            .expect("upstream is healthy");
    }

    #[tokio::test]
    async fn retries_until_upstream_becomes_healthy() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let router = Router::new().route(
            "/health",
            get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        StatusCode::SERVICE_UNAVAILABLE
                    } else {
                        StatusCode::OK
                    }
                }
            }),
        );
        let addr = serve(router).await;
        let prober =
            HttpHealthProber::new(reqwest::Client::new(), Duration::from_millis(20));
        let cancel = CancellationToken::new();
        prober
            .wait_ready(&addr, Duration::from_secs(5), &cancel)
            .await
            .expect("eventually healthy");
        assert!(hits.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn unreachable_upstream_times_out() {
        // Reserved port with no listener.
        let prober =
            HttpHealthProber::new(reqwest::Client::new(), Duration::from_millis(20));
        let cancel = CancellationToken::new();
        let err = prober
            .wait_ready("127.0.0.1:1", Duration::from_millis(100), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Timeout { .. }));
    }

    #[tokio::test]
    async fn cancellation_wins_over_polling() {
        let prober =
            HttpHealthProber::new(reqwest::Client::new(), Duration::from_millis(20));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = prober
            .wait_ready("127.0.0.1:1", Duration::from_secs(60), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Cancelled));
    }
}
