//! Operation routing to upstream ships.
//!
//! Resolves a ship, enforces session affinity on first use, and forwards
//! the request body to the ship's HTTP service verbatim. The router never
//! parses operation payloads.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::affinity::AffinityIndex;
use crate::error::BayError;
use crate::repository::ShipRepository;
use crate::ship::ShipStatus;

/// Upstream namespaces an `exec` call may target.
const ALLOWED_NAMESPACES: [&str; 3] = ["fs", "ipython", "shell"];

/// Status, content type, and body of an upstream reply, passed through as-is.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

pub struct OperationRouter {
    repo: Arc<dyn ShipRepository>,
    affinity: Arc<AffinityIndex>,
    client: reqwest::Client,
    timeout: Duration,
}

impl OperationRouter {
    pub fn new(
        repo: Arc<dyn ShipRepository>,
        affinity: Arc<AffinityIndex>,
        client: reqwest::Client,
        timeout: Duration,
    ) -> Self {
        Self {
            repo,
            affinity,
            client,
            timeout,
        }
    }

    /// Forward an operation to a ship, binding the session on first use.
    pub async fn exec(
        &self,
        ship_id: &str,
        session_id: &str,
        oper_endpoint: &str,
        body: Bytes,
    ) -> Result<UpstreamResponse, BayError> {
        let namespace = oper_endpoint.split('/').next().unwrap_or("");
        if !ALLOWED_NAMESPACES.contains(&namespace) {
            return Err(BayError::InvalidArgument {
                reason: format!("unknown operation endpoint: {oper_endpoint}"),
            });
        }

        let ship = self
            .repo
            .get(ship_id)
            .await?
            .ok_or_else(|| BayError::NotFound {
                ship_id: ship_id.to_string(),
            })?;
        if ship.status != ShipStatus::Running {
            return Err(BayError::IllegalState {
                ship_id: ship_id.to_string(),
                state: ship.status.to_string(),
            });
        }

        self.ensure_bound(session_id, &ship.id, ship.max_session_num)
            .await?;

        let address = ship.address().ok_or_else(|| BayError::Internal {
            reason: format!("running ship {ship_id} has no address"),
        })?;
        self.forward(&address, oper_endpoint, session_id, body).await
    }

    /// Bind the session to the ship unless it already is. A binding to a
    /// stopped ship is garbage-collected first; a binding to another live
    /// ship is a conflict.
    async fn ensure_bound(
        &self,
        session_id: &str,
        ship_id: &str,
        max_session_num: u32,
    ) -> Result<(), BayError> {
        if let Some(bound) = self.affinity.lookup(session_id).await
            && bound != ship_id
        {
            let prior_live = matches!(
                self.repo.get(&bound).await?,
                Some(prior) if prior.status != ShipStatus::Stopped
            );
            if prior_live {
                return Err(BayError::IllegalState {
                    ship_id: ship_id.to_string(),
                    state: format!("session {session_id} is bound to ship {bound}"),
                });
            }
            self.affinity
                .unbind_session(session_id)
                .await
                .map_err(BayError::from)?;
        }

        self.affinity
            .bind(session_id, ship_id, max_session_num)
            .await
            .map_err(BayError::from)?;
        Ok(())
    }

    async fn forward(
        &self,
        address: &str,
        oper_endpoint: &str,
        session_id: &str,
        body: Bytes,
    ) -> Result<UpstreamResponse, BayError> {
        let url = format!("http://{address}/{oper_endpoint}");
        let response = self
            .client
            .post(&url)
            .header("X-SESSION-ID", session_id)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BayError::DeadlineExceeded {
                        reason: format!("ship did not answer within {:?}", self.timeout),
                    }
                } else {
                    BayError::Unavailable {
                        reason: format!("ship unreachable at {address}: {e}"),
                    }
                }
            })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response
            .bytes()
            .await
            .map_err(|e| BayError::Unavailable {
                reason: format!("failed reading ship response: {e}"),
            })?;

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryShipRepository;
    use crate::ship::{Ship, ShipSpec};

    use axum::Router;
    use axum::extract::Request;
    use axum::routing::post;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        addr.to_string()
    }

    /// Upstream that echoes the request body and the session header.
    fn echo_router() -> Router {
        Router::new().route(
            "/shell/exec",
            post(|req: Request| async move {
                let session = req
                    .headers()
                    .get("X-SESSION-ID")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                let body = axum::body::to_bytes(req.into_body(), 1 << 20)
                    .await
                    .unwrap_or_default();
                format!("{}:{}", session, String::from_utf8_lossy(&body))
            }),
        )
    }

    async fn running_ship(repo: &InMemoryShipRepository, address: &str, max_sessions: u32) -> Ship {
        let mut ship = Ship::new(60, ShipSpec::default(), max_sessions);
        ship.status = ShipStatus::Running;
        ship.container_id = "c-1".into();
        ship.ip_address = address.to_string();
        repo.insert(&ship).await.unwrap();
        ship
    }

    fn router_for(repo: Arc<InMemoryShipRepository>) -> (OperationRouter, Arc<AffinityIndex>) {
        let affinity = Arc::new(AffinityIndex::new(repo.clone() as Arc<dyn ShipRepository>));
        let router = OperationRouter::new(
            repo,
            affinity.clone(),
            reqwest::Client::new(),
            Duration::from_secs(2),
        );
        (router, affinity)
    }

    #[tokio::test]
    async fn forwards_body_and_session_header() {
        let addr = serve(echo_router()).await;
        let repo = Arc::new(InMemoryShipRepository::new());
        let ship = running_ship(&repo, &addr, 2).await;
        let (router, affinity) = router_for(repo);

        let resp = router
            .exec(&ship.id, "s1", "shell/exec", Bytes::from_static(b"{\"cmd\":\"pwd\"}"))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(&resp.body[..], b"s1:{\"cmd\":\"pwd\"}");
        assert_eq!(affinity.session_count(&ship.id).await, 1);
    }

    #[tokio::test]
    async fn binds_each_new_session_until_cap() {
        let addr = serve(echo_router()).await;
        let repo = Arc::new(InMemoryShipRepository::new());
        let ship = running_ship(&repo, &addr, 2).await;
        let (router, affinity) = router_for(repo);

        router
            .exec(&ship.id, "s1", "shell/exec", Bytes::new())
            .await
            .unwrap();
        router
            .exec(&ship.id, "s2", "shell/exec", Bytes::new())
            .await
            .unwrap();
        assert_eq!(affinity.session_count(&ship.id).await, 2);

        let err = router
            .exec(&ship.id, "s3", "shell/exec", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BayError::CapacityExhausted { .. }));
    }

    #[tokio::test]
    async fn rejects_unknown_namespace() {
        let repo = Arc::new(InMemoryShipRepository::new());
        let ship = running_ship(&repo, "127.0.0.1:1", 1).await;
        let (router, _) = router_for(repo);

        let err = router
            .exec(&ship.id, "s1", "admin/shutdown", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BayError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn unknown_ship_and_stopped_ship_are_rejected() {
        let repo = Arc::new(InMemoryShipRepository::new());
        let mut stopped = Ship::new(60, ShipSpec::default(), 1);
        stopped.status = ShipStatus::Stopped;
        repo.insert(&stopped).await.unwrap();
        let (router, _) = router_for(repo);

        assert!(matches!(
            router.exec("nope", "s1", "fs/read_file", Bytes::new()).await,
            Err(BayError::NotFound { .. })
        ));
        assert!(matches!(
            router
                .exec(&stopped.id, "s1", "fs/read_file", Bytes::new())
                .await,
            Err(BayError::IllegalState { .. })
        ));
    }

    #[tokio::test]
    async fn session_bound_to_live_ship_cannot_exec_elsewhere() {
        let addr = serve(echo_router()).await;
        let repo = Arc::new(InMemoryShipRepository::new());
        let first = running_ship(&repo, &addr, 2).await;
        let second = running_ship(&repo, &addr, 2).await;
        let (router, _) = router_for(repo);

        router
            .exec(&first.id, "s1", "shell/exec", Bytes::new())
            .await
            .unwrap();
        let err = router
            .exec(&second.id, "s1", "shell/exec", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BayError::IllegalState { .. }));
    }

    #[tokio::test]
    async fn stale_binding_to_stopped_ship_is_collected() {
        let addr = serve(echo_router()).await;
        let repo = Arc::new(InMemoryShipRepository::new());
        let first = running_ship(&repo, &addr, 2).await;
        let second = running_ship(&repo, &addr, 2).await;
        let (router, affinity) = router_for(repo.clone());

        router
            .exec(&first.id, "s1", "shell/exec", Bytes::new())
            .await
            .unwrap();
        repo.mark_stopped(&first.id).await.unwrap();

        router
            .exec(&second.id, "s1", "shell/exec", Bytes::new())
            .await
            .expect("stale binding is garbage-collected");
        assert_eq!(affinity.lookup("s1").await.as_deref(), Some(second.id.as_str()));
    }

    #[tokio::test]
    async fn unreachable_upstream_maps_to_unavailable() {
        let repo = Arc::new(InMemoryShipRepository::new());
        let ship = running_ship(&repo, "127.0.0.1:1", 1).await;
        let (router, _) = router_for(repo);

        let err = router
            .exec(&ship.id, "s1", "shell/exec", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BayError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn slow_upstream_maps_to_deadline_exceeded() {
        let slow = Router::new().route(
            "/shell/exec",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "too late"
            }),
        );
        let addr = serve(slow).await;
        let repo = Arc::new(InMemoryShipRepository::new());
        let ship = running_ship(&repo, &addr, 1).await;
        let affinity = Arc::new(AffinityIndex::new(repo.clone() as Arc<dyn ShipRepository>));
        let router = OperationRouter::new(
            repo,
            affinity,
            reqwest::Client::new(),
            Duration::from_millis(100),
        );

        let err = router
            .exec(&ship.id, "s1", "shell/exec", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BayError::DeadlineExceeded { .. }));
    }

    #[tokio::test]
    async fn upstream_error_status_passes_through() {
        let failing = Router::new().route(
            "/ipython/exec",
            post(|| async { (axum::http::StatusCode::UNPROCESSABLE_ENTITY, "bad payload") }),
        );
        let addr = serve(failing).await;
        let repo = Arc::new(InMemoryShipRepository::new());
        let ship = running_ship(&repo, &addr, 1).await;
        let (router, _) = router_for(repo);

        let resp = router
            .exec(&ship.id, "s1", "ipython/exec", Bytes::new())
            .await
            .unwrap();
        assert_eq!(resp.status, 422);
        assert_eq!(&resp.body[..], b"bad payload");
    }
}
