//! HTTP front for the Bay API.
//!
//! Thin binding from routes to the scheduler and operation router. All
//! `/ship` routes sit behind bearer-token auth applied as a route_layer;
//! `GET /health` is registered outside it.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::BayError;
use crate::proxy::OperationRouter;
use crate::scheduler::Scheduler;
use crate::ship::{CreateShipRequest, ExtendTtlRequest, LogsResponse, Ship, ShipResponse};

/// Shared state for the API.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub ops: Arc<OperationRouter>,
    pub access_token: String,
}

impl IntoResponse for BayError {
    fn into_response(self) -> Response {
        let status = match &self {
            BayError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            BayError::Unauthorized => StatusCode::UNAUTHORIZED,
            BayError::NotFound { .. } => StatusCode::NOT_FOUND,
            BayError::IllegalState { .. } => StatusCode::CONFLICT,
            BayError::CapacityExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
            BayError::StartupFailed { .. } => StatusCode::BAD_GATEWAY,
            BayError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            BayError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
            BayError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}

pub struct BayApi;

impl BayApi {
    /// Build the axum router for the public API.
    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/ship", post(create_ship))
            .route("/ships", get(list_ships))
            .route("/ship/{ship_id}", get(get_ship).delete(delete_ship))
            .route("/ship/{ship_id}/exec/{*oper_endpoint}", post(exec_operation))
            .route("/ship/{ship_id}/extend-ttl", post(extend_ttl))
            .route("/ship/logs/{ship_id}", get(get_logs))
            .route_layer(axum::middleware::from_fn_with_state(
                state.clone(),
                bearer_auth_middleware,
            ))
            // Unauthenticated routes (added after the layer).
            .route("/health", get(health_check))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve until the process exits.
    pub async fn start(
        state: AppState,
        host: &str,
        port: u16,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let router = Self::router(state);
        let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
        tracing::info!("Bay API listening on {}", listener.local_addr()?);
        axum::serve(listener, router).await?;
        Ok(())
    }
}

/// Reject requests whose bearer token does not match `ACCESS_TOKEN`.
async fn bearer_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == state.access_token);
    if !authorized {
        return BayError::Unauthorized.into_response();
    }
    next.run(request).await
}

fn session_id(headers: &HeaderMap) -> Result<String, BayError> {
    headers
        .get("X-SESSION-ID")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| BayError::InvalidArgument {
            reason: "X-SESSION-ID header is required".to_string(),
        })
}

async fn ship_response(state: &AppState, ship: &Ship) -> Json<ShipResponse> {
    let sessions = state.scheduler.session_count(&ship.id).await;
    Json(ShipResponse::from_ship(ship, sessions))
}

// -- Handlers --

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn create_ship(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateShipRequest>,
) -> Result<Json<ShipResponse>, BayError> {
    let session = session_id(&headers)?;
    let cancel = CancellationToken::new();
    let ship = state
        .scheduler
        .create_ship(&session, &request, &cancel)
        .await?;
    Ok(ship_response(&state, &ship).await)
}

async fn get_ship(
    State(state): State<AppState>,
    Path(ship_id): Path<String>,
) -> Result<Json<ShipResponse>, BayError> {
    let ship = state.scheduler.get_ship(&ship_id).await?;
    Ok(ship_response(&state, &ship).await)
}

async fn list_ships(
    State(state): State<AppState>,
) -> Result<Json<Vec<ShipResponse>>, BayError> {
    let mut out = Vec::new();
    for ship in state.scheduler.list_live().await? {
        let sessions = state.scheduler.session_count(&ship.id).await;
        out.push(ShipResponse::from_ship(&ship, sessions));
    }
    Ok(Json(out))
}

async fn delete_ship(
    State(state): State<AppState>,
    Path(ship_id): Path<String>,
) -> Result<StatusCode, BayError> {
    state.scheduler.stop_ship(&ship_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn exec_operation(
    State(state): State<AppState>,
    Path((ship_id, oper_endpoint)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, BayError> {
    let session = session_id(&headers)?;
    let upstream = state
        .ops
        .exec(&ship_id, &session, &oper_endpoint, body)
        .await?;

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY));
    if let Some(ref content_type) = upstream.content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder
        .body(Body::from(upstream.body))
        .map_err(|e| BayError::Internal {
            reason: e.to_string(),
        })
}

async fn extend_ttl(
    State(state): State<AppState>,
    Path(ship_id): Path<String>,
    Json(request): Json<ExtendTtlRequest>,
) -> Result<Json<ShipResponse>, BayError> {
    let ship = state.scheduler.extend_ttl(&ship_id, request.ttl).await?;
    Ok(ship_response(&state, &ship).await)
}

async fn get_logs(
    State(state): State<AppState>,
    Path(ship_id): Path<String>,
) -> Result<Json<LogsResponse>, BayError> {
    let logs = state.scheduler.logs(&ship_id).await?;
    Ok(Json(LogsResponse { logs }))
}
