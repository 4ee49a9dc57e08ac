//! The manager HTTP facade (§4.6): a small, explicit axum route table over
//! [`SandboxManager`] plus bearer-token auth. The route table is written
//! out by hand rather than derived by reflection — every endpoint this
//! process exposes is visible in one place.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use db::{Container, SandboxType};
use serde::{Deserialize, Serialize};
use utils::config::ManagerConfig;
use utils::token::{extract_bearer, tokens_equal};

use crate::error::ManagerError;
use crate::manager::SandboxManager;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SandboxManager>,
    pub config: Arc<ManagerConfig>,
}

pub fn router(state: AppState) -> Router {
    let auth_state = state.clone();
    Router::new()
        .route("/sandboxes/connect", post(connect))
        .route("/sandboxes", get(list))
        .route("/sandboxes/{session_id}", get(get_one))
        .route("/sandboxes/{session_id}/release", post(release))
        .layer(middleware::from_fn_with_state(auth_state, require_bearer_token))
        .route("/health", get(health))
        .with_state(state)
}

/// Bearer-token auth (§4.6, §7 "Authentication failures"). When no token is
/// configured the facade is intentionally left open — `ManagerConfig::from_env`
/// already warned about this at startup — so every request passes through.
async fn require_bearer_token(State(state): State<AppState>, headers: HeaderMap, req: axum::extract::Request, next: Next) -> Response {
    let Some(expected) = &state.config.http.bearer_token else {
        return next.run(req).await;
    };

    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer);

    match presented {
        Some(token) if tokens_equal(token, expected) => next.run(req).await,
        _ => (StatusCode::UNAUTHORIZED, Json(ErrorBody { error: "missing or invalid bearer token".to_string() })).into_response(),
    }
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        version: utils::build_info::BUILD_INFO.version,
    })
}

#[derive(Deserialize)]
struct ConnectRequest {
    sandbox_type: String,
    session_id: String,
    version: Option<String>,
}

/// Every manager method is exposed at its annotated path returning
/// `{data: <method result as JSON>}` (§6 "Manager HTTP surface").
#[derive(Serialize)]
struct DataEnvelope<T> {
    data: T,
}

impl<T: Serialize> DataEnvelope<T> {
    fn json(data: T) -> Json<Self> {
        Json(Self { data })
    }
}

async fn connect(
    State(state): State<AppState>,
    Json(req): Json<ConnectRequest>,
) -> Result<Json<DataEnvelope<Container>>, ApiError> {
    let sandbox_type = SandboxType::from_name(&req.sandbox_type);
    let container = state
        .manager
        .connect(sandbox_type, &req.session_id, req.version)
        .await?;
    Ok(DataEnvelope::json(container))
}

#[derive(Deserialize)]
struct ReleaseRequest {
    #[serde(default)]
    to_pool: bool,
}

async fn release(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<ReleaseRequest>,
) -> Result<Json<DataEnvelope<bool>>, ApiError> {
    state.manager.release(&session_id, req.to_pool).await?;
    Ok(DataEnvelope::json(true))
}

async fn get_one(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<DataEnvelope<Container>>, ApiError> {
    match state.manager.get(&session_id).await? {
        Some(container) => Ok(DataEnvelope::json(container)),
        None => Err(ApiError(ManagerError::NoSuchSession(session_id))),
    }
}

async fn list(State(state): State<AppState>) -> Result<Json<DataEnvelope<Vec<Container>>>, ApiError> {
    Ok(DataEnvelope::json(state.manager.list().await?))
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError(ManagerError);

impl From<ManagerError> for ApiError {
    fn from(e: ManagerError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ManagerError::NoSuchSession(_) => StatusCode::NOT_FOUND,
            ManagerError::UnknownType(_) | ManagerError::NoDriver(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}
