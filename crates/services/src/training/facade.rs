//! HTTP surface for the training-environment service (§4.7). Route shapes
//! and the `{success, data}` envelope mirror the original FastAPI service
//! this module replaces.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TrainingEnvError;
use crate::training::service::TrainingEnvironmentService;

pub fn router(service: Arc<TrainingEnvironmentService>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/get_env_profile", post(get_env_profile))
        .route("/create", post(create))
        .route("/step", post(step))
        .route("/evaluate", post(evaluate))
        .route("/get_info", post(get_info))
        .route("/release", post(release))
        .with_state(service)
}

async fn healthz() -> &'static str {
    "OK"
}

#[derive(Deserialize)]
struct ServiceRequest {
    #[serde(default)]
    env_type: Option<String>,
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    instance_id: Option<String>,
    #[serde(default)]
    messages: Value,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    data: T,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<TrainingEnvError> for ApiError {
    fn from(e: TrainingEnvError) -> Self {
        let status = match &e {
            TrainingEnvError::UnknownEnvType(_) | TrainingEnvError::UnknownInstance(_) => StatusCode::BAD_REQUEST,
            TrainingEnvError::ActorFailed(_) | TrainingEnvError::ActorGone => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(Envelope { success: false, data: self.message })).into_response()
    }
}

async fn get_env_profile(
    State(service): State<Arc<TrainingEnvironmentService>>,
    Json(req): Json<ServiceRequest>,
) -> Result<Json<Envelope<Vec<String>>>, ApiError> {
    let env_type = req.env_type.ok_or_else(|| ApiError::bad_request("env_type is required"))?;
    let split = req
        .params
        .get("split")
        .and_then(Value::as_str)
        .unwrap_or("train")
        .to_string();
    let task_ids = service.get_query_list(&env_type, &split)?;
    Ok(Json(Envelope { success: true, data: task_ids }))
}

async fn create(
    State(service): State<Arc<TrainingEnvironmentService>>,
    Json(req): Json<ServiceRequest>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let env_type = req.env_type.ok_or_else(|| ApiError::bad_request("env_type is required"))?;
    let task_id = req.task_id.ok_or_else(|| ApiError::bad_request("task_id is required"))?;
    let (_instance_id, init_state) = service
        .create_instance(&env_type, &task_id, req.instance_id, req.params)
        .await?;
    Ok(Json(Envelope { success: true, data: init_state }))
}

async fn step(
    State(service): State<Arc<TrainingEnvironmentService>>,
    Json(req): Json<ServiceRequest>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let instance_id = req.instance_id.ok_or_else(|| ApiError::bad_request("instance_id is required"))?;
    let result = service.step(&instance_id, req.messages, req.params).await?;
    Ok(Json(Envelope { success: true, data: result }))
}

async fn evaluate(
    State(service): State<Arc<TrainingEnvironmentService>>,
    Json(req): Json<ServiceRequest>,
) -> Result<Json<Envelope<f64>>, ApiError> {
    let instance_id = req.instance_id.ok_or_else(|| ApiError::bad_request("instance_id is required"))?;
    let score = service.evaluate(&instance_id, req.messages, req.params).await?;
    Ok(Json(Envelope { success: true, data: score }))
}

async fn get_info(
    State(service): State<Arc<TrainingEnvironmentService>>,
    Json(req): Json<ServiceRequest>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let instance_id = req.instance_id.ok_or_else(|| ApiError::bad_request("instance_id is required"))?;
    let info = service.get_info(&instance_id, req.messages, req.params).await?;
    Ok(Json(Envelope { success: true, data: info }))
}

async fn release(
    State(service): State<Arc<TrainingEnvironmentService>>,
    Json(req): Json<ServiceRequest>,
) -> Result<Json<Envelope<Option<Value>>>, ApiError> {
    let instance_id = req.instance_id.ok_or_else(|| ApiError::bad_request("instance_id is required"))?;
    let released = service.release_instance(&instance_id).await?;
    Ok(Json(Envelope { success: released, data: None }))
}
