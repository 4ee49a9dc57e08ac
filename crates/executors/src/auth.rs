//! Bearer-token auth for the in-container control plane (§4.4). Every
//! router is mounted behind this middleware; grounded on
//! `services::facade::require_bearer_token`, generalized to also check the
//! `x-agentrun-session-id` header the sandbox client always attaches
//! (§4.5) — unlike the manager facade, this process always has a token
//! configured (the backend driver injects one at creation), so there is no
//! "auth disabled" branch here.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utils::token::{extract_bearer, tokens_equal};

use crate::config::RuntimeConfig;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

pub async fn require_bearer_token(
    State(config): State<std::sync::Arc<RuntimeConfig>>,
    headers: HeaderMap,
    req: axum::extract::Request,
    next: Next,
) -> Response {
    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer);

    match presented {
        Some(token) if tokens_equal(token, &config.secret_token) => next.run(req).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody {
                error: "missing or invalid bearer token".to_string(),
            }),
        )
            .into_response(),
    }
}
