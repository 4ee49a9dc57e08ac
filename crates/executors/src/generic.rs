//! Generic router (§4.4): `run_shell_command` and `run_ipython_cell`
//! (renamed `run_cell` in code — see [`crate::cell`] — but kept at its
//! original wire path since external callers and the sandbox client
//! (`services::sandbox_client::SandboxClient`) key on the literal route).

use std::process::Stdio;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tokio::process::Command;
use utils::envelope::ToolResult;

use crate::app::AppState;

#[derive(Deserialize)]
pub struct ShellCommandRequest {
    command: String,
}

/// Runs `command` under `sh -c` and captures stdout/stderr/returncode
/// separately (§4.4 "Generic router"). A non-zero exit with empty stderr is
/// *not* an error (§8 boundary behavior) — `isError` only follows stderr.
pub async fn run_shell_command(
    State(_state): State<Arc<AppState>>,
    Json(req): Json<ShellCommandRequest>,
) -> Response {
    let output = Command::new("sh")
        .arg("-c")
        .arg(&req.command)
        .stdin(Stdio::null())
        .output()
        .await;

    match output {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            let returncode = output.status.code().unwrap_or(-1);
            Json(ToolResult::from_process_output(&stdout, &stderr, returncode)).into_response()
        }
        Err(e) => Json(ToolResult::transport_error(format!(
            "failed to spawn shell: {e}"
        )))
        .into_response(),
    }
}

#[derive(Deserialize)]
pub struct IPythonCellRequest {
    #[serde(default)]
    code: String,
}

/// Executes `code` in the container's persistent cell interpreter (§4.4).
/// Empty `code` is a 400, matching the original kernel's rejection of an
/// empty cell body (§8 boundary behavior).
pub async fn run_ipython_cell(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IPythonCellRequest>,
) -> Result<Json<ToolResult>, StatusCode> {
    if req.code.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let code = req.code;
    let interpreter = state.cell.clone();
    let result = tokio::task::spawn_blocking(move || interpreter.eval(&code))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    match result {
        Ok((stdout, stderr)) => Ok(Json(ToolResult::from_process_output(&stdout, &stderr, 0))),
        Err(e) => Ok(Json(ToolResult::error(vec![
            utils::envelope::ContentItem::described(e.to_string(), "stderr"),
        ]))),
    }
}
