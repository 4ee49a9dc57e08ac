//! Assembles the four in-container routers (§4.4) into one `axum::Router`
//! behind the bearer-token middleware, plus the `/healthz` readiness
//! endpoint that returns 200 once every router is mounted.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;

use crate::cell::CellInterpreter;
use crate::config::RuntimeConfig;
use crate::error::RuntimeConfigError;
use crate::mcp::McpRegistry;
use crate::{auth, generic, git_watcher, mcp, workspace};

pub struct AppState {
    pub config: RuntimeConfig,
    pub cell: Arc<CellInterpreter>,
    pub mcp: Arc<McpRegistry>,
}

impl AppState {
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeConfigError> {
        let cell = CellInterpreter::new().map_err(|e| RuntimeConfigError::InvalidValue {
            var: "<cell interpreter>",
            reason: e.to_string(),
        })?;
        Ok(Self {
            config,
            cell: Arc::new(cell),
            mcp: Arc::new(McpRegistry::new()),
        })
    }
}

async fn healthz() -> &'static str {
    "OK"
}

/// Builds the full router. Every route except `/healthz` sits behind
/// [`auth::require_bearer_token`] (§4.4, §4.5).
pub fn build_router(state: Arc<AppState>) -> Router {
    let config_for_auth = Arc::new(state.config.clone());

    let protected = Router::new()
        .route("/tools/run_shell_command", post(generic::run_shell_command))
        .route("/tools/run_ipython_cell", post(generic::run_ipython_cell))
        .route("/mcp/add_servers", post(mcp::add_servers))
        .route("/mcp/list_tools", get(mcp::list_tools))
        .route("/mcp/call_tool", post(mcp::call_tool))
        .route("/workspace/files", get(workspace::get_file).post(workspace::create_file).delete(workspace::delete_file))
        .route("/workspace/list-directories", get(workspace::list_directory))
        .route(
            "/workspace/directories",
            post(workspace::create_directory).delete(workspace::delete_directory),
        )
        .route("/workspace/move", put(workspace::move_path))
        .route("/workspace/copy", post(workspace::copy_path))
        .route("/watcher/commit_changes", post(git_watcher::commit_changes))
        .route("/watcher/generate_diff", post(git_watcher::generate_diff))
        .route("/watcher/git_logs", get(git_watcher::git_logs))
        .layer(middleware::from_fn_with_state(config_for_auth, auth::require_bearer_token))
        .with_state(state);

    Router::new().route("/healthz", get(healthz)).merge(protected)
}
