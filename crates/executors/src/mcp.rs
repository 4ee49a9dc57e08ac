//! MCP router (§4.4): hosts dynamic tool-server child processes and
//! dispatches tool calls to them. The `server_name -> session` mapping is a
//! service singleton (§9 "Global mutable state") rather than a process-wide
//! static — [`McpRegistry`] is held in [`crate::app::AppState`] behind an
//! `Arc`, constructed once at startup and torn down once at shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rmcp::model::{CallToolRequestParam, Tool};
use rmcp::service::{RunningService, ServiceExt};
use rmcp::RoleClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::RwLock;
use utils::envelope::{ContentItem, ToolResult};

use crate::error::McpError;

#[derive(Debug, Clone, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

struct McpServerSession {
    config: McpServerConfig,
    service: RunningService<RoleClient, ()>,
}

/// Insertion-ordered registry of live MCP server sessions. Ordering matters:
/// `call_tool` dispatches to the *first* registered server exposing a given
/// tool name (§4.4).
#[derive(Default)]
pub struct McpRegistry {
    sessions: RwLock<Vec<McpServerSession>>,
}

impl McpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the packaged server config file at startup and registers every
    /// entry with `overwrite=false` (§4.4 "Lifecycle"). A missing or empty
    /// file is not an error — a container with no packaged MCP servers is
    /// valid.
    pub async fn load_packaged_config(&self, path: &std::path::Path) -> Result<(), McpError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(McpError::Transport { server: "<config>".to_string(), source: e.into() }),
        };
        let configs: Vec<McpServerConfig> = serde_json::from_str(&raw)
            .map_err(|e| McpError::Transport { server: "<config>".to_string(), source: e.into() })?;
        if configs.is_empty() {
            return Ok(());
        }
        self.add_servers(configs, false).await
    }

    /// Spawns and registers every config in `configs`. On any failure, the
    /// failing servers are torn down and the call fails enumerating their
    /// names; servers that did start successfully remain registered (§4.4).
    pub async fn add_servers(
        &self,
        configs: Vec<McpServerConfig>,
        overwrite: bool,
    ) -> Result<(), McpError> {
        let mut failed = Vec::new();
        for config in configs {
            {
                let sessions = self.sessions.read().await;
                if !overwrite && sessions.iter().any(|s| s.config.name == config.name) {
                    return Err(McpError::AlreadyRegistered(config.name));
                }
            }
            match Self::spawn_session(&config).await {
                Ok(session) => {
                    let mut sessions = self.sessions.write().await;
                    sessions.retain(|s| s.config.name != config.name);
                    sessions.push(session);
                }
                Err(e) => {
                    tracing::warn!(server = %config.name, error = %e, "failed to start MCP server");
                    failed.push(config.name);
                }
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(McpError::StartupFailed(failed))
        }
    }

    async fn spawn_session(config: &McpServerConfig) -> anyhow::Result<McpServerSession> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null());

        let mut child = command.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("failed to capture stdout for MCP server {}", config.name))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("failed to capture stdin for MCP server {}", config.name))?;

        let service = ().serve((stdout, stdin)).await?;
        Ok(McpServerSession {
            config: config.clone(),
            service,
        })
    }

    /// Per-server JSON-schema tool listing. Duplicate tool names *within a
    /// single server* are dropped with a warning; duplicates across
    /// different servers are not deduplicated (§4.4).
    pub async fn list_tools(&self) -> HashMap<String, Vec<Tool>> {
        let sessions = self.sessions.read().await;
        let mut out = HashMap::new();
        for session in sessions.iter() {
            match session.service.list_tools(None).await {
                Ok(result) => {
                    let mut seen = std::collections::HashSet::new();
                    let mut tools = Vec::new();
                    for tool in result.tools {
                        if seen.insert(tool.name.clone()) {
                            tools.push(tool);
                        } else {
                            tracing::warn!(server = %session.config.name, tool = %tool.name, "duplicate tool name, skipping");
                        }
                    }
                    out.insert(session.config.name.clone(), tools);
                }
                Err(e) => {
                    tracing::warn!(server = %session.config.name, error = %e, "failed to list tools");
                }
            }
        }
        out
    }

    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<ToolResult, McpError> {
        let sessions = self.sessions.read().await;
        for session in sessions.iter() {
            let tools = session.service.list_tools(None).await.unwrap_or_default().tools;
            if tools.iter().any(|t| t.name.as_ref() == tool_name) {
                let args_obj = arguments.as_object().cloned();
                let request = CallToolRequestParam {
                    name: tool_name.to_string().into(),
                    arguments: args_obj,
                };
                let result = session
                    .service
                    .call_tool(request)
                    .await
                    .map_err(|e| McpError::Transport { server: session.config.name.clone(), source: e.into() })?;
                let content: Vec<ContentItem> = result
                    .content
                    .into_iter()
                    .map(|c| ContentItem::text(serde_json::to_string(&c).unwrap_or_default()))
                    .collect();
                return Ok(ToolResult {
                    content,
                    is_error: result.is_error.unwrap_or(false),
                });
            }
        }
        Err(McpError::UnknownTool(tool_name.to_string()))
    }

    /// Tears down every registered server in reverse registration order
    /// (§4.4 "Lifecycle").
    pub async fn shutdown(&self) {
        let mut sessions = self.sessions.write().await;
        while let Some(session) = sessions.pop() {
            let _ = session.service.cancel().await;
        }
    }
}

#[derive(Deserialize)]
pub struct AddServersRequest {
    server_configs: Vec<McpServerConfig>,
    #[serde(default)]
    overwrite: bool,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

pub async fn add_servers(
    State(state): State<Arc<crate::app::AppState>>,
    Json(req): Json<AddServersRequest>,
) -> Response {
    match state.mcp.add_servers(req.server_configs, req.overwrite).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e @ McpError::StartupFailed(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error: e.to_string() })).into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, Json(ErrorBody { error: e.to_string() })).into_response(),
    }
}

pub async fn list_tools(State(state): State<Arc<crate::app::AppState>>) -> Json<HashMap<String, Vec<Tool>>> {
    Json(state.mcp.list_tools().await)
}

#[derive(Deserialize)]
pub struct CallToolRequest {
    tool_name: String,
    #[serde(default)]
    arguments: Value,
}

pub async fn call_tool(
    State(state): State<Arc<crate::app::AppState>>,
    Json(req): Json<CallToolRequest>,
) -> Response {
    match state.mcp.call_tool(&req.tool_name, req.arguments).await {
        Ok(result) => Json(result).into_response(),
        Err(McpError::UnknownTool(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error: e.to_string() })).into_response(),
    }
}
