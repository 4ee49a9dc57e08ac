//! The sandbox client (§4.5): a typed HTTP client the manager and outside
//! callers use to talk to a running container's in-container control plane.
//! Every method returns a [`ToolResult`] rather than an `Err` for anything
//! that happens over the wire — transport failures become an `isError`
//! envelope, never a raised exception, so a flaky container never takes
//! down the caller's control flow.

use std::time::Duration;

use db::Container;
use serde_json::Value;
use utils::envelope::ToolResult;
use utils::token::{bearer_header, session_header_value};

const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound on every outgoing call (§5, §7): a wedged container must
/// not be able to hang a caller forever. `Container.timeout` (§3) is a
/// caller-supplied lower bound on top of this default.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// The two tools every sandbox exposes regardless of type, dispatched to
/// their own dedicated routes rather than round-tripped through
/// `/mcp/call_tool` (§4.4 "Generic router", §4.5).
const SHELL_TOOL: &str = "run_shell_command";
const IPYTHON_TOOL: &str = "run_ipython_cell";

pub struct SandboxClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    session_id: String,
}

impl SandboxClient {
    pub fn new(container: &Container) -> Self {
        let timeout = container
            .timeout
            .map(Duration::from_secs)
            .filter(|t| *t > DEFAULT_REQUEST_TIMEOUT)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: container.url.trim_end_matches('/').to_string(),
            token: container.runtime_token.clone(),
            session_id: container.session_id.clone(),
        }
    }

    fn auth_headers(&self) -> (String, String) {
        (
            bearer_header(&self.token),
            session_header_value(&self.session_id),
        )
    }

    /// Polls `GET /healthz` once per second until it returns 200 or
    /// `timeout` elapses (§4.4 "Readiness endpoint", §4.5).
    pub async fn wait_until_healthy(&self, timeout: Duration) -> Result<(), crate::error::SandboxClientError> {
        let (auth, session) = self.auth_headers();
        let start = tokio::time::Instant::now();
        loop {
            let result = self
                .http
                .get(format!("{}/healthz", self.base_url))
                .header("Authorization", &auth)
                .header("x-agentrun-session-id", &session)
                .send()
                .await;
            if let Ok(resp) = result {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            if start.elapsed() >= timeout {
                return Err(crate::error::SandboxClientError::ReadinessTimeout(timeout));
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
    }

    /// The built-in generic toolset schema every sandbox advertises, ahead
    /// of whatever MCP servers the container has additionally loaded
    /// (§4.4 "MCP router", §4.5).
    pub fn builtin_tools() -> Value {
        serde_json::json!([
            {
                "name": SHELL_TOOL,
                "description": "Runs a shell command inside the sandbox and returns stdout/stderr/returncode.",
                "input_schema": {
                    "type": "object",
                    "properties": { "command": { "type": "string" } },
                    "required": ["command"]
                }
            },
            {
                "name": IPYTHON_TOOL,
                "description": "Executes a cell of Python in the sandbox's persistent interpreter.",
                "input_schema": {
                    "type": "object",
                    "properties": { "code": { "type": "string" } },
                    "required": ["code"]
                }
            }
        ])
    }

    /// Calls a tool by name. `run_shell_command` and `run_ipython_cell` are
    /// dispatched to their dedicated routes; anything else is forwarded to
    /// `/mcp/call_tool` for the in-container MCP registry to resolve.
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> ToolResult {
        match tool_name {
            SHELL_TOOL => self.post_tool("/tools/run_shell_command", arguments).await,
            IPYTHON_TOOL => self.post_tool("/tools/run_ipython_cell", arguments).await,
            other => {
                let body = serde_json::json!({ "tool_name": other, "arguments": arguments });
                self.post_tool("/mcp/call_tool", body).await
            }
        }
    }

    pub async fn run_shell_command(&self, command: &str) -> ToolResult {
        self.call_tool(SHELL_TOOL, serde_json::json!({ "command": command })).await
    }

    pub async fn run_ipython_cell(&self, code: &str) -> ToolResult {
        self.call_tool(IPYTHON_TOOL, serde_json::json!({ "code": code })).await
    }

    async fn post_tool(&self, path: &str, body: Value) -> ToolResult {
        let (auth, session) = self.auth_headers();
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("Authorization", &auth)
            .header("x-agentrun-session-id", &session)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => return ToolResult::transport_error(e),
        };

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return ToolResult::transport_error(format!("sandbox returned {status}: {text}"));
        }

        match response.json::<ToolResult>().await {
            Ok(result) => result,
            Err(e) => ToolResult::transport_error(format!("could not decode sandbox response: {e}")),
        }
    }
}
