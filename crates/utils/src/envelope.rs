//! The wire envelope every tool call returns, in or out of a container
//! (§6 "Response envelope for tool calls"). Shared between `executors`
//! (who produce it inside a sandbox) and `services::sandbox_client` (who
//! consume it and also synthesize it for transport failures, §4.5).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
            description: None,
        }
    }

    pub fn described(text: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
            description: Some(description.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolResult {
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(content: Vec<ContentItem>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(content: Vec<ContentItem>) -> Self {
        Self {
            content,
            is_error: true,
        }
    }

    /// Synthesizes the envelope for a transport-level failure, matching the
    /// sandbox client's never-raise contract (§4.5, §7).
    pub fn transport_error(err: impl std::fmt::Display) -> Self {
        Self::error(vec![ContentItem::text(err.to_string())])
    }

    /// Builds the `run_shell_command` / `run_ipython_cell` response shape:
    /// stdout, stderr, and a returncode entry, with `isError` iff stderr is
    /// non-empty (§4.4, unless overridden — see `treat_stderr_as_error`).
    pub fn from_process_output(stdout: &str, stderr: &str, returncode: i32) -> Self {
        Self {
            content: vec![
                ContentItem::described(stdout, "stdout"),
                ContentItem::described(stderr, "stderr"),
                ContentItem::described(returncode.to_string(), "returncode"),
            ],
            is_error: !stderr.is_empty(),
        }
    }
}
