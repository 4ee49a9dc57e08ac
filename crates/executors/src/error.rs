//! Typed errors for the in-container control plane. Every router maps
//! these to an HTTP status explicitly in its own `IntoResponse` impl
//! rather than sharing one blanket mapping, since each router's error
//! space means something different (a workspace escape is a 403, an
//! unknown MCP server is a 404, a spawn failure is a 500).

#[derive(Debug, thiserror::Error)]
pub enum RuntimeConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("path escapes the workspace root")]
    PathEscape,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("directory not empty, pass recursive=true to delete it")]
    DirectoryNotEmpty,
}

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("unknown MCP server: {0}")]
    UnknownServer(String),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("failed to start server(s): {0:?}")]
    StartupFailed(Vec<String>),
    #[error("server already registered: {0} (pass overwrite=true to replace it)")]
    AlreadyRegistered(String),
    #[error("transport error talking to server {server}: {source}")]
    Transport {
        server: String,
        source: anyhow::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum GitWatcherError {
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error("commit {0} not found")]
    UnknownCommit(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CellError {
    #[error("code must not be empty")]
    EmptyCode,
    #[error("interpreter error: {0}")]
    Eval(String),
}
