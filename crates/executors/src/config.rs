//! `RuntimeConfig`: the small set of environment variables the in-container
//! process reads at startup. Grounded on `utils::config::ManagerConfig`'s
//! eager `from_env` pattern — a misconfigured container fails at boot, not
//! on the first request.

use std::path::PathBuf;

use crate::error::RuntimeConfigError;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token injected by the backend driver at container creation;
    /// every request to this process must present it.
    pub secret_token: String,
    pub workspace_root: PathBuf,
    /// Packaged MCP server configuration, loaded with `overwrite=false` at
    /// startup.
    pub mcp_server_configs_path: PathBuf,
}

fn env_or(var: &'static str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, RuntimeConfigError> {
        let secret_token =
            std::env::var("SECRET_TOKEN").map_err(|_| RuntimeConfigError::InvalidValue {
                var: "SECRET_TOKEN",
                reason: "must be set by the backend driver at container creation".to_string(),
            })?;

        let port: u16 = env_or("PORT", "8000")
            .parse()
            .map_err(|_| RuntimeConfigError::InvalidValue {
                var: "PORT",
                reason: "must be a u16".to_string(),
            })?;

        Ok(RuntimeConfig {
            host: env_or("HOST", "0.0.0.0"),
            port,
            secret_token,
            workspace_root: PathBuf::from(env_or("WORKSPACE_DIR", "/workspace")),
            mcp_server_configs_path: PathBuf::from(env_or(
                "MCP_SERVER_CONFIGS_PATH",
                "mcp_server_configs.json",
            )),
        })
    }
}
