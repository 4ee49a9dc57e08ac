//! The in-container control plane (§4.4): the HTTP surface every sandbox
//! image exposes. Four routers — generic, MCP, workspace, git watcher —
//! plus the bearer-token auth middleware and a `/healthz` endpoint, mounted
//! into one `axum::Router` by [`app::build_router`].

pub mod app;
pub mod auth;
pub mod cell;
pub mod config;
pub mod error;
pub mod generic;
pub mod git_watcher;
pub mod mcp;
pub mod workspace;

pub use app::{AppState, build_router};
pub use config::RuntimeConfig;
