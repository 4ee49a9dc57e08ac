//! The in-container control-plane binary (§4.4): runs inside every sandbox
//! image and exposes the generic/MCP/workspace/git-watcher routers built by
//! `executors`. Same startup/shutdown choreography as the manager-facade
//! binary: dotenv load, tracing init, eager config validation, graceful
//! shutdown that tears down every MCP child process before exiting.

use std::sync::Arc;

use anyhow::Context;
use executors::{build_router, AppState, RuntimeConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    utils::logging::init_tracing("info");

    let config = RuntimeConfig::from_env().context("invalid runtime configuration")?;
    let state = Arc::new(AppState::new(config).context("failed to initialize control plane state")?);

    if let Err(e) = state.mcp.load_packaged_config(&state.config.mcp_server_configs_path).await {
        tracing::warn!(error = %e, "failed to start one or more packaged MCP servers");
    }

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "sandbox control plane listening");

    let router = build_router(state.clone());
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shutting down MCP server sessions");
    state.mcp.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
