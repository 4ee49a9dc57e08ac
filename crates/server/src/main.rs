//! The manager-facade binary (§4.6, §4.7): wires `SandboxManager` and
//! `TrainingEnvironmentService` into one process behind one HTTP server,
//! following the same startup/shutdown choreography as the in-container
//! runtime binary — dotenv load, tracing init, eager config validation,
//! background task spawn, graceful shutdown on Ctrl+C/SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use deployment::PortArbiter;
use services::driver_registry::{build_driver, build_port_set};
use services::facade::{self, AppState};
use services::manager::SandboxManager;
use services::mount::MountProvisioner;
use services::training::environment::EnvironmentRegistry;
use services::training::service::TrainingEnvironmentService;
use services::training::facade as training_facade;
use utils::config::ManagerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    utils::logging::init_tracing("info");

    let config = Arc::new(ManagerConfig::from_env().context("invalid manager configuration")?);

    let port_set = build_port_set(&config).await.context("failed to build port set")?;
    let arbiter = Arc::new(PortArbiter::new(port_set, config.port_range));
    let driver = build_driver(&config, arbiter).await.context("failed to build backend driver")?;
    let mounts = MountProvisioner::from_config(&config).context("failed to build mount provisioner")?;

    let manager = Arc::new(if config.redis_enabled {
        let redis_cfg = config
            .redis
            .as_ref()
            .context("SANDBOX_REDIS_ENABLED=true but no redis configuration was loaded")?;
        let pool_conn = db::collections::redis_backed::connect(&redis_cfg.connection_url())
            .await
            .context("failed to connect to redis for the warm pool")?;
        let sessions_conn = db::collections::redis_backed::connect(&redis_cfg.connection_url())
            .await
            .context("failed to connect to redis for the session index")?;
        SandboxManager::with_shared_collections(
            config.clone(),
            driver,
            mounts,
            Arc::new(db::collections::redis_backed::RedisQueue::new(pool_conn)),
            Arc::new(db::collections::redis_backed::RedisMap::new(sessions_conn)),
        )
    } else {
        SandboxManager::new(config.clone(), driver, mounts)
    });

    // Pre-warm the pool for every configured DEFAULT_SANDBOX_TYPE (§8 E2E
    // scenario 1). Non-blocking: the refill tasks run in the background and
    // don't delay the listener coming up.
    manager.seed_default_pools();

    let env_registry = Arc::new(EnvironmentRegistry::with_builtins());
    let training_service = Arc::new(TrainingEnvironmentService::new(
        env_registry,
        config.training.max_idle_secs,
    ));
    let _reaper = training_service.spawn_reaper(config.training.cleanup_interval_secs);

    let manager_router = facade::router(AppState {
        manager: manager.clone(),
        config: config.clone(),
    });
    let training_router = training_facade::router(training_service);

    // Flat merge: the two route tables' paths don't overlap.
    let app = axum::Router::new().merge(manager_router).merge(training_router);

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "sandbox manager listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if config.http.auto_cleanup {
        tracing::info!("auto-cleanup enabled, releasing every tracked sandbox");
        manager.cleanup().await;
    }

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
