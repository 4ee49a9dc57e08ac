//! The driver registry (§9 "Lazy plugin loading"): maps the configured
//! [`utils::config::ContainerDeployment`] to a concrete
//! `Arc<dyn BackendDriver>` once at process startup. An unavailable or
//! misconfigured backend fails here — at startup — never lazily on first
//! request.

use std::sync::Arc;

use db::collections::{SharedSet, in_memory::InMemorySet, redis_backed::RedisSet};
use deployment::{BackendDriver, PortArbiter};
use local_deployment::{ClusterDriver, LocalDockerDriver};
use remote::{ManagedRuntimeDriver, VendorARuntime, VendorBRuntime};
use remote::vendor_a::VendorAConfig;
use remote::vendor_b::VendorBConfig;
use utils::config::{ContainerDeployment, ManagerConfig};

use crate::error::ManagerError;

/// Builds the shared port set backend selected by `config` (§4.3): in-process
/// when no shared store is configured, Redis when `SANDBOX_REDIS_ENABLED=true`.
pub async fn build_port_set(config: &ManagerConfig) -> Result<Arc<dyn SharedSet>, ManagerError> {
    match &config.redis {
        Some(redis_cfg) => {
            let conn = db::collections::redis_backed::connect(&redis_cfg.connection_url())
                .await
                .map_err(ManagerError::Collection)?;
            Ok(Arc::new(RedisSet::new(conn)))
        }
        None => Ok(Arc::new(InMemorySet::new())),
    }
}

/// Builds the single backend driver selected by `SANDBOX_CONTAINER_DEPLOYMENT`.
/// Only the selected backend's prerequisites are validated (already done
/// eagerly by `ManagerConfig::from_env`); this function turns that
/// configuration into a live driver or fails with a descriptive error.
pub async fn build_driver(
    config: &ManagerConfig,
    arbiter: Arc<PortArbiter>,
) -> Result<Arc<dyn BackendDriver>, ManagerError> {
    match config.container_deployment {
        ContainerDeployment::Docker => {
            let driver = LocalDockerDriver::connect(arbiter, None)
                .map_err(ManagerError::Driver)?;
            Ok(Arc::new(driver))
        }
        ContainerDeployment::K8s => {
            let k8s = config
                .k8s
                .as_ref()
                .ok_or_else(|| ManagerError::NoDriver("k8s".to_string()))?;
            let driver = ClusterDriver::connect(
                k8s.namespace.clone(),
                arbiter,
                deployment::ImageRewriteTable::new(),
            )
            .await
            .map_err(ManagerError::Driver)?;
            Ok(Arc::new(driver))
        }
        ContainerDeployment::AgentRun => {
            let cfg = config
                .agentrun
                .as_ref()
                .ok_or_else(|| ManagerError::NoDriver("agentrun".to_string()))?;
            let vendor = VendorARuntime::new(VendorAConfig {
                access_key_id: cfg.access_key_id.clone(),
                access_key_secret: cfg.access_key_secret.clone(),
                account_id: cfg.account_id.clone(),
                region_id: cfg.region_id.clone(),
                cpu: cfg.cpu,
                memory_mb: cfg.memory_mb,
                prefix: cfg.prefix.clone(),
                api_base: cfg.api_base.clone(),
            });
            Ok(Arc::new(ManagedRuntimeDriver::new(vendor)))
        }
        ContainerDeployment::Fc => {
            let cfg = config
                .fc
                .as_ref()
                .ok_or_else(|| ManagerError::NoDriver("fc".to_string()))?;
            let vendor = VendorBRuntime::new(VendorBConfig {
                api_key: cfg.api_key.clone(),
                api_base: cfg.api_base.clone(),
            });
            Ok(Arc::new(ManagedRuntimeDriver::new(vendor)))
        }
    }
}
