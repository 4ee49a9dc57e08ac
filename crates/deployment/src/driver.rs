//! The backend driver contract (§4.1): the uniform five-op interface every
//! execution substrate (local Docker daemon, Kubernetes, the two managed
//! serverless runtimes) implements. The manager only ever talks to
//! `Arc<dyn BackendDriver>`; it never knows which concrete backend is
//! underneath.

use std::collections::HashMap;

use async_trait::async_trait;
use db::DriverStatus;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("transport error talking to backend: {0}")]
    Transport(String),
    #[error("readiness timeout waiting for {handle}; last status: {last_status:?}")]
    ReadinessTimeout {
        handle: String,
        last_status: DriverStatus,
    },
    #[error("not enough free ports in configured range: wanted {wanted}, found {found}")]
    NotEnoughPorts { wanted: usize, found: usize },
    #[error("image pull failed for {image}: {reason}")]
    ImagePull { image: String, reason: String },
}

/// Everything a driver needs to create a container, already rewritten to a
/// concrete backend image and with the port-arbiter wired in by the caller
/// (the manager itself claims ports before calling `create`, per §4.1's
/// "the driver must not return a port it did not first claim").
#[derive(Debug, Clone)]
pub struct CreateSpec {
    pub image: String,
    pub name: String,
    pub requested_ports: Vec<u16>,
    pub volumes: HashMap<String, String>,
    pub environment: HashMap<String, String>,
    pub runtime_config: Value,
}

/// What a driver hands back on successful creation (§4.1): the backend
/// handle, the externally reachable host ports, the host to connect to,
/// and the protocol (`http` or `https`).
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub handle: String,
    pub host_ports: Vec<db::PortEntry>,
    pub host: String,
    pub protocol: String,
    /// Explicit path for path-routed managed-runtime backends (§9).
    pub path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InspectResult {
    pub status: DriverStatus,
    pub attributes: Value,
}

/// The five-op contract (§4.1). `create` returns `Ok(None)` — not an `Err`
/// — for expected-degraded-mode failures (image pull, resource exhaustion,
/// backend API error); genuinely exceptional failures (the backend is
/// unreachable at all) are `Err(DriverError::Transport)`.
#[async_trait]
pub trait BackendDriver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create(&self, spec: CreateSpec) -> Result<Option<CreateOutcome>, DriverError>;

    async fn start(&self, handle: &str) -> Result<bool, DriverError>;

    /// Idempotent: stopping an already-stopped container is success.
    async fn stop(&self, handle: &str, grace_period: Option<std::time::Duration>) -> Result<bool, DriverError>;

    /// Must release every port reservation this driver claimed for
    /// `handle` before returning.
    async fn remove(&self, handle: &str, force: bool) -> Result<bool, DriverError>;

    async fn inspect(&self, handle: &str) -> Result<InspectResult, DriverError>;

    /// Drivers that cannot guarantee readiness synchronously from `create`
    /// must implement this and the manager calls it before returning the
    /// container to the caller (§4.1 "Readiness").
    async fn wait_for_ready(
        &self,
        handle: &str,
        timeout: std::time::Duration,
    ) -> Result<(), DriverError>;
}
