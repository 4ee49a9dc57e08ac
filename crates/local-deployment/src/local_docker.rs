//! The local-daemon driver (§4.1 "Local-daemon driver specifics"): backed
//! by `bollard::Docker`, talking to whatever `DOCKER_HOST` (or the default
//! platform socket) resolves to.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bollard::{
    Docker,
    container::{
        Config as ContainerConfig, CreateContainerOptions, RemoveContainerOptions,
        StopContainerOptions,
    },
    image::CreateImageOptions,
    secret::{HostConfig, PortBinding},
};
use db::{DriverStatus, PortEntry};
use deployment::{BackendDriver, CreateOutcome, CreateSpec, DriverError, InspectResult, PortArbiter};
use futures::TryStreamExt;

pub struct LocalDockerDriver {
    docker: Docker,
    arbiter: Arc<PortArbiter>,
    /// primary registry -> mirror registry, tried in that order after the
    /// local cache misses (§4.1).
    mirror_registry: Option<String>,
}

impl LocalDockerDriver {
    /// Connects using the environment's Docker configuration (`DOCKER_HOST`,
    /// TLS certs, etc., exactly as the `docker` CLI would). Surfaces a
    /// helpful, actionable error rather than a bare `bollard` passthrough,
    /// matching the original's connection-failure texture.
    pub fn connect(arbiter: Arc<PortArbiter>, mirror_registry: Option<String>) -> Result<Self, DriverError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            DriverError::Transport(format!(
                "could not connect to the Docker daemon ({e}); is it running, and is DOCKER_HOST set correctly?"
            ))
        })?;
        Ok(Self {
            docker,
            arbiter,
            mirror_registry,
        })
    }

    /// Pull-fallback order: local cache → primary registry → mirror
    /// registry, with a retag after a mirror pull so future references
    /// resolve locally by the canonical name (§4.1).
    async fn ensure_image(&self, image: &str) -> Result<(), DriverError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        let pull_primary = self
            .docker
            .create_image(Some(CreateImageOptions { from_image: image, ..Default::default() }), None, None)
            .try_collect::<Vec<_>>()
            .await;

        if pull_primary.is_ok() {
            return Ok(());
        }

        let Some(mirror) = &self.mirror_registry else {
            return Err(DriverError::ImagePull {
                image: image.to_string(),
                reason: "primary registry pull failed and no mirror is configured".to_string(),
            });
        };

        let mirrored_ref = format!("{mirror}/{image}");
        self.docker
            .create_image(Some(CreateImageOptions { from_image: mirrored_ref.as_str(), ..Default::default() }), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| DriverError::ImagePull {
                image: image.to_string(),
                reason: format!("mirror pull of {mirrored_ref} also failed: {e}"),
            })?;

        self.docker
            .tag_image(&mirrored_ref, Some(bollard::image::TagImageOptions {
                repo: image.split(':').next().unwrap_or(image),
                tag: image.split(':').nth(1).unwrap_or("latest"),
            }))
            .await
            .map_err(|e| DriverError::Transport(format!("retag after mirror pull failed: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl BackendDriver for LocalDockerDriver {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn create(&self, spec: CreateSpec) -> Result<Option<CreateOutcome>, DriverError> {
        if let Err(e) = self.ensure_image(&spec.image).await {
            tracing::warn!(image = %spec.image, "image pull failed: {e}");
            return Ok(None);
        }

        let claimed_ports = match self.arbiter.claim(spec.requested_ports.len().max(1)).await {
            Ok(ports) => ports,
            Err(e) => {
                tracing::warn!("port claim failed: {e}");
                return Err(e);
            }
        };

        let mut port_bindings = HashMap::new();
        let mut exposed_ports = HashMap::new();
        for (container_port, host_port) in spec.requested_ports.iter().zip(claimed_ports.iter()) {
            let key = format!("{container_port}/tcp");
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(host_port.to_string()),
                }]),
            );
        }

        let env: Vec<String> = spec
            .environment
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let binds: Vec<String> = spec
            .volumes
            .iter()
            .map(|(host, container)| format!("{host}:{container}"))
            .collect();

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let config = ContainerConfig {
            image: Some(spec.image.clone()),
            env: Some(env),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                binds: Some(binds),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| {
                tracing::warn!("container create failed: {e}");
                e
            });

        let created = match created {
            Ok(c) => c,
            Err(_) => {
                self.arbiter.release(&claimed_ports).await;
                return Ok(None);
            }
        };

        if let Err(e) = self.docker.start_container::<String>(&created.id, None).await {
            self.arbiter.release(&claimed_ports).await;
            tracing::warn!("container start failed: {e}");
            return Ok(None);
        }

        Ok(Some(CreateOutcome {
            handle: created.id,
            host_ports: claimed_ports.into_iter().map(PortEntry::Port).collect(),
            host: "127.0.0.1".to_string(),
            protocol: "http".to_string(),
            path: None,
        }))
    }

    async fn start(&self, handle: &str) -> Result<bool, DriverError> {
        self.docker
            .start_container::<String>(handle, None)
            .await
            .map(|_| true)
            .or_else(|e| match e {
                bollard::errors::Error::DockerResponseServerError { status_code: 304, .. } => Ok(true),
                other => Err(DriverError::Transport(other.to_string())),
            })
    }

    async fn stop(&self, handle: &str, grace_period: Option<Duration>) -> Result<bool, DriverError> {
        let options = grace_period.map(|d| StopContainerOptions { t: d.as_secs() as i64 });
        match self.docker.stop_container(handle, options).await {
            Ok(()) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 304, .. }) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(true),
            Err(e) => Err(DriverError::Transport(e.to_string())),
        }
    }

    async fn remove(&self, handle: &str, force: bool) -> Result<bool, DriverError> {
        let ports_to_release = match self.docker.inspect_container(handle, None).await {
            Ok(inspect) => inspect
                .network_settings
                .and_then(|ns| ns.ports)
                .map(|ports| {
                    ports
                        .values()
                        .flatten()
                        .flatten()
                        .filter_map(|b| b.host_port.as_ref().and_then(|p| p.parse::<u16>().ok()))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };

        let result = self
            .docker
            .remove_container(
                handle,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await;

        self.arbiter.release(&ports_to_release).await;

        match result {
            Ok(()) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(true),
            Err(e) => Err(DriverError::Transport(e.to_string())),
        }
    }

    async fn inspect(&self, handle: &str) -> Result<InspectResult, DriverError> {
        let inspect = self
            .docker
            .inspect_container(handle, None)
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;

        let status = match inspect.state.as_ref().and_then(|s| s.status) {
            Some(bollard::secret::ContainerStateStatusEnum::RUNNING) => DriverStatus::Running,
            Some(bollard::secret::ContainerStateStatusEnum::CREATED) => DriverStatus::Creating,
            Some(bollard::secret::ContainerStateStatusEnum::EXITED) => DriverStatus::Exited,
            _ => DriverStatus::Unknown,
        };

        Ok(InspectResult {
            status,
            attributes: serde_json::to_value(&inspect).unwrap_or(serde_json::Value::Null),
        })
    }

    async fn wait_for_ready(&self, handle: &str, timeout: Duration) -> Result<(), DriverError> {
        let start = tokio::time::Instant::now();
        loop {
            let result = self.inspect(handle).await?;
            if result.status == DriverStatus::Running {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(DriverError::ReadinessTimeout {
                    handle: handle.to_string(),
                    last_status: result.status,
                });
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}
