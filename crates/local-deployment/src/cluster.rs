//! The cluster driver (§4.1 "Cluster driver specifics"): backed by `kube`/
//! `k8s-openapi`, creating a pod-equivalent plus a multi-port NodePort
//! service-equivalent per sandbox. Host resolution prefers the node's
//! external IP, falling back to internal IP (§4.1).

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use db::{DriverStatus, PortEntry};
use deployment::{BackendDriver, CreateOutcome, CreateSpec, DriverError, InspectResult, PortArbiter};
use k8s_openapi::api::core::v1::{
    Container as K8sContainer, EnvVar, Node, Pod, PodSpec, Service, ServicePort, ServiceSpec,
    Toleration, Volume, VolumeMount,
};
use kube::{
    Api, Client,
    api::{DeleteParams, ObjectMeta, PostParams},
};
use serde_json::Value;

/// Extra scheduling knobs the manager can pass through `CreateSpec.
/// runtime_config` (§4.1): image-pull policy, resource requests/limits,
/// node selector, tolerations, image-pull secrets.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct K8sRuntimeConfig {
    pub image_pull_policy: Option<String>,
    pub cpu_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_request: Option<String>,
    pub memory_limit: Option<String>,
    pub node_selector: BTreeMap<String, String>,
    pub tolerations: Vec<TolerationSpec>,
    pub image_pull_secrets: Vec<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TolerationSpec {
    pub key: Option<String>,
    pub operator: Option<String>,
    pub value: Option<String>,
    pub effect: Option<String>,
}

pub struct ClusterDriver {
    client: Client,
    namespace: String,
    arbiter: Arc<PortArbiter>,
    rewrite: deployment::ImageRewriteTable,
}

impl ClusterDriver {
    pub async fn connect(
        namespace: impl Into<String>,
        arbiter: Arc<PortArbiter>,
        rewrite: deployment::ImageRewriteTable,
    ) -> Result<Self, DriverError> {
        let client = Client::try_default()
            .await
            .map_err(|e| DriverError::Transport(format!("could not build a Kubernetes client: {e}")))?;
        Ok(Self {
            client,
            namespace: namespace.into(),
            arbiter,
            rewrite,
        })
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    /// Readiness = phase `Running` **and** every container status ready
    /// (§4.1).
    fn pod_status(pod: &Pod) -> DriverStatus {
        let Some(status) = &pod.status else {
            return DriverStatus::Unknown;
        };
        match status.phase.as_deref() {
            Some("Running") => {
                let all_ready = status
                    .container_statuses
                    .as_ref()
                    .map(|statuses| statuses.iter().all(|c| c.ready))
                    .unwrap_or(false);
                if all_ready {
                    DriverStatus::Running
                } else {
                    DriverStatus::Creating
                }
            }
            Some("Pending") => DriverStatus::Creating,
            Some("Succeeded") | Some("Failed") => DriverStatus::Exited,
            _ => DriverStatus::Unknown,
        }
    }

    async fn resolve_node_host(&self, node_name: &str) -> Result<String, DriverError> {
        let node = self
            .nodes()
            .get(node_name)
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        let addresses = node
            .status
            .and_then(|s| s.addresses)
            .unwrap_or_default();
        let external = addresses.iter().find(|a| a.type_ == "ExternalIP");
        let internal = addresses.iter().find(|a| a.type_ == "InternalIP");
        external
            .or(internal)
            .map(|a| a.address.clone())
            .ok_or_else(|| DriverError::Transport(format!("node {node_name} has no usable address")))
    }
}

#[async_trait]
impl BackendDriver for ClusterDriver {
    fn name(&self) -> &'static str {
        "k8s"
    }

    async fn create(&self, spec: CreateSpec) -> Result<Option<CreateOutcome>, DriverError> {
        let runtime_config: K8sRuntimeConfig =
            serde_json::from_value(spec.runtime_config.clone()).unwrap_or_default();

        let image = self.rewrite.rewrite(&spec.image);

        let claimed = match self.arbiter.claim(spec.requested_ports.len().max(1)).await {
            Ok(ports) => ports,
            Err(e) => return Err(e),
        };

        let env: Vec<EnvVar> = spec
            .environment
            .iter()
            .map(|(k, v)| EnvVar {
                name: k.clone(),
                value: Some(v.clone()),
                ..Default::default()
            })
            .collect();

        let volume_mounts: Vec<VolumeMount> = spec
            .volumes
            .values()
            .enumerate()
            .map(|(i, container_path)| VolumeMount {
                name: format!("vol-{i}"),
                mount_path: container_path.clone(),
                ..Default::default()
            })
            .collect();
        let volumes: Vec<Volume> = spec
            .volumes
            .keys()
            .enumerate()
            .map(|(i, host_path)| Volume {
                name: format!("vol-{i}"),
                host_path: Some(k8s_openapi::api::core::v1::HostPathVolumeSource {
                    path: host_path.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect();

        let tolerations: Vec<Toleration> = runtime_config
            .tolerations
            .iter()
            .map(|t| Toleration {
                key: t.key.clone(),
                operator: t.operator.clone(),
                value: t.value.clone(),
                effect: t.effect.clone(),
                ..Default::default()
            })
            .collect();

        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(spec.name.clone()),
                labels: Some(BTreeMap::from([(
                    "agentscope.io/sandbox".to_string(),
                    spec.name.clone(),
                )])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![K8sContainer {
                    name: "sandbox".to_string(),
                    image: Some(image.clone()),
                    image_pull_policy: runtime_config.image_pull_policy.clone(),
                    env: Some(env),
                    volume_mounts: Some(volume_mounts),
                    ports: Some(
                        spec.requested_ports
                            .iter()
                            .map(|p| k8s_openapi::api::core::v1::ContainerPort {
                                container_port: *p as i32,
                                ..Default::default()
                            })
                            .collect(),
                    ),
                    ..Default::default()
                }],
                volumes: Some(volumes),
                node_selector: Some(runtime_config.node_selector.clone()),
                tolerations: Some(tolerations),
                image_pull_secrets: Some(
                    runtime_config
                        .image_pull_secrets
                        .iter()
                        .map(|s| k8s_openapi::api::core::v1::LocalObjectReference { name: s.clone() })
                        .collect(),
                ),
                restart_policy: Some("Never".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created_pod = match self.pods().create(&PostParams::default(), &pod).await {
            Ok(p) => p,
            Err(e) => {
                self.arbiter.release(&claimed).await;
                tracing::warn!("pod create failed for {}: {e}", spec.name);
                return Ok(None);
            }
        };

        let service = Service {
            metadata: ObjectMeta {
                name: Some(format!("{}-svc", spec.name)),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("NodePort".to_string()),
                selector: Some(BTreeMap::from([(
                    "agentscope.io/sandbox".to_string(),
                    spec.name.clone(),
                )])),
                ports: Some(
                    spec.requested_ports
                        .iter()
                        .zip(claimed.iter())
                        .map(|(container_port, node_port)| ServicePort {
                            port: *container_port as i32,
                            target_port: Some(
                                k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(
                                    *container_port as i32,
                                ),
                            ),
                            node_port: Some(*node_port as i32),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        };

        if let Err(e) = self.services().create(&PostParams::default(), &service).await {
            let _ = self.pods().delete(&spec.name, &DeleteParams::default()).await;
            self.arbiter.release(&claimed).await;
            tracing::warn!("service create failed for {}: {e}", spec.name);
            return Ok(None);
        }

        let node_name = created_pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone());
        let host = match node_name {
            Some(name) => self
                .resolve_node_host(&name)
                .await
                .unwrap_or_else(|_| name.clone()),
            None => "pending".to_string(),
        };

        Ok(Some(CreateOutcome {
            handle: spec.name.clone(),
            host_ports: claimed.into_iter().map(PortEntry::Port).collect(),
            host,
            protocol: "http".to_string(),
            path: None,
        }))
    }

    async fn start(&self, _handle: &str) -> Result<bool, DriverError> {
        // Pods are started at creation time; there is no separate start op.
        Ok(true)
    }

    async fn stop(&self, handle: &str, _grace_period: Option<Duration>) -> Result<bool, DriverError> {
        match self.pods().delete(handle, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(true),
            Err(e) => Err(DriverError::Transport(e.to_string())),
        }
    }

    async fn remove(&self, handle: &str, force: bool) -> Result<bool, DriverError> {
        let mut dp = DeleteParams::default();
        if force {
            dp = DeleteParams::background();
        }

        // The service is always removed first (§4.1 "remove always removes
        // the associated service first").
        let svc_name = format!("{handle}-svc");
        let svc_ports: Vec<u16> = match self.services().get(&svc_name).await {
            Ok(svc) => svc
                .spec
                .and_then(|s| s.ports)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|p| p.node_port.map(|n| n as u16))
                .collect(),
            Err(_) => Vec::new(),
        };
        let _ = self.services().delete(&svc_name, &dp).await;

        let result = self.pods().delete(handle, &dp).await;
        self.arbiter.release(&svc_ports).await;

        match result {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(true),
            Err(e) => Err(DriverError::Transport(e.to_string())),
        }
    }

    async fn inspect(&self, handle: &str) -> Result<InspectResult, DriverError> {
        let pod = self
            .pods()
            .get(handle)
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        let status = Self::pod_status(&pod);
        Ok(InspectResult {
            status,
            attributes: serde_json::to_value(&pod).unwrap_or(Value::Null),
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
            tokio::time::sleep(Duration::from_millis(1000)).await;
        }
    }
}
