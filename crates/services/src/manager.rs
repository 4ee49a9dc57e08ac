//! The sandbox manager (§4.2): allocation policy, per-type warm pool,
//! reclamation, mount provisioning, and the session→container index. The
//! heart of the system — everything else in this crate either feeds it
//! (the driver registry, the port arbiter) or rides on top of it (the HTTP
//! facade, the sandbox client).

use std::{collections::HashMap, sync::Arc, time::Duration};

use dashmap::DashMap;
use db::collections::{SharedMap, SharedQueue, in_memory::InMemoryMap, in_memory::InMemoryQueue};
use db::{Container, SandboxType};
use deployment::{BackendDriver, CreateSpec};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use utils::config::ManagerConfig;
use utils::token::generate_runtime_token;

use crate::error::ManagerError;
use crate::mount::MountProvisioner;

/// Container port the in-container control plane listens on. Requested of
/// every backend driver at creation time (§4.2).
pub const CONTROL_PLANE_PORT: u16 = 8000;

/// Default upper bound for `wait_for_ready` (§4.1 "Readiness",
/// §5 "Cancellation & timeouts").
const READINESS_TIMEOUT: Duration = Duration::from_secs(60);

const SESSIONS_KEY: &str = "sessions";

fn pool_key(sandbox_type: &SandboxType) -> String {
    format!("pool:{sandbox_type}")
}

pub struct SandboxManager {
    config: Arc<ManagerConfig>,
    driver: Arc<dyn BackendDriver>,
    pool: Arc<dyn SharedQueue<Container>>,
    sessions: Arc<dyn SharedMap<Container>>,
    mounts: MountProvisioner,
    readonly_mounts: HashMap<String, String>,
    /// Per-session single-flight lock so two concurrent `connect` calls for
    /// the same `session_id` never race a duplicate create (§5 "Ordering
    /// guarantees").
    inflight: DashMap<String, Arc<AsyncMutex<()>>>,
    /// Per-type lock serializing a pool's "read current length, then fill
    /// up to target" sequence, so two refills spawned back-to-back (e.g.
    /// `seed_default_pools` followed by a `connect` miss) can't both read
    /// the same starting length and jointly overshoot `pool_size` (§5 "Pool
    /// operations ... are the only critical sections", §8 invariant 3).
    refill_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    refill_tasks: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl SandboxManager {
    pub fn new(
        config: Arc<ManagerConfig>,
        driver: Arc<dyn BackendDriver>,
        mounts: MountProvisioner,
    ) -> Self {
        let readonly_mounts = config.readonly_mounts.clone();
        Self {
            config,
            driver,
            pool: Arc::new(InMemoryQueue::new()),
            sessions: Arc::new(InMemoryMap::new()),
            mounts,
            readonly_mounts,
            inflight: DashMap::new(),
            refill_locks: DashMap::new(),
            refill_tasks: AsyncMutex::new(Vec::new()),
        }
    }

    /// Constructs a manager backed by shared (Redis) collections instead of
    /// the in-process defaults, for multi-worker deployments (§4.3).
    pub fn with_shared_collections(
        config: Arc<ManagerConfig>,
        driver: Arc<dyn BackendDriver>,
        mounts: MountProvisioner,
        pool: Arc<dyn SharedQueue<Container>>,
        sessions: Arc<dyn SharedMap<Container>>,
    ) -> Self {
        let readonly_mounts = config.readonly_mounts.clone();
        Self {
            config,
            driver,
            pool,
            sessions,
            mounts,
            readonly_mounts,
            inflight: DashMap::new(),
            refill_locks: DashMap::new(),
            refill_tasks: AsyncMutex::new(Vec::new()),
        }
    }

    fn session_lock(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        self.inflight
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn refill_lock(&self, pool_key: &str) -> Arc<AsyncMutex<()>> {
        self.refill_locks
            .entry(pool_key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// `connect(type, session_id)` (§4.2): idempotent attach if already
    /// indexed, else pop from the warm pool, else create fresh. Triggers a
    /// non-blocking pool refill after returning.
    pub async fn connect(
        &self,
        sandbox_type: SandboxType,
        session_id: &str,
        version: Option<String>,
    ) -> Result<Container, ManagerError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.sessions.get(SESSIONS_KEY, session_id).await? {
            return Ok(existing);
        }

        let container = if let Some(mut pooled) = self.pool.pop(&pool_key(&sandbox_type)).await? {
            pooled.session_id = session_id.to_string();
            self.sessions.set(SESSIONS_KEY, session_id, pooled.clone()).await?;
            pooled
        } else {
            let created = self.create_container(&sandbox_type, session_id, version).await?;
            self.sessions.set(SESSIONS_KEY, session_id, created.clone()).await?;
            created
        };

        self.spawn_refill(sandbox_type);
        Ok(container)
    }

    async fn create_container(
        &self,
        sandbox_type: &SandboxType,
        session_id: &str,
        version: Option<String>,
    ) -> Result<Container, ManagerError> {
        let image = match &version {
            Some(v) => {
                let base = sandbox_type.canonical_image();
                let without_tag = base.split(':').next().unwrap_or(&base);
                format!("{without_tag}:{v}")
            }
            None => sandbox_type.canonical_image(),
        };

        let runtime_token = generate_runtime_token();
        let mut environment = HashMap::new();
        environment.insert("SECRET_TOKEN".to_string(), runtime_token.clone());

        let (mount_dir, storage_path) = self.mounts.provision(session_id).await?;

        let mut volumes = HashMap::new();
        if let Some(dir) = &mount_dir {
            volumes.insert(dir.clone(), "/workspace".to_string());
        }
        for (host_path, container_path) in &self.readonly_mounts {
            volumes.insert(host_path.clone(), container_path.clone());
        }

        let name = format!(
            "{}-{}",
            truncate(&self.config.container_prefix_key, utils::config::MAX_PREFIX_LEN),
            uuid::Uuid::new_v4()
        );

        let spec = CreateSpec {
            image: image.clone(),
            name: name.clone(),
            requested_ports: vec![CONTROL_PLANE_PORT],
            volumes,
            environment,
            runtime_config: serde_json::Value::Null,
        };

        let outcome = self
            .driver
            .create(spec)
            .await?
            .ok_or_else(|| ManagerError::CreationFailed {
                backend: self.driver.name().to_string(),
                image: image.clone(),
            })?;

        if let Err(e) = self.driver.wait_for_ready(&outcome.handle, READINESS_TIMEOUT).await {
            // Readiness never arrived: tear the half-created container back
            // down so its port reservations don't leak (§7, §8 "no leaked
            // port reservations").
            if let Err(remove_err) = self.driver.remove(&outcome.handle, true).await {
                tracing::warn!(
                    handle = %outcome.handle,
                    "failed to remove container after readiness timeout: {remove_err}"
                );
            }
            return Err(e.into());
        }

        let url = match &outcome.path {
            Some(path) => format!("{}://{}/{}", outcome.protocol, outcome.host, path),
            None => {
                let port = outcome
                    .host_ports
                    .iter()
                    .find_map(|p| match p {
                        db::PortEntry::Port(n) => Some(*n),
                        db::PortEntry::PathRouted(_) => None,
                    })
                    .unwrap_or(CONTROL_PLANE_PORT);
                format!("{}://{}:{}", outcome.protocol, outcome.host, port)
            }
        };

        let mut meta = HashMap::new();
        meta.insert(
            "sandbox_type".to_string(),
            serde_json::Value::String(sandbox_type.to_string()),
        );

        Ok(Container {
            session_id: session_id.to_string(),
            container_id: outcome.handle,
            container_name: name,
            url,
            ports: outcome.host_ports,
            mount_dir,
            storage_path,
            runtime_token,
            version,
            meta,
            timeout: Some(60),
            path: outcome.path,
        })
    }

    /// `release(session_id, to_pool)` (§4.2). `to_pool=true` resets the
    /// workspace best-effort and re-enqueues, unless the pool for this
    /// container's type is already saturated, in which case the container
    /// is destroyed instead of leaked (§8 invariant 5).
    pub async fn release(&self, session_id: &str, to_pool: bool) -> Result<(), ManagerError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let Some(container) = self.sessions.remove(SESSIONS_KEY, session_id).await? else {
            return Err(ManagerError::NoSuchSession(session_id.to_string()));
        };

        if to_pool {
            let sandbox_type = self.type_for(&container);
            let key = pool_key(&sandbox_type);
            let target = self.config.pool_size;
            if self.pool.len(&key).await? < target {
                self.mounts.reset(container.mount_dir.as_deref()).await;
                self.pool.push(&key, container).await?;
                return Ok(());
            }
        }

        self.destroy(container).await
    }

    async fn destroy(&self, container: Container) -> Result<(), ManagerError> {
        if let Err(e) = self.driver.remove(&container.container_id, true).await {
            tracing::warn!(session_id = %container.session_id, "driver remove failed during release: {e}");
        }
        if let Err(e) = self
            .mounts
            .reclaim(container.mount_dir.as_deref(), container.storage_path.as_deref())
            .await
        {
            tracing::warn!(session_id = %container.session_id, "mount reclaim failed during release: {e}");
        }
        Ok(())
    }

    /// Best-effort guess at a container's sandbox type from its image tag,
    /// for routing a returned container to the right pool queue. The type
    /// is not persisted on `Container` directly (§3), so this is derived.
    fn type_for(&self, container: &Container) -> SandboxType {
        container
            .meta
            .get("sandbox_type")
            .and_then(|v| v.as_str())
            .map(SandboxType::from_name)
            .unwrap_or(SandboxType::Base)
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<Container>, ManagerError> {
        Ok(self.sessions.get(SESSIONS_KEY, session_id).await?)
    }

    pub async fn list(&self) -> Result<Vec<Container>, ManagerError> {
        Ok(self.sessions.values(SESSIONS_KEY).await?)
    }

    /// Seeds the warm pool for every `DEFAULT_SANDBOX_TYPE` entry at
    /// startup (§8 E2E scenario 1). Reuses the same non-blocking refill path
    /// `connect` uses after an allocation, so seeding never delays the
    /// caller (here, `main`) past the spawn itself.
    pub fn seed_default_pools(&self) {
        for name in &self.config.default_sandbox_types {
            self.spawn_refill(SandboxType::from_name(name));
        }
    }

    /// Refills the pool for `sandbox_type` up to the configured target,
    /// asynchronously: spawned after the caller's own allocation returns,
    /// never blocking it (§4.2, §5). Failures are logged and swallowed —
    /// a missed refill is retried on the next allocation for this type.
    fn spawn_refill(&self, sandbox_type: SandboxType) {
        if self.config.pool_size == 0 {
            return;
        }
        let driver = self.driver.clone();
        let pool = self.pool.clone();
        let mounts_base = self.mounts.clone_for_refill();
        let readonly_mounts = self.readonly_mounts.clone();
        let prefix = self.config.container_prefix_key.clone();
        let target = self.config.pool_size;
        let key = pool_key(&sandbox_type);
        let refill_lock = self.refill_lock(&key);
        let handle = tokio::spawn(async move {
            // Holds the per-type lock for the whole read-then-fill
            // sequence: two refills for the same type can no longer both
            // read the same starting length and each independently top it
            // up to `target`, overshooting the pool size invariant.
            let _guard = refill_lock.lock().await;
            let current = match pool.len(&key).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!("pool refill: could not read pool length: {e}");
                    return;
                }
            };
            for _ in current..target {
                // Re-check length immediately before each push: besides the
                // lock above, a direct `release(to_pool=true)` push (which
                // doesn't take this lock) could also have topped the pool
                // up meanwhile.
                match pool.len(&key).await {
                    Ok(n) if n >= target => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("pool refill: could not read pool length: {e}");
                        break;
                    }
                }
                let session_id = uuid::Uuid::new_v4().to_string();
                let image = sandbox_type.canonical_image();
                let runtime_token = generate_runtime_token();
                let mut environment = HashMap::new();
                environment.insert("SECRET_TOKEN".to_string(), runtime_token.clone());

                let (mount_dir, storage_path) = match mounts_base.provision(&session_id).await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("pool refill: mount provisioning failed: {e}");
                        continue;
                    }
                };
                let mut volumes = HashMap::new();
                if let Some(dir) = &mount_dir {
                    volumes.insert(dir.clone(), "/workspace".to_string());
                }
                for (h, c) in &readonly_mounts {
                    volumes.insert(h.clone(), c.clone());
                }
                let name = format!("{}-{}", truncate(&prefix, utils::config::MAX_PREFIX_LEN), uuid::Uuid::new_v4());

                let spec = CreateSpec {
                    image: image.clone(),
                    name: name.clone(),
                    requested_ports: vec![CONTROL_PLANE_PORT],
                    volumes,
                    environment,
                    runtime_config: serde_json::Value::Null,
                };

                let outcome = match driver.create(spec).await {
                    Ok(Some(o)) => o,
                    Ok(None) => {
                        tracing::warn!(image, "pool refill: create returned no outcome, skipping");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(image, "pool refill: create failed: {e}");
                        continue;
                    }
                };
                if let Err(e) = driver.wait_for_ready(&outcome.handle, READINESS_TIMEOUT).await {
                    tracing::warn!("pool refill: readiness wait failed: {e}");
                    if let Err(remove_err) = driver.remove(&outcome.handle, true).await {
                        tracing::warn!(
                            handle = %outcome.handle,
                            "pool refill: failed to remove container after readiness timeout: {remove_err}"
                        );
                    }
                    continue;
                }

                let port = outcome
                    .host_ports
                    .iter()
                    .find_map(|p| match p {
                        db::PortEntry::Port(n) => Some(*n),
                        db::PortEntry::PathRouted(_) => None,
                    })
                    .unwrap_or(CONTROL_PLANE_PORT);
                let url = match &outcome.path {
                    Some(path) => format!("{}://{}/{}", outcome.protocol, outcome.host, path),
                    None => format!("{}://{}:{}", outcome.protocol, outcome.host, port),
                };

                let mut meta = HashMap::new();
                meta.insert(
                    "sandbox_type".to_string(),
                    serde_json::Value::String(sandbox_type.to_string()),
                );

                let container = Container {
                    session_id,
                    container_id: outcome.handle,
                    container_name: name,
                    url,
                    ports: outcome.host_ports,
                    mount_dir,
                    storage_path,
                    runtime_token,
                    version: None,
                    meta,
                    timeout: Some(60),
                    path: outcome.path,
                };

                if let Err(e) = pool.push(&key, container).await {
                    tracing::warn!("pool refill: push failed: {e}");
                }
            }
        });
        // Non-blocking, best-effort tracking for `cleanup()` to abort.
        if let Ok(mut tasks) = self.refill_tasks.try_lock() {
            tasks.retain(|h| !h.is_finished());
            tasks.push(handle);
        }
    }

    /// Destroys every tracked container — live and pooled — on shutdown
    /// (§4.2 `cleanup()`). Individual failures are logged, never abort the
    /// sweep (§5 "Cancellation & timeouts").
    pub async fn cleanup(&self) {
        {
            let mut tasks = self.refill_tasks.lock().await;
            for task in tasks.drain(..) {
                task.abort();
            }
        }

        let live = self.sessions.values(SESSIONS_KEY).await.unwrap_or_default();
        for container in live {
            if let Err(e) = self.destroy(container).await {
                tracing::warn!("cleanup: failed to destroy live container: {e}");
            }
        }

        for sandbox_type in [
            SandboxType::Base,
            SandboxType::Filesystem,
            SandboxType::Browser,
            SandboxType::Gui,
        ] {
            let key = pool_key(&sandbox_type);
            let pooled = self.pool.drain(&key).await.unwrap_or_default();
            for container in pooled {
                if let Err(e) = self.destroy(container).await {
                    tracing::warn!("cleanup: failed to destroy pooled container: {e}");
                }
            }
        }
    }

    pub async fn pool_size(&self, sandbox_type: &SandboxType) -> usize {
        self.pool.len(&pool_key(sandbox_type)).await.unwrap_or(0)
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        s[..max_len].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use db::{DriverStatus, PortEntry};
    use deployment::{CreateOutcome, DriverError, InspectResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use utils::config::{ContainerDeployment, FileSystemKind, ManagerHttpConfig, TrainingConfig};

    struct StubDriver {
        creates: AtomicUsize,
        fail_next: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl BackendDriver for StubDriver {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn create(&self, spec: CreateSpec) -> Result<Option<CreateOutcome>, DriverError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Ok(None);
            }
            let n = self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(Some(CreateOutcome {
                handle: format!("handle-{n}-{}", spec.name),
                host_ports: vec![PortEntry::Port(9000 + n as u16)],
                host: "127.0.0.1".to_string(),
                protocol: "http".to_string(),
                path: None,
            }))
        }

        async fn start(&self, _handle: &str) -> Result<bool, DriverError> {
            Ok(true)
        }

        async fn stop(&self, _handle: &str, _grace: Option<Duration>) -> Result<bool, DriverError> {
            Ok(true)
        }

        async fn remove(&self, _handle: &str, _force: bool) -> Result<bool, DriverError> {
            Ok(true)
        }

        async fn inspect(&self, _handle: &str) -> Result<InspectResult, DriverError> {
            Ok(InspectResult {
                status: DriverStatus::Running,
                attributes: serde_json::Value::Null,
            })
        }

        async fn wait_for_ready(&self, _handle: &str, _timeout: Duration) -> Result<(), DriverError> {
            Ok(())
        }
    }

    fn test_config(pool_size: usize) -> Arc<ManagerConfig> {
        Arc::new(ManagerConfig {
            container_prefix_key: "runtime_sandbox".to_string(),
            file_system: FileSystemKind::Local,
            storage_folder: None,
            redis_enabled: false,
            container_deployment: ContainerDeployment::Docker,
            default_mount_dir: None,
            readonly_mounts: HashMap::new(),
            port_range: (49152, 59152),
            pool_size,
            oss: None,
            redis: None,
            k8s: None,
            agentrun: None,
            fc: None,
            http: ManagerHttpConfig {
                host: "0.0.0.0".to_string(),
                port: 0,
                workers: 1,
                bearer_token: None,
                auto_cleanup: true,
            },
            training: TrainingConfig {
                cleanup_interval_secs: 60,
                max_idle_secs: 1800,
            },
            deployment_state_dir: "/tmp".to_string(),
            default_sandbox_types: vec![],
        })
    }

    fn manager_with(pool_size: usize, dir: &std::path::Path) -> (SandboxManager, Arc<StubDriver>) {
        let driver = Arc::new(StubDriver {
            creates: AtomicUsize::new(0),
            fail_next: std::sync::atomic::AtomicBool::new(false),
        });
        let mounts = MountProvisioner::Local {
            base_dir: dir.to_path_buf(),
        };
        let manager = SandboxManager::new(test_config(pool_size), driver.clone(), mounts);
        (manager, driver)
    }

    #[tokio::test]
    async fn connect_is_idempotent_per_session() {
        let dir = tempdir().unwrap();
        let (manager, _driver) = manager_with(0, dir.path());
        let first = manager
            .connect(SandboxType::Base, "s1", None)
            .await
            .unwrap();
        let second = manager
            .connect(SandboxType::Base, "s1", None)
            .await
            .unwrap();
        assert_eq!(first.container_id, second.container_id);
    }

    #[tokio::test]
    async fn connect_returns_non_empty_url_and_token() {
        let dir = tempdir().unwrap();
        let (manager, _driver) = manager_with(0, dir.path());
        let container = manager
            .connect(SandboxType::Base, "s1", None)
            .await
            .unwrap();
        assert!(!container.url.is_empty());
        assert!(!container.runtime_token.is_empty());
        assert!(!container.ports.is_empty());
    }

    #[tokio::test]
    async fn release_to_pool_under_target_does_not_destroy() {
        let dir = tempdir().unwrap();
        let (manager, driver) = manager_with(2, dir.path());
        manager.connect(SandboxType::Base, "s1", None).await.unwrap();
        manager.release("s1", true).await.unwrap();
        assert_eq!(manager.pool_size(&SandboxType::Base).await, 1);
        assert!(manager.get("s1").await.unwrap().is_none());
        let _ = driver;
    }

    #[tokio::test]
    async fn concurrent_refills_do_not_overshoot_pool_size() {
        let dir = tempdir().unwrap();
        let (manager, driver) = manager_with(1, dir.path());
        // Two refills spawned back-to-back for the same type, as
        // `seed_default_pools` followed immediately by a `connect` miss
        // would do; neither should see the other's in-flight fill.
        manager.spawn_refill(SandboxType::Base);
        manager.spawn_refill(SandboxType::Base);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.pool_size(&SandboxType::Base).await, 1);
        let _ = driver;
    }

    #[tokio::test]
    async fn create_failure_leaves_no_state() {
        let dir = tempdir().unwrap();
        let (manager, driver) = manager_with(0, dir.path());
        driver.fail_next.store(true, Ordering::SeqCst);
        let err = manager.connect(SandboxType::Base, "s1", None).await;
        assert!(err.is_err());
        assert!(manager.get("s1").await.unwrap().is_none());
    }
}
