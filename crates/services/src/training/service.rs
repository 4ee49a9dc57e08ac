//! The training-environment service (§4.7): one actor task per running
//! instance, so a stuck or panicking environment only ever stalls its own
//! episode. Grounded on the original's per-instance Ray actor — the same
//! isolation shape, expressed with a `tokio::task` and an `mpsc` command
//! channel instead of a separate process.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::TrainingEnvError;
use crate::training::environment::{Environment, EnvironmentRegistry};

enum Command {
    GetInitState {
        params: Value,
        reply: oneshot::Sender<Result<Value, TrainingEnvError>>,
    },
    Step {
        action: Value,
        params: Value,
        reply: oneshot::Sender<Result<Value, TrainingEnvError>>,
    },
    Evaluate {
        messages: Value,
        params: Value,
        reply: oneshot::Sender<Result<f64, TrainingEnvError>>,
    },
    GetInfo {
        messages: Value,
        params: Value,
        reply: oneshot::Sender<Result<Value, TrainingEnvError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

struct ActorHandle {
    tx: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

fn spawn_actor(mut env: Box<dyn Environment>) -> ActorHandle {
    let (tx, mut rx) = mpsc::channel::<Command>(32);
    let task = tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::GetInitState { params, reply } => {
                    let _ = reply.send(env.get_init_state(&params));
                }
                Command::Step { action, params, reply } => {
                    let _ = reply.send(env.step(&action, &params));
                }
                Command::Evaluate { messages, params, reply } => {
                    let _ = reply.send(env.evaluate(&messages, &params));
                }
                Command::GetInfo { messages, params, reply } => {
                    let _ = reply.send(env.get_info(&messages, &params));
                }
                Command::Close { reply } => {
                    env.close();
                    let _ = reply.send(());
                    break;
                }
            }
        }
    });
    ActorHandle { tx, task }
}

async fn send_and_await<T>(
    tx: &mpsc::Sender<Command>,
    build: impl FnOnce(oneshot::Sender<Result<T, TrainingEnvError>>) -> Command,
) -> Result<T, TrainingEnvError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(build(reply_tx))
        .await
        .map_err(|_| TrainingEnvError::ActorGone)?;
    reply_rx.await.map_err(|_| TrainingEnvError::ActorGone)?
}

pub struct TrainingEnvironmentService {
    registry: Arc<EnvironmentRegistry>,
    instances: DashMap<String, (ActorHandle, std::sync::Mutex<tokio::time::Instant>)>,
    max_idle: Duration,
}

impl TrainingEnvironmentService {
    pub fn new(registry: Arc<EnvironmentRegistry>, max_idle_secs: u64) -> Self {
        Self {
            registry,
            instances: DashMap::new(),
            max_idle: Duration::from_secs(max_idle_secs),
        }
    }

    /// Starts the background reaper that evicts instances idle longer than
    /// `max_idle_secs`, polling every `cleanup_interval_secs` (§4.7).
    pub fn spawn_reaper(self: &Arc<Self>, cleanup_interval_secs: u64) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(cleanup_interval_secs));
            loop {
                ticker.tick().await;
                service.evict_idle().await;
            }
        })
    }

    async fn evict_idle(&self) {
        let now = tokio::time::Instant::now();
        let stale: Vec<String> = self
            .instances
            .iter()
            .filter_map(|entry| {
                let last_access = *entry.value().1.lock().unwrap();
                if now.duration_since(last_access) > self.max_idle {
                    Some(entry.key().clone())
                } else {
                    None
                }
            })
            .collect();
        for instance_id in stale {
            tracing::info!(instance_id, "reaping idle training environment instance");
            let _ = self.release_instance(&instance_id).await;
        }
    }

    fn touch(&self, instance_id: &str) {
        if let Some(entry) = self.instances.get(instance_id) {
            *entry.value().1.lock().unwrap() = tokio::time::Instant::now();
        }
    }

    pub fn get_query_list(&self, env_type: &str, split: &str) -> Result<Vec<String>, TrainingEnvError> {
        self.registry.query_list(env_type, split)
    }

    pub async fn create_instance(
        &self,
        env_type: &str,
        task_id: &str,
        instance_id: Option<String>,
        params: Value,
    ) -> Result<(String, Value), TrainingEnvError> {
        let instance_id = instance_id.unwrap_or_else(|| format!("exp_{}", uuid::Uuid::new_v4()));
        let env = self.registry.create(env_type, task_id, &instance_id, &params)?;
        let handle = spawn_actor(env);
        let init_state = send_and_await(&handle.tx, |reply| Command::GetInitState {
            params: params.clone(),
            reply,
        })
        .await?;
        self.instances
            .insert(instance_id.clone(), (handle, std::sync::Mutex::new(tokio::time::Instant::now())));
        Ok((instance_id, init_state))
    }

    fn handle_tx(&self, instance_id: &str) -> Result<mpsc::Sender<Command>, TrainingEnvError> {
        self.instances
            .get(instance_id)
            .map(|entry| entry.value().0.tx.clone())
            .ok_or_else(|| TrainingEnvError::UnknownInstance(instance_id.to_string()))
    }

    pub async fn step(&self, instance_id: &str, action: Value, params: Value) -> Result<Value, TrainingEnvError> {
        self.touch(instance_id);
        let tx = self.handle_tx(instance_id)?;
        send_and_await(&tx, |reply| Command::Step { action, params, reply }).await
    }

    pub async fn evaluate(&self, instance_id: &str, messages: Value, params: Value) -> Result<f64, TrainingEnvError> {
        self.touch(instance_id);
        let tx = self.handle_tx(instance_id)?;
        send_and_await(&tx, |reply| Command::Evaluate { messages, params, reply }).await
    }

    pub async fn get_info(&self, instance_id: &str, messages: Value, params: Value) -> Result<Value, TrainingEnvError> {
        self.touch(instance_id);
        let tx = self.handle_tx(instance_id)?;
        send_and_await(&tx, |reply| Command::GetInfo { messages, params, reply }).await
    }

    pub async fn release_instance(&self, instance_id: &str) -> Result<bool, TrainingEnvError> {
        let Some((_, (handle, _))) = self.instances.remove(instance_id) else {
            return Ok(false);
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if handle.tx.send(Command::Close { reply: reply_tx }).await.is_ok() {
            let _ = reply_rx.await;
        }
        handle.task.abort();
        Ok(true)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}
