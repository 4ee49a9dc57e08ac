//! `ManagerConfig`: the single source of truth for process configuration,
//! loaded once from the environment at startup and validated eagerly so a
//! misconfigured backend fails at boot, not on first use (§1.1, §6).
//!
//! Field names mirror `original_source`'s `SandboxManagerEnvConfig` 1:1
//! (translated to `SCREAMING_SNAKE_CASE` env vars) so operators migrating
//! from the Python service have a direct mapping.

use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },
    #[error("{var} is required when {because}")]
    MissingRequired {
        var: &'static str,
        because: &'static str,
    },
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSystemKind {
    Local,
    Oss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerDeployment {
    Docker,
    K8s,
    AgentRun,
    Fc,
}

#[derive(Debug, Clone)]
pub struct OssConfig {
    pub endpoint: String,
    pub access_key_id: String,
    pub access_key_secret: String,
    pub bucket_name: String,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub server: String,
    pub port: u16,
    pub db: i64,
    pub user: Option<String>,
    pub password: Option<String>,
    pub port_key: String,
    pub container_pool_key: String,
}

impl RedisConfig {
    pub fn connection_url(&self) -> String {
        let auth = match (&self.user, &self.password) {
            (Some(u), Some(p)) => format!("{u}:{p}@"),
            (None, Some(p)) => format!(":{p}@"),
            _ => String::new(),
        };
        format!(
            "redis://{auth}{}:{}/{}",
            self.server, self.port, self.db
        )
    }
}

#[derive(Debug, Clone)]
pub struct K8sConfig {
    pub namespace: String,
    pub kubeconfig_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AgentRunConfig {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub account_id: String,
    pub region_id: String,
    pub cpu: u32,
    pub memory_mb: u32,
    pub prefix: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct FcConfig {
    pub api_key: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct ManagerHttpConfig {
    pub host: String,
    pub port: u16,
    pub workers: u32,
    pub bearer_token: Option<String>,
    pub auto_cleanup: bool,
}

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub cleanup_interval_secs: u64,
    pub max_idle_secs: u64,
}

/// Max length for the generated container/pod name prefix: Kubernetes caps
/// object names at 63 chars and we reserve 25 for the generated suffix.
pub const UUID_LENGTH: usize = 25;
pub const MAX_PREFIX_LEN: usize = 63 - UUID_LENGTH;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub container_prefix_key: String,
    pub file_system: FileSystemKind,
    pub storage_folder: Option<String>,
    pub redis_enabled: bool,
    pub container_deployment: ContainerDeployment,
    pub default_mount_dir: Option<String>,
    pub readonly_mounts: HashMap<String, String>,
    pub port_range: (u16, u16),
    pub pool_size: usize,
    pub oss: Option<OssConfig>,
    pub redis: Option<RedisConfig>,
    pub k8s: Option<K8sConfig>,
    pub agentrun: Option<AgentRunConfig>,
    pub fc: Option<FcConfig>,
    pub http: ManagerHttpConfig,
    pub training: TrainingConfig,
    pub deployment_state_dir: String,
    /// Sandbox type names to pre-populate the warm pool with at startup
    /// (`DEFAULT_SANDBOX_TYPE` in the env var table). Each entry is matched
    /// against `db::SandboxType` by name; the pool is seeded with
    /// `pool_size` containers of each listed type.
    pub default_sandbox_types: Vec<String>,
}

fn env_or(var: &'static str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn env_opt(var: &'static str) -> Option<String> {
    std::env::var(var).ok().filter(|s| !s.is_empty())
}

fn parse_env<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            var,
            reason: format!("could not parse {raw:?}"),
        }),
    }
}

impl ManagerConfig {
    /// Loads and eagerly validates configuration from the process
    /// environment. Mirrors `SandboxManagerEnvConfig.check_settings`: a
    /// backend selected without its prerequisite fields fails here, not on
    /// first use.
    pub fn from_env() -> Result<Self, ConfigError> {
        let container_prefix_key = env_or("SANDBOX_CONTAINER_PREFIX_KEY", "runtime_sandbox");
        if container_prefix_key.len() > MAX_PREFIX_LEN {
            return Err(ConfigError::InvalidValue {
                var: "SANDBOX_CONTAINER_PREFIX_KEY",
                reason: format!("must be <= {MAX_PREFIX_LEN} chars for k8s name limits"),
            });
        }

        let file_system = match env_or("SANDBOX_FILE_SYSTEM", "local").as_str() {
            "local" => FileSystemKind::Local,
            "oss" => FileSystemKind::Oss,
            other => {
                return Err(ConfigError::InvalidValue {
                    var: "SANDBOX_FILE_SYSTEM",
                    reason: format!("unknown value {other:?}, expected local|oss"),
                });
            }
        };

        let redis_enabled = parse_env("SANDBOX_REDIS_ENABLED", false)?;

        let container_deployment = match env_or("SANDBOX_CONTAINER_DEPLOYMENT", "docker").as_str() {
            "docker" => ContainerDeployment::Docker,
            "k8s" => ContainerDeployment::K8s,
            "agentrun" => ContainerDeployment::AgentRun,
            "fc" => ContainerDeployment::Fc,
            other => {
                return Err(ConfigError::InvalidValue {
                    var: "SANDBOX_CONTAINER_DEPLOYMENT",
                    reason: format!("unknown value {other:?}, expected docker|k8s|agentrun|fc"),
                });
            }
        };

        let readonly_mounts: HashMap<String, String> = match env_opt("SANDBOX_READONLY_MOUNTS") {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidValue {
                var: "SANDBOX_READONLY_MOUNTS",
                reason: e.to_string(),
            })?,
            None => HashMap::new(),
        };

        let port_lo: u16 = parse_env("SANDBOX_PORT_RANGE_LO", 49152)?;
        let port_hi: u16 = parse_env("SANDBOX_PORT_RANGE_HI", 59152)?;
        if port_lo >= port_hi {
            return Err(ConfigError::InvalidValue {
                var: "SANDBOX_PORT_RANGE_LO",
                reason: "must be < SANDBOX_PORT_RANGE_HI".to_string(),
            });
        }

        let pool_size: usize = parse_env("SANDBOX_POOL_SIZE", 0)?;

        let oss = if file_system == FileSystemKind::Oss {
            Some(OssConfig {
                endpoint: env_or("OSS_ENDPOINT", "http://oss-cn-hangzhou.aliyuncs.com"),
                access_key_id: env_opt("OSS_ACCESS_KEY_ID").ok_or(ConfigError::MissingRequired {
                    var: "OSS_ACCESS_KEY_ID",
                    because: "SANDBOX_FILE_SYSTEM=oss",
                })?,
                access_key_secret: env_opt("OSS_ACCESS_KEY_SECRET").ok_or(
                    ConfigError::MissingRequired {
                        var: "OSS_ACCESS_KEY_SECRET",
                        because: "SANDBOX_FILE_SYSTEM=oss",
                    },
                )?,
                bucket_name: env_opt("OSS_BUCKET_NAME").ok_or(ConfigError::MissingRequired {
                    var: "OSS_BUCKET_NAME",
                    because: "SANDBOX_FILE_SYSTEM=oss",
                })?,
            })
        } else {
            None
        };

        let redis = if redis_enabled {
            Some(RedisConfig {
                server: env_or("REDIS_SERVER", "localhost"),
                port: parse_env("REDIS_PORT", 6379)?,
                db: parse_env("REDIS_DB", 0)?,
                user: env_opt("REDIS_USER"),
                password: env_opt("REDIS_PASSWORD"),
                port_key: env_or(
                    "REDIS_PORT_KEY",
                    "_runtime_sandbox_container_occupied_ports",
                ),
                container_pool_key: env_or(
                    "REDIS_CONTAINER_POOL_KEY",
                    "_runtime_sandbox_container_pool",
                ),
            })
        } else {
            None
        };

        let k8s = if container_deployment == ContainerDeployment::K8s {
            Some(K8sConfig {
                namespace: env_or("K8S_NAMESPACE", "default"),
                kubeconfig_path: env_opt("K8S_KUBECONFIG_PATH"),
            })
        } else {
            None
        };

        let agentrun = if container_deployment == ContainerDeployment::AgentRun {
            Some(AgentRunConfig {
                access_key_id: env_opt("AGENTRUN_ACCESS_KEY_ID").ok_or(
                    ConfigError::MissingRequired {
                        var: "AGENTRUN_ACCESS_KEY_ID",
                        because: "SANDBOX_CONTAINER_DEPLOYMENT=agentrun",
                    },
                )?,
                access_key_secret: env_opt("AGENTRUN_ACCESS_KEY_SECRET").ok_or(
                    ConfigError::MissingRequired {
                        var: "AGENTRUN_ACCESS_KEY_SECRET",
                        because: "SANDBOX_CONTAINER_DEPLOYMENT=agentrun",
                    },
                )?,
                account_id: env_opt("AGENTRUN_ACCOUNT_ID").ok_or(ConfigError::MissingRequired {
                    var: "AGENTRUN_ACCOUNT_ID",
                    because: "SANDBOX_CONTAINER_DEPLOYMENT=agentrun",
                })?,
                region_id: env_or("AGENTRUN_REGION_ID", "cn-hangzhou"),
                cpu: parse_env("AGENTRUN_CPU", 2)?,
                memory_mb: parse_env("AGENTRUN_MEMORY", 2048)?,
                prefix: env_or("AGENTRUN_PREFIX", "agentscope-sandbox_"),
                api_base: env_or("AGENTRUN_API_BASE", "https://agentrun.cn-hangzhou.aliyuncs.com"),
            })
        } else {
            None
        };

        let fc = if container_deployment == ContainerDeployment::Fc {
            Some(FcConfig {
                api_key: env_opt("FC_API_KEY").ok_or(ConfigError::MissingRequired {
                    var: "FC_API_KEY",
                    because: "SANDBOX_CONTAINER_DEPLOYMENT=fc",
                })?,
                api_base: env_opt("FC_API_BASE").ok_or(ConfigError::MissingRequired {
                    var: "FC_API_BASE",
                    because: "SANDBOX_CONTAINER_DEPLOYMENT=fc",
                })?,
            })
        } else {
            None
        };

        let default_sandbox_types: Vec<String> = match env_opt("DEFAULT_SANDBOX_TYPE") {
            Some(raw) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(list) => list,
                Err(_) => raw
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            None => Vec::new(),
        };

        let workers: u32 = parse_env("MANAGER_WORKERS", 1)?;
        if workers > 1 && !redis_enabled {
            return Err(ConfigError::Other(
                "MANAGER_WORKERS > 1 requires SANDBOX_REDIS_ENABLED=true (port arbiter needs a shared store)"
                    .to_string(),
            ));
        }

        let http = ManagerHttpConfig {
            host: env_or("MANAGER_HOST", "0.0.0.0"),
            port: parse_env("MANAGER_PORT", 0)?,
            workers,
            bearer_token: env_opt("MANAGER_BEARER_TOKEN"),
            auto_cleanup: parse_env("MANAGER_AUTO_CLEANUP", true)?,
        };
        if http.bearer_token.is_none() {
            tracing::warn!("MANAGER_BEARER_TOKEN not set: manager HTTP facade auth is disabled");
        }

        let training = TrainingConfig {
            cleanup_interval_secs: parse_env("TRAINING_CLEANUP_INTERVAL_SECS", 60)?,
            max_idle_secs: parse_env("TRAINING_MAX_IDLE_SECS", 1800)?,
        };

        let deployment_state_dir = env_opt("DEPLOYMENT_STATE_DIR").unwrap_or_else(|| {
            dirs_home_fallback("~/.agentscope-runtime")
        });

        Ok(ManagerConfig {
            container_prefix_key,
            file_system,
            storage_folder: env_opt("SANDBOX_STORAGE_FOLDER"),
            redis_enabled,
            container_deployment,
            default_mount_dir: env_opt("SANDBOX_DEFAULT_MOUNT_DIR"),
            readonly_mounts,
            port_range: (port_lo, port_hi),
            pool_size,
            oss,
            redis,
            k8s,
            agentrun,
            fc,
            http,
            training,
            deployment_state_dir,
            default_sandbox_types,
        })
    }
}

fn dirs_home_fallback(path_with_tilde: &str) -> String {
    if let Some(rest) = path_with_tilde.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/{rest}");
        }
    }
    path_with_tilde.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "SANDBOX_CONTAINER_PREFIX_KEY",
            "SANDBOX_FILE_SYSTEM",
            "SANDBOX_REDIS_ENABLED",
            "SANDBOX_CONTAINER_DEPLOYMENT",
            "SANDBOX_READONLY_MOUNTS",
            "SANDBOX_PORT_RANGE_LO",
            "SANDBOX_PORT_RANGE_HI",
            "SANDBOX_POOL_SIZE",
            "OSS_ACCESS_KEY_ID",
            "OSS_ACCESS_KEY_SECRET",
            "OSS_BUCKET_NAME",
            "MANAGER_WORKERS",
            "MANAGER_BEARER_TOKEN",
        ] {
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    #[serial]
    fn defaults_to_docker_local_single_worker() {
        clear_env();
        let cfg = ManagerConfig::from_env().unwrap();
        assert_eq!(cfg.container_deployment, ContainerDeployment::Docker);
        assert_eq!(cfg.file_system, FileSystemKind::Local);
        assert_eq!(cfg.port_range, (49152, 59152));
        assert_eq!(cfg.http.workers, 1);
    }

    #[test]
    #[serial]
    fn oss_without_credentials_fails_fast() {
        clear_env();
        unsafe { std::env::set_var("SANDBOX_FILE_SYSTEM", "oss") };
        let err = ManagerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { var: "OSS_ACCESS_KEY_ID", .. }));
        unsafe { std::env::remove_var("SANDBOX_FILE_SYSTEM") };
    }

    #[test]
    #[serial]
    fn multi_worker_without_redis_fails_fast() {
        clear_env();
        unsafe { std::env::set_var("MANAGER_WORKERS", "4") };
        let err = ManagerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Other(_)));
        unsafe { std::env::remove_var("MANAGER_WORKERS") };
    }
}
