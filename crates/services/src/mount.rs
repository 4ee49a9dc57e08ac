//! Mount provisioning (§4.2 "Mount provisioning"): materializes the
//! per-session workspace directory a container mounts read-write at
//! `/workspace`, either as a local directory or as an object-store prefix
//! that is archived on release and restored on re-attach.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use object_store::{ObjectStore, PutPayload, aws::AmazonS3Builder, path::Path as ObjPath};
use utils::config::{FileSystemKind, ManagerConfig};

use crate::error::ManagerError;

/// Host-path → container-path map copied into every container unmodified
/// (§4.2 "Readonly mounts").
pub type ReadonlyMounts = std::collections::HashMap<String, String>;

pub enum MountProvisioner {
    Local { base_dir: PathBuf },
    ObjectStore { store: Arc<dyn ObjectStore>, prefix: String },
}

impl MountProvisioner {
    /// Cheap clone for handing a copy of the provisioner to the background
    /// pool-refill task, which runs independently of the request that
    /// spawned it.
    pub fn clone_for_refill(&self) -> Self {
        match self {
            MountProvisioner::Local { base_dir } => MountProvisioner::Local {
                base_dir: base_dir.clone(),
            },
            MountProvisioner::ObjectStore { store, prefix } => MountProvisioner::ObjectStore {
                store: store.clone(),
                prefix: prefix.clone(),
            },
        }
    }
}

impl MountProvisioner {
    pub fn from_config(config: &ManagerConfig) -> Result<Self, ManagerError> {
        match config.file_system {
            FileSystemKind::Local => {
                let base = config
                    .storage_folder
                    .clone()
                    .or_else(|| config.default_mount_dir.clone())
                    .unwrap_or_else(|| "/tmp/runtime-sandbox-mounts".to_string());
                Ok(MountProvisioner::Local {
                    base_dir: PathBuf::from(base),
                })
            }
            FileSystemKind::Oss => {
                let oss = config
                    .oss
                    .as_ref()
                    .ok_or_else(|| ManagerError::Mount("SANDBOX_FILE_SYSTEM=oss but no OSS_* config".to_string()))?;
                let store = AmazonS3Builder::new()
                    .with_endpoint(&oss.endpoint)
                    .with_access_key_id(&oss.access_key_id)
                    .with_secret_access_key(&oss.access_key_secret)
                    .with_bucket_name(&oss.bucket_name)
                    .with_virtual_hosted_style_request(false)
                    .build()
                    .map_err(|e| ManagerError::Mount(format!("could not build object store client: {e}")))?;
                Ok(MountProvisioner::ObjectStore {
                    store: Arc::new(store),
                    prefix: "runtime-sandbox".to_string(),
                })
            }
        }
    }

    /// Reserves a workspace for `session_id`. Returns `(mount_dir,
    /// storage_path)` per the `Container` record shape (§3): only one of
    /// the two is populated depending on the backend.
    pub async fn provision(&self, session_id: &str) -> Result<(Option<String>, Option<String>), ManagerError> {
        match self {
            MountProvisioner::Local { base_dir } => {
                let dir = base_dir.join(session_id);
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(|e| ManagerError::Mount(format!("could not create mount dir {dir:?}: {e}")))?;
                Ok((Some(dir.to_string_lossy().to_string()), None))
            }
            MountProvisioner::ObjectStore { prefix, .. } => {
                let storage_path = format!("{prefix}/{session_id}/");
                Ok((None, Some(storage_path)))
            }
        }
    }

    /// Best-effort workspace reset for a container returning to the warm
    /// pool (§4.2 `release(to_pool=True)`): local directories are emptied
    /// in place; object-store prefixes are left for the next archive/
    /// restore cycle to overwrite.
    pub async fn reset(&self, mount_dir: Option<&str>) {
        if let MountProvisioner::Local { .. } = self {
            if let Some(dir) = mount_dir {
                if let Err(e) = clear_dir(Path::new(dir)).await {
                    tracing::warn!(dir, "best-effort workspace reset failed: {e}");
                }
            }
        }
    }

    /// On release, either deletes the local mount directory or uploads its
    /// contents to the reserved object-store prefix, matching §4.2's
    /// "archive to object store (if configured)" on non-pooled release.
    pub async fn reclaim(&self, mount_dir: Option<&str>, storage_path: Option<&str>) -> Result<(), ManagerError> {
        match self {
            MountProvisioner::Local { .. } => {
                if let Some(dir) = mount_dir {
                    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            tracing::warn!(dir, "failed to remove mount dir on release: {e}");
                        }
                    }
                }
                Ok(())
            }
            MountProvisioner::ObjectStore { store, .. } => {
                let (Some(dir), Some(prefix)) = (mount_dir, storage_path) else {
                    return Ok(());
                };
                archive_dir(store.as_ref(), Path::new(dir), prefix).await
            }
        }
    }

    /// Restores a previously archived workspace on re-attach (§4.2).
    pub async fn restore(&self, local_dir: &Path, storage_path: &str) -> Result<(), ManagerError> {
        let MountProvisioner::ObjectStore { store, .. } = self else {
            return Ok(());
        };
        tokio::fs::create_dir_all(local_dir)
            .await
            .map_err(|e| ManagerError::Mount(e.to_string()))?;
        let obj_prefix = ObjPath::from(storage_path);
        let mut listing = store.list(Some(&obj_prefix));
        use futures::StreamExt;
        while let Some(meta) = listing.next().await {
            let meta = meta.map_err(|e| ManagerError::Mount(e.to_string()))?;
            let relative = meta.location.as_ref().trim_start_matches(storage_path);
            let dest = local_dir.join(relative);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            let bytes = store
                .get(&meta.location)
                .await
                .map_err(|e| ManagerError::Mount(e.to_string()))?
                .bytes()
                .await
                .map_err(|e| ManagerError::Mount(e.to_string()))?;
            tokio::fs::write(&dest, &bytes)
                .await
                .map_err(|e| ManagerError::Mount(e.to_string()))?;
        }
        Ok(())
    }
}

async fn clear_dir(dir: &Path) -> std::io::Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
    }
    Ok(())
}

async fn archive_dir(store: &dyn ObjectStore, dir: &Path, prefix: &str) -> Result<(), ManagerError> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in walk_files(dir).map_err(|e| ManagerError::Mount(e.to_string()))? {
        let relative = entry
            .strip_prefix(dir)
            .unwrap_or(&entry)
            .to_string_lossy()
            .replace('\\', "/");
        let key = ObjPath::from(format!("{prefix}{relative}"));
        let bytes = tokio::fs::read(&entry)
            .await
            .map_err(|e| ManagerError::Mount(e.to_string()))?;
        store
            .put(&key, PutPayload::from(bytes))
            .await
            .map_err(|e| ManagerError::Mount(e.to_string()))?;
    }
    Ok(())
}

fn walk_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn local_provision_creates_directory() {
        let dir = tempdir().unwrap();
        let provisioner = MountProvisioner::Local {
            base_dir: dir.path().to_path_buf(),
        };
        let (mount_dir, storage_path) = provisioner.provision("s1").await.unwrap();
        assert!(storage_path.is_none());
        let mount_dir = mount_dir.unwrap();
        assert!(Path::new(&mount_dir).is_dir());
    }

    #[tokio::test]
    async fn reclaim_removes_local_directory() {
        let dir = tempdir().unwrap();
        let provisioner = MountProvisioner::Local {
            base_dir: dir.path().to_path_buf(),
        };
        let (mount_dir, _) = provisioner.provision("s1").await.unwrap();
        let mount_dir = mount_dir.unwrap();
        provisioner.reclaim(Some(&mount_dir), None).await.unwrap();
        assert!(!Path::new(&mount_dir).exists());
    }
}
