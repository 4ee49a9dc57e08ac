//! The deployment state store (§4.8): a persistent on-disk JSON registry of
//! named external deployments, with crash-safe atomic writes and daily
//! rotating backups. Distinct from an ephemeral `Container` — a deployment
//! is an externally hosted agent endpoint this process merely tracks.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{fs, sync::Mutex};

use crate::error::StoreError;

pub const SCHEMA_VERSION: &str = "1.0";
const BACKUP_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentRecord {
    pub id: String,
    pub platform: String,
    pub url: String,
    pub agent_source: String,
    pub created_at: String,
    pub status: DeploymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StateDocument {
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    deployments: HashMap<String, DeploymentRecord>,
}

fn default_version() -> String {
    SCHEMA_VERSION.to_string()
}

/// Persistent, single-writer (§5) JSON registry. All mutation goes through
/// [`Self::write_document`], which enforces the atomic-rename path, the
/// daily backup rotation, and the "refuse to blank" guard.
pub struct DeploymentStateStore {
    state_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl DeploymentStateStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir.join("deployments.json")
    }

    fn backup_path_for(&self, date: DateTime<Utc>) -> PathBuf {
        self.state_dir
            .join(format!("deployments.backup.{}.json", date.format("%Y%m%d")))
    }

    /// Corruption-tolerant read (§4.8 "Corruption recovery"): invalid JSON
    /// or a wrong top-level shape both degrade to an empty state rather
    /// than erroring; individual malformed records are dropped with a
    /// warning, the rest of the file is kept.
    async fn read_document(&self) -> StateDocument {
        let raw = match fs::read_to_string(self.state_path()).await {
            Ok(raw) => raw,
            Err(_) => return StateDocument::default(),
        };

        let value: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("deployment state file has invalid JSON, treating as empty: {e}");
                return StateDocument::default();
            }
        };

        let Value::Object(mut top) = value else {
            tracing::warn!("deployment state file has an invalid top-level shape, treating as empty");
            return StateDocument::default();
        };

        let version = top
            .remove("version")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(default_version);

        let raw_deployments = match top.remove("deployments") {
            Some(Value::Object(map)) => map,
            _ => {
                tracing::warn!("deployment state file is missing a valid `deployments` map, treating as empty");
                return StateDocument {
                    version,
                    deployments: HashMap::new(),
                };
            }
        };

        let mut deployments = HashMap::new();
        for (id, record_value) in raw_deployments {
            match serde_json::from_value::<DeploymentRecord>(record_value) {
                Ok(record) if !record.id.is_empty()
                    && !record.platform.is_empty()
                    && !record.url.is_empty()
                    && !record.agent_source.is_empty()
                    && !record.created_at.is_empty() =>
                {
                    deployments.insert(id, record);
                }
                _ => {
                    tracing::warn!(id = %id, "dropping deployment record missing required fields");
                }
            }
        }

        StateDocument { version, deployments }
    }

    /// Writes `doc` atomically: serialize to a sibling `.tmp`, fsync-free
    /// rename into place. Enforces the anti-data-loss guard and the daily
    /// backup rotation. Must be called with `write_lock` held.
    async fn write_document(&self, doc: &StateDocument) -> Result<(), StoreError> {
        fs::create_dir_all(&self.state_dir).await?;

        let existing_raw = fs::read_to_string(self.state_path()).await.ok();
        let existing_had_deployments = existing_raw
            .as_deref()
            .map(|raw| {
                serde_json::from_str::<Value>(raw)
                    .ok()
                    .and_then(|v| v.get("deployments").cloned())
                    .map(|d| d.as_object().is_some_and(|m| !m.is_empty()))
                    .unwrap_or(false)
            })
            .unwrap_or(false);

        if existing_had_deployments && doc.deployments.is_empty() {
            return Err(StoreError::RefusedEmptyOverwrite);
        }

        let new_content = serde_json::to_string_pretty(doc)?;

        let unchanged = existing_raw
            .as_deref()
            .map(|raw| raw == new_content)
            .unwrap_or(false);

        if !unchanged && existing_raw.is_some() {
            let today = Utc::now();
            let backup_path = self.backup_path_for(today);
            if let Some(raw) = &existing_raw {
                fs::write(&backup_path, raw).await?;
            }
        }

        let tmp_path = self.state_dir.join("deployments.json.tmp");
        let write_result = fs::write(&tmp_path, &new_content).await;
        match write_result {
            Ok(()) => {}
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(e.into());
            }
        }
        if let Err(e) = fs::rename(&tmp_path, self.state_path()).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        self.cleanup_old_backups().await?;
        Ok(())
    }

    async fn cleanup_old_backups(&self) -> Result<(), StoreError> {
        let mut entries = match fs::read_dir(&self.state_dir).await {
            Ok(e) => e,
            Err(_) => return Ok(()),
        };
        let cutoff = Utc::now() - chrono::Duration::days(BACKUP_RETENTION_DAYS);
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(date_str) = name
                .strip_prefix("deployments.backup.")
                .and_then(|s| s.strip_suffix(".json"))
            else {
                continue;
            };
            if let Ok(date) = chrono::NaiveDate::parse_from_str(date_str, "%Y%m%d") {
                let date = date.and_hms_opt(0, 0, 0).unwrap().and_utc();
                if date < cutoff {
                    let _ = fs::remove_file(entry.path()).await;
                }
            }
        }
        Ok(())
    }

    pub async fn save(&self, record: DeploymentRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_document().await;
        doc.deployments.insert(record.id.clone(), record);
        self.write_document(&doc).await
    }

    pub async fn get(&self, id: &str) -> Option<DeploymentRecord> {
        self.read_document().await.deployments.remove(id)
    }

    pub async fn list(&self) -> Vec<DeploymentRecord> {
        self.read_document().await.deployments.into_values().collect()
    }

    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_document().await;
        let removed = doc.deployments.remove(id).is_some();
        if removed {
            self.write_document(&doc).await?;
        }
        Ok(removed)
    }

    /// Updates only `status`, preserving every other field (§4.8
    /// anti-data-loss guard). Fails if the id is absent or the state is
    /// empty.
    pub async fn update_status(
        &self,
        id: &str,
        status: DeploymentStatus,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_document().await;
        if doc.deployments.is_empty() {
            return Err(StoreError::EmptyOnUpdate(id.to_string()));
        }
        let record = doc
            .deployments
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.status = status;
        self.write_document(&doc).await
    }

    pub async fn export_to_file(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let doc = self.read_document().await;
        let content = serde_json::to_string_pretty(&doc)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// `merge=true` merges by id with precedence to the imported side;
    /// `merge=false` replaces the whole document (still via the atomic +
    /// backup write path).
    pub async fn import_from_file(
        &self,
        path: impl AsRef<Path>,
        merge: bool,
    ) -> Result<(), StoreError> {
        let raw = fs::read_to_string(path).await?;
        let imported: StateDocument = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Corrupted(e.to_string()))?;

        let _guard = self.write_lock.lock().await;
        let doc = if merge {
            let mut current = self.read_document().await;
            for (id, record) in imported.deployments {
                current.deployments.insert(id, record);
            }
            current
        } else {
            imported
        };
        self.write_document(&doc).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(id: &str) -> DeploymentRecord {
        DeploymentRecord {
            id: id.to_string(),
            platform: "local".to_string(),
            url: "http://localhost:8080".to_string(),
            agent_source: "/a.py".to_string(),
            created_at: "2024-01-01T00:00:00".to_string(),
            status: DeploymentStatus::Running,
            token: None,
            config: Some(HashMap::from([("k".to_string(), Value::String("v".to_string()))])),
        }
    }

    #[tokio::test]
    async fn save_and_get_roundtrip() {
        let dir = tempdir().unwrap();
        let store = DeploymentStateStore::new(dir.path());
        store.save(sample("d1")).await.unwrap();
        let got = store.get("d1").await.unwrap();
        assert_eq!(got.platform, "local");
    }

    #[tokio::test]
    async fn update_status_preserves_other_fields() {
        let dir = tempdir().unwrap();
        let store = DeploymentStateStore::new(dir.path());
        store.save(sample("d1")).await.unwrap();
        store
            .update_status("d1", DeploymentStatus::Stopped)
            .await
            .unwrap();
        let got = store.get("d1").await.unwrap();
        assert_eq!(got.status, DeploymentStatus::Stopped);
        assert_eq!(got.config.unwrap().get("k").unwrap(), "v");
    }

    #[tokio::test]
    async fn update_status_on_empty_state_fails() {
        let dir = tempdir().unwrap();
        let store = DeploymentStateStore::new(dir.path());
        let err = store
            .update_status("missing", DeploymentStatus::Stopped)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::EmptyOnUpdate(_)));
    }

    #[tokio::test]
    async fn refuses_to_overwrite_nonempty_with_empty() {
        let dir = tempdir().unwrap();
        let store = DeploymentStateStore::new(dir.path());
        store.save(sample("d1")).await.unwrap();
        let empty_doc = StateDocument::default();
        let err = store.write_document(&empty_doc).await.unwrap_err();
        assert!(matches!(err, StoreError::RefusedEmptyOverwrite));
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn first_write_creates_no_backup() {
        let dir = tempdir().unwrap();
        let store = DeploymentStateStore::new(dir.path());
        store.save(sample("d1")).await.unwrap();
        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        let mut backups = 0;
        while let Some(e) = entries.next_entry().await.unwrap() {
            if e.file_name().to_string_lossy().starts_with("deployments.backup.") {
                backups += 1;
            }
        }
        assert_eq!(backups, 0);
    }

    #[tokio::test]
    async fn second_distinct_write_same_day_creates_one_backup() {
        let dir = tempdir().unwrap();
        let store = DeploymentStateStore::new(dir.path());
        store.save(sample("d1")).await.unwrap();
        store.save(sample("d2")).await.unwrap();
        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        let mut backups = 0;
        while let Some(e) = entries.next_entry().await.unwrap() {
            if e.file_name().to_string_lossy().starts_with("deployments.backup.") {
                backups += 1;
            }
        }
        assert_eq!(backups, 1);
    }

    #[tokio::test]
    async fn export_then_import_replace_roundtrip() {
        let dir = tempdir().unwrap();
        let store = DeploymentStateStore::new(dir.path());
        store.save(sample("d1")).await.unwrap();
        let export_path = dir.path().join("export.json");
        store.export_to_file(&export_path).await.unwrap();

        // deleting the only remaining record is refused by the
        // never-write-empty-over-nonempty guard (§8 invariant 9) --
        // there is no legitimate path to blank an already-populated store.
        let err = store.delete("d1").await.unwrap_err();
        assert!(matches!(err, StoreError::RefusedEmptyOverwrite));

        store.save(sample("d2")).await.unwrap();
        store.import_from_file(&export_path, false).await.unwrap();
        let list = store.list().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "d1");
    }

    #[tokio::test]
    async fn corrupted_json_reads_as_empty() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("deployments.json"), "{not json")
            .await
            .unwrap();
        let store = DeploymentStateStore::new(dir.path());
        assert!(store.list().await.is_empty());
    }
}
