//! In-process collection backends, used when no shared store is configured
//! (single manager replica, `MANAGER_WORKERS=1`). Grounded on the teacher's
//! `dashmap`-based service state: a process-wide `DashMap` keyed by the
//! collection name, guarded per-key by a `tokio::sync::Mutex` for the
//! operations that need read-modify-write atomicity.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;

use super::{SharedMap, SharedQueue, SharedSet};
use crate::error::CollectionError;

#[derive(Default)]
pub struct InMemoryQueue<T> {
    queues: DashMap<String, Mutex<VecDeque<T>>>,
}

impl<T> InMemoryQueue<T> {
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
        }
    }
}

#[async_trait]
impl<T> SharedQueue<T> for InMemoryQueue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + Clone,
{
    async fn push(&self, key: &str, item: T) -> Result<(), CollectionError> {
        let entry = self
            .queues
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        entry.lock().await.push_back(item);
        Ok(())
    }

    async fn pop(&self, key: &str) -> Result<Option<T>, CollectionError> {
        match self.queues.get(key) {
            Some(entry) => Ok(entry.lock().await.pop_front()),
            None => Ok(None),
        }
    }

    async fn len(&self, key: &str) -> Result<usize, CollectionError> {
        match self.queues.get(key) {
            Some(entry) => Ok(entry.lock().await.len()),
            None => Ok(0),
        }
    }

    async fn drain(&self, key: &str) -> Result<Vec<T>, CollectionError> {
        match self.queues.get(key) {
            Some(entry) => {
                let mut guard = entry.lock().await;
                Ok(guard.drain(..).collect())
            }
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Default)]
pub struct InMemorySet {
    sets: DashMap<String, Mutex<HashSet<u16>>>,
}

impl InMemorySet {
    pub fn new() -> Self {
        Self {
            sets: DashMap::new(),
        }
    }
}

#[async_trait]
impl SharedSet for InMemorySet {
    async fn add(&self, key: &str, member: u16) -> Result<bool, CollectionError> {
        let entry = self
            .sets
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(HashSet::new()));
        Ok(entry.lock().await.insert(member))
    }

    async fn remove(&self, key: &str, member: u16) -> Result<(), CollectionError> {
        if let Some(entry) = self.sets.get(key) {
            entry.lock().await.remove(&member);
        }
        Ok(())
    }

    async fn contains(&self, key: &str, member: u16) -> Result<bool, CollectionError> {
        match self.sets.get(key) {
            Some(entry) => Ok(entry.lock().await.contains(&member)),
            None => Ok(false),
        }
    }

    async fn len(&self, key: &str) -> Result<usize, CollectionError> {
        match self.sets.get(key) {
            Some(entry) => Ok(entry.lock().await.len()),
            None => Ok(0),
        }
    }
}

#[derive(Default)]
pub struct InMemoryMap<V> {
    maps: DashMap<String, Mutex<std::collections::HashMap<String, V>>>,
}

impl<V> InMemoryMap<V> {
    pub fn new() -> Self {
        Self {
            maps: DashMap::new(),
        }
    }
}

#[async_trait]
impl<V> SharedMap<V> for InMemoryMap<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + Clone,
{
    async fn get(&self, key: &str, field: &str) -> Result<Option<V>, CollectionError> {
        match self.maps.get(key) {
            Some(entry) => Ok(entry.lock().await.get(field).cloned()),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, field: &str, value: V) -> Result<(), CollectionError> {
        let entry = self
            .maps
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(std::collections::HashMap::new()));
        entry.lock().await.insert(field.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str, field: &str) -> Result<Option<V>, CollectionError> {
        match self.maps.get(key) {
            Some(entry) => Ok(entry.lock().await.remove(field)),
            None => Ok(None),
        }
    }

    async fn values(&self, key: &str) -> Result<Vec<V>, CollectionError> {
        match self.maps.get(key) {
            Some(entry) => Ok(entry.lock().await.values().cloned().collect()),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_is_fifo_per_key() {
        let q: InMemoryQueue<String> = InMemoryQueue::new();
        q.push("base", "a".to_string()).await.unwrap();
        q.push("base", "b".to_string()).await.unwrap();
        assert_eq!(q.len("base").await.unwrap(), 2);
        assert_eq!(q.pop("base").await.unwrap(), Some("a".to_string()));
        assert_eq!(q.pop("base").await.unwrap(), Some("b".to_string()));
        assert_eq!(q.pop("base").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_add_is_test_and_set() {
        let s = InMemorySet::new();
        assert!(s.add("ports", 8080).await.unwrap());
        assert!(!s.add("ports", 8080).await.unwrap());
        assert!(s.contains("ports", 8080).await.unwrap());
        s.remove("ports", 8080).await.unwrap();
        assert!(!s.contains("ports", 8080).await.unwrap());
    }

    #[tokio::test]
    async fn map_roundtrip() {
        let m: InMemoryMap<u32> = InMemoryMap::new();
        m.set("sessions", "s1", 1).await.unwrap();
        assert_eq!(m.get("sessions", "s1").await.unwrap(), Some(1));
        assert_eq!(m.remove("sessions", "s1").await.unwrap(), Some(1));
        assert_eq!(m.get("sessions", "s1").await.unwrap(), None);
    }
}
