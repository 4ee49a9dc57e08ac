//! Process-wide or shared-store collection abstractions (§2 "Collections").
//!
//! Everything above this layer — the warm pool, the port-reservation set,
//! and the session→container index — is written against these traits, not
//! against `HashMap`/`VecDeque` or a Redis client directly. Two
//! implementations exist per trait: an in-process one (single manager
//! replica) and a Redis-backed one (multiple replicas sharing state). Which
//! one is wired up is decided once, at startup, from `ManagerConfig`.

pub mod in_memory;
pub mod redis_backed;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::CollectionError;

/// A FIFO queue of items, used for the per-type warm pool.
#[async_trait]
pub trait SharedQueue<T>: Send + Sync
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn push(&self, key: &str, item: T) -> Result<(), CollectionError>;
    async fn pop(&self, key: &str) -> Result<Option<T>, CollectionError>;
    async fn len(&self, key: &str) -> Result<usize, CollectionError>;
    async fn is_empty(&self, key: &str) -> Result<bool, CollectionError> {
        Ok(self.len(key).await? == 0)
    }
    /// Removes every item under `key`, returning what was drained. Used by
    /// `cleanup()` to tear down pooled containers at shutdown.
    async fn drain(&self, key: &str) -> Result<Vec<T>, CollectionError>;
}

/// A set used for the port-reservation set (§4.3): membership is the
/// authoritative lock, so `add` must be an atomic test-and-set returning
/// whether the member was newly inserted.
#[async_trait]
pub trait SharedSet: Send + Sync {
    /// Atomically adds `member`. Returns `true` iff it was not already
    /// present — the caller only proceeds to bind the port on `true`.
    async fn add(&self, key: &str, member: u16) -> Result<bool, CollectionError>;
    async fn remove(&self, key: &str, member: u16) -> Result<(), CollectionError>;
    async fn contains(&self, key: &str, member: u16) -> Result<bool, CollectionError>;
    async fn len(&self, key: &str) -> Result<usize, CollectionError>;
}

/// A key→value mapping, used for the session→container index.
#[async_trait]
pub trait SharedMap<V>: Send + Sync
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, key: &str, field: &str) -> Result<Option<V>, CollectionError>;
    async fn set(&self, key: &str, field: &str, value: V) -> Result<(), CollectionError>;
    async fn remove(&self, key: &str, field: &str) -> Result<Option<V>, CollectionError>;
    async fn values(&self, key: &str) -> Result<Vec<V>, CollectionError>;
}
