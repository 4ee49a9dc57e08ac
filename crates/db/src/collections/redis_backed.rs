//! Redis-backed collection implementations, used when
//! `SANDBOX_REDIS_ENABLED=true` so multiple manager replicas can share the
//! warm pool, the port-reservation set, and the session index (§4.3).
//!
//! `SADD`'s "returns 1 iff the member was newly added" semantics is exactly
//! the atomic test-and-set primitive the port arbiter needs, so
//! [`RedisSet::add`] maps directly onto it with no extra locking.

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;

use super::{SharedMap, SharedQueue, SharedSet};
use crate::error::CollectionError;

fn to_backend_err(e: redis::RedisError) -> CollectionError {
    CollectionError::Backend(e.to_string())
}

/// Opens a connection manager for `url`, so callers outside this crate
/// (the driver registry) never need a direct `redis` dependency of their
/// own just to wire up the shared collections.
pub async fn connect(url: &str) -> Result<ConnectionManager, CollectionError> {
    let client = redis::Client::open(url).map_err(to_backend_err)?;
    client.get_connection_manager().await.map_err(to_backend_err)
}

pub struct RedisQueue<T> {
    conn: Mutex<ConnectionManager>,
    _marker: std::marker::PhantomData<T>,
}

impl<T> RedisQueue<T> {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn: Mutex::new(conn),
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<T> SharedQueue<T> for RedisQueue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn push(&self, key: &str, item: T) -> Result<(), CollectionError> {
        let payload = serde_json::to_string(&item)
            .map_err(|e| CollectionError::Backend(e.to_string()))?;
        let mut conn = self.conn.lock().await;
        let _: i64 = conn.rpush(key, payload).await.map_err(to_backend_err)?;
        Ok(())
    }

    async fn pop(&self, key: &str) -> Result<Option<T>, CollectionError> {
        let mut conn = self.conn.lock().await;
        let raw: Option<String> = conn.lpop(key, None).await.map_err(to_backend_err)?;
        raw.map(|s| serde_json::from_str(&s).map_err(|e| CollectionError::Backend(e.to_string())))
            .transpose()
    }

    async fn len(&self, key: &str) -> Result<usize, CollectionError> {
        let mut conn = self.conn.lock().await;
        let len: i64 = conn.llen(key).await.map_err(to_backend_err)?;
        Ok(len as usize)
    }

    async fn drain(&self, key: &str) -> Result<Vec<T>, CollectionError> {
        let mut out = Vec::new();
        while let Some(item) = self.pop(key).await? {
            out.push(item);
        }
        Ok(out)
    }
}

pub struct RedisSet {
    conn: Mutex<ConnectionManager>,
}

impl RedisSet {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

#[async_trait]
impl SharedSet for RedisSet {
    async fn add(&self, key: &str, member: u16) -> Result<bool, CollectionError> {
        let mut conn = self.conn.lock().await;
        let added: i64 = conn.sadd(key, member).await.map_err(to_backend_err)?;
        Ok(added == 1)
    }

    async fn remove(&self, key: &str, member: u16) -> Result<(), CollectionError> {
        let mut conn = self.conn.lock().await;
        let _: i64 = conn.srem(key, member).await.map_err(to_backend_err)?;
        Ok(())
    }

    async fn contains(&self, key: &str, member: u16) -> Result<bool, CollectionError> {
        let mut conn = self.conn.lock().await;
        conn.sismember(key, member).await.map_err(to_backend_err)
    }

    async fn len(&self, key: &str) -> Result<usize, CollectionError> {
        let mut conn = self.conn.lock().await;
        let len: i64 = conn.scard(key).await.map_err(to_backend_err)?;
        Ok(len as usize)
    }
}

pub struct RedisMap<V> {
    conn: Mutex<ConnectionManager>,
    _marker: std::marker::PhantomData<V>,
}

impl<V> RedisMap<V> {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn: Mutex::new(conn),
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<V> SharedMap<V> for RedisMap<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, key: &str, field: &str) -> Result<Option<V>, CollectionError> {
        let mut conn = self.conn.lock().await;
        let raw: Option<String> = conn.hget(key, field).await.map_err(to_backend_err)?;
        raw.map(|s| serde_json::from_str(&s).map_err(|e| CollectionError::Backend(e.to_string())))
            .transpose()
    }

    async fn set(&self, key: &str, field: &str, value: V) -> Result<(), CollectionError> {
        let payload = serde_json::to_string(&value)
            .map_err(|e| CollectionError::Backend(e.to_string()))?;
        let mut conn = self.conn.lock().await;
        let _: () = conn.hset(key, field, payload).await.map_err(to_backend_err)?;
        Ok(())
    }

    async fn remove(&self, key: &str, field: &str) -> Result<Option<V>, CollectionError> {
        let existing = self.get(key, field).await?;
        let mut conn = self.conn.lock().await;
        let _: i64 = conn.hdel(key, field).await.map_err(to_backend_err)?;
        Ok(existing)
    }

    async fn values(&self, key: &str) -> Result<Vec<V>, CollectionError> {
        let mut conn = self.conn.lock().await;
        let raw: Vec<String> = conn.hvals(key).await.map_err(to_backend_err)?;
        raw.into_iter()
            .map(|s| serde_json::from_str(&s).map_err(|e| CollectionError::Backend(e.to_string())))
            .collect()
    }
}
