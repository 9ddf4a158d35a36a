//! 只读展示缓存的存取契约（get/set/delete/hash 字段）
//!
//! 仅供缓存同步层使用，准入链路不会读取这里的任何数据。

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> AppResult<()>;
    async fn delete(&self, key: &str) -> AppResult<()>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> AppResult<()>;
    async fn hget(&self, key: &str, field: &str) -> AppResult<Option<String>>;
    async fn hgetall(&self, key: &str) -> AppResult<HashMap<String, String>>;
    async fn hdel(&self, key: &str, field: &str) -> AppResult<()>;
}

/// 进程内缓存实现（开发 / 测试）
#[derive(Default)]
pub struct MemoryCache {
    strings: RwLock<HashMap<String, String>>,
    hashes: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前所有 key（测试断言用）
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.strings.read().await.keys().cloned().collect();
        keys.extend(self.hashes.read().await.keys().cloned());
        keys.sort();
        keys
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.strings.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.strings
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.strings.write().await.remove(key);
        self.hashes.write().await.remove(key);
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> AppResult<()> {
        self.hashes
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> AppResult<Option<String>> {
        Ok(self
            .hashes
            .read()
            .await
            .get(key)
            .and_then(|h| h.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> AppResult<HashMap<String, String>> {
        Ok(self
            .hashes
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn hdel(&self, key: &str, field: &str) -> AppResult<()> {
        let mut hashes = self.hashes.write().await;
        if let Some(h) = hashes.get_mut(key) {
            h.remove(field);
            if h.is_empty() {
                hashes.remove(key);
            }
        }
        Ok(())
    }
}

/// Redis 缓存实现
#[derive(Clone)]
pub struct RedisCache {
    conn_manager: ConnectionManager,
}

impl RedisCache {
    pub async fn new(redis_url: &str) -> AppResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::CacheError(format!("Failed to create Redis client: {e}")))?;
        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            AppError::CacheError(format!("Failed to create Redis connection manager: {e}"))
        })?;
        Ok(Self { conn_manager })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.conn_manager.clone();
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut conn = self.conn_manager.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn_manager.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> AppResult<()> {
        let mut conn = self.conn_manager.clone();
        conn.hset::<_, _, _, ()>(key, field, value).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> AppResult<Option<String>> {
        let mut conn = self.conn_manager.clone();
        Ok(conn.hget::<_, _, Option<String>>(key, field).await?)
    }

    async fn hgetall(&self, key: &str) -> AppResult<HashMap<String, String>> {
        let mut conn = self.conn_manager.clone();
        Ok(conn.hgetall::<_, HashMap<String, String>>(key).await?)
    }

    async fn hdel(&self, key: &str, field: &str) -> AppResult<()> {
        let mut conn = self.conn_manager.clone();
        conn.hdel::<_, _, ()>(key, field).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_hash_roundtrip_and_cleanup() {
        let cache = MemoryCache::new();
        cache.hset("mall:stock:1", "sold", "3").await.unwrap();
        cache.hset("mall:stock:1", "quantity", "10").await.unwrap();
        assert_eq!(
            cache.hget("mall:stock:1", "sold").await.unwrap().as_deref(),
            Some("3")
        );
        assert_eq!(cache.hgetall("mall:stock:1").await.unwrap().len(), 2);

        cache.hdel("mall:stock:1", "sold").await.unwrap();
        cache.hdel("mall:stock:1", "quantity").await.unwrap();
        assert!(cache.keys().await.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_both_kinds() {
        let cache = MemoryCache::new();
        cache.set("k", "v").await.unwrap();
        cache.hset("k", "f", "v").await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.hgetall("k").await.unwrap().is_empty());
    }
}
