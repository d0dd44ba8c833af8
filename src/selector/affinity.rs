//! # 会话亲和
//!
//! 亲和键到渠道 ID 的短 TTL 映射。内存实现基于 moka，分布式部署时使用 Redis。

use crate::config::{CacheConfig, CacheType, RoutingConfig};
use crate::error::{RelayError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, linfo};
use async_trait::async_trait;
use moka::future::Cache;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use std::sync::Arc;
use std::time::Duration;

/// 亲和映射存储
#[async_trait]
pub trait AffinityStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<i32>>;

    /// 把一组亲和键原子地绑定到同一个渠道
    async fn bind(&self, keys: &[String], channel_id: i32) -> Result<()>;
}

/// 进程内亲和存储
pub struct MemoryAffinityStore {
    cache: Cache<String, i32>,
}

impl MemoryAffinityStore {
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        Self {
            cache: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(max_entries)
                .build(),
        }
    }
}

#[async_trait]
impl AffinityStore for MemoryAffinityStore {
    async fn get(&self, key: &str) -> Result<Option<i32>> {
        Ok(self.cache.get(key).await)
    }

    async fn bind(&self, keys: &[String], channel_id: i32) -> Result<()> {
        for key in keys {
            self.cache.insert(key.clone(), channel_id).await;
        }
        Ok(())
    }
}

/// Redis 亲和存储
pub struct RedisAffinityStore {
    connection_manager: ConnectionManager,
    key_prefix: String,
    ttl_seconds: u64,
}

impl RedisAffinityStore {
    pub async fn connect(url: &str, key_prefix: &str, ttl: Duration) -> Result<Self> {
        linfo!(
            "system",
            LogStage::Cache,
            LogComponent::Cache,
            "connect_to_redis",
            "正在连接 Redis 亲和存储"
        );

        let client = Client::open(url)
            .map_err(|e| RelayError::cache_with_source("创建 Redis 客户端失败", e))?;
        let connection_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| RelayError::cache_with_source("建立 Redis 连接失败", e))?;

        Ok(Self {
            connection_manager,
            key_prefix: key_prefix.to_string(),
            ttl_seconds: ttl.as_secs().max(1),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:affinity:{key}", self.key_prefix)
    }
}

#[async_trait]
impl AffinityStore for RedisAffinityStore {
    async fn get(&self, key: &str) -> Result<Option<i32>> {
        let mut conn = self.connection_manager.clone();
        let full_key = self.full_key(key);
        conn.get::<_, Option<i32>>(&full_key)
            .await
            .map_err(|e| RelayError::cache_with_source(format!("读取亲和映射失败: {full_key}"), e))
    }

    async fn bind(&self, keys: &[String], channel_id: i32) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in keys {
            pipe.set_ex(self.full_key(key), channel_id, self.ttl_seconds)
                .ignore();
        }

        let mut conn = self.connection_manager.clone();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| RelayError::cache_with_source("写入亲和映射失败", e))?;

        ldebug!(
            "system",
            LogStage::Cache,
            LogComponent::Cache,
            "bind_affinity",
            "亲和映射已写入",
            channel_id = channel_id,
            keys = keys.len()
        );
        Ok(())
    }
}

/// 按缓存配置选择亲和存储实现
pub async fn build_affinity_store(
    cache: &CacheConfig,
    routing: &RoutingConfig,
) -> Result<Arc<dyn AffinityStore>> {
    let ttl = Duration::from_secs(routing.affinity_ttl_minutes * 60);
    match cache.cache_type {
        CacheType::Memory => Ok(Arc::new(MemoryAffinityStore::new(
            ttl,
            cache.memory_max_entries,
        ))),
        CacheType::Redis => {
            let redis = cache
                .redis
                .as_ref()
                .ok_or_else(|| RelayError::config("cache_type 为 redis 时必须配置 [cache.redis]"))?;
            Ok(Arc::new(
                RedisAffinityStore::connect(&redis.url, &redis.key_prefix, ttl).await?,
            ))
        }
    }
}
