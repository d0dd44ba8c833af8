//! # 应用配置结构定义

use serde::{Deserialize, Serialize};

/// 应用主配置结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 数据库配置
    pub database: super::DatabaseConfig,
    /// 缓存配置（会话亲和映射使用）
    pub cache: CacheConfig,
    /// 路由配置
    pub routing: RoutingConfig,
    /// 通知配置
    pub notification: NotificationConfig,
    /// 异步持久化配置
    pub persistence: PersistenceConfig,
}

/// 缓存类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// 内存缓存
    #[default]
    Memory,
    /// Redis缓存
    Redis,
}

/// 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 缓存类型
    pub cache_type: CacheType,
    /// 内存缓存最大条目数
    pub memory_max_entries: u64,
    /// Redis 缓存配置
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: CacheType::Memory,
            memory_max_entries: 10000,
            redis: None,
        }
    }
}

/// Redis配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis连接URL
    pub url: String,
    /// 键前缀
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            key_prefix: "channel_relay".to_string(),
        }
    }
}

/// 路由配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// 是否启用内存渠道缓存；关闭时按 id 查询直接回源数据库
    pub memory_cache_enabled: bool,
    /// 渠道缓存同步间隔（秒）
    pub sync_frequency_secs: u64,
    /// 会话亲和映射有效期（分钟）
    pub affinity_ttl_minutes: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            memory_cache_enabled: true,
            sync_frequency_secs: 600,
            affinity_ttl_minutes: 5,
        }
    }
}

/// 通知配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// 每条事件流的缓冲容量
    pub queue_capacity: usize,
    /// Webhook 地址，未配置时只写日志
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Webhook 请求超时（秒）
    pub webhook_timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            webhook_url: None,
            webhook_timeout_secs: 10,
        }
    }
}

/// 异步持久化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// 持久化队列容量，满时丢弃任务并计数
    pub queue_capacity: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

impl AppConfig {
    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.is_empty() {
            return Err("database.url must not be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("database.max_connections must be greater than 0".to_string());
        }
        if self.cache.cache_type == CacheType::Redis {
            match &self.cache.redis {
                Some(redis) if !redis.url.is_empty() => {}
                _ => return Err("cache.redis.url is required when cache_type = \"redis\"".to_string()),
            }
        }
        if self.cache.memory_max_entries == 0 {
            return Err("cache.memory_max_entries must be greater than 0".to_string());
        }
        if self.routing.sync_frequency_secs == 0 {
            return Err("routing.sync_frequency_secs must be greater than 0".to_string());
        }
        if self.routing.affinity_ttl_minutes == 0 {
            return Err("routing.affinity_ttl_minutes must be greater than 0".to_string());
        }
        if self.notification.queue_capacity == 0 {
            return Err("notification.queue_capacity must be greater than 0".to_string());
        }
        if self.persistence.queue_capacity == 0 {
            return Err("persistence.queue_capacity must be greater than 0".to_string());
        }
        Ok(())
    }
}
