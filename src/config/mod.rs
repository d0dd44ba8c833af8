//! # 配置管理模块
//!
//! 处理应用配置加载与验证

mod app_config;
mod database;

pub use app_config::{
    AppConfig, CacheConfig, CacheType, NotificationConfig, PersistenceConfig, RedisConfig,
    RoutingConfig,
};
pub use database::DatabaseConfig;

use crate::error::{RelayError, Result};
use crate::{linfo, logging::{LogComponent, LogStage}};
use std::env;
use std::path::Path;

/// 按 `RUST_ENV` 加载 `config/config.{env}.toml`
pub fn load_config() -> Result<AppConfig> {
    let env = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
    let config_file = format!("config/config.{env}.toml");
    load_config_from(&config_file)
}

/// 从指定路径加载配置，`DATABASE_URL` 环境变量覆盖 `database.url`
pub fn load_config_from(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(RelayError::config(format!(
            "配置文件不存在: {}",
            path.display()
        )));
    }

    let config_content = std::fs::read_to_string(path).map_err(|e| {
        RelayError::config_with_source(format!("读取配置文件失败: {}", path.display()), e)
    })?;

    let mut config = parse_config(&config_content)?;

    if let Ok(url) = env::var("DATABASE_URL") {
        config.database.url = url;
    }

    config.validate().map_err(RelayError::config)?;

    linfo!(
        "system",
        LogStage::Configuration,
        LogComponent::Config,
        "config_loaded",
        "配置加载完成",
        path = %path.display(),
        cache_type = ?config.cache.cache_type
    );

    Ok(config)
}

/// 解析 TOML 配置文本，缺省字段使用默认值
pub fn parse_config(content: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.routing.sync_frequency_secs, 600);
        assert_eq!(config.notification.queue_capacity, 100);
        assert_eq!(config.cache.cache_type, CacheType::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections_merge_with_defaults() {
        let config = parse_config(
            r#"
            [routing]
            affinity_ttl_minutes = 30

            [notification]
            webhook_url = "https://hooks.example.com/relay"
            "#,
        )
        .unwrap();

        assert_eq!(config.routing.affinity_ttl_minutes, 30);
        assert!(config.routing.memory_cache_enabled);
        assert_eq!(
            config.notification.webhook_url.as_deref(),
            Some("https://hooks.example.com/relay")
        );
    }

    #[test]
    fn test_redis_cache_requires_url() {
        let config = parse_config(
            r#"
            [cache]
            cache_type = "redis"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = parse_config("[routing\nbroken").unwrap_err();
        assert!(matches!(err, RelayError::Config { .. }));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.test.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[routing]\nsync_frequency_secs = 15").unwrap();
        writeln!(file, "[persistence]\nqueue_capacity = 64").unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.routing.sync_frequency_secs, 15);
        assert_eq!(config.persistence.queue_capacity, 64);
    }

    #[test]
    fn test_zero_capacity_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.bad.toml");
        std::fs::write(&path, "[notification]\nqueue_capacity = 0\n").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("notification.queue_capacity"));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = load_config_from("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, RelayError::Config { .. }));
    }
}
