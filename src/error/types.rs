//! # 错误类型定义

use super::ErrorCategory;
use thiserror::Error;

/// 路由核心的主要错误类型
#[derive(Debug, Error)]
pub enum RelayError {
    /// 输入不合法，调用方不应重试
    #[error("参数错误: {message}")]
    Validation { message: String },

    /// 资源不存在
    #[error("资源未找到: {resource_type} {identifier}")]
    NotFound {
        resource_type: String,
        identifier: String,
    },

    /// 没有可用的渠道或 Key
    #[error("资源耗尽: {message}")]
    Exhausted { message: String },

    /// 持久化失败，已经返回的调度结果不会回滚
    #[error("持久化错误: {message}")]
    Persistence {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 数据库相关错误
    #[error("数据库错误: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 缓存相关错误
    #[error("缓存错误: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 配置相关错误
    #[error("配置错误: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 序列化/反序列化错误
    #[error("序列化错误: {message}")]
    Serialization {
        message: String,
        #[source]
        source: anyhow::Error,
    },

    /// 通知投递错误
    #[error("通知错误: {message}")]
    Notification {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 系统内部错误
    #[error("内部错误: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// IO相关错误
    #[error("IO错误: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// 带上下文的错误
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<RelayError>,
    },
}

impl RelayError {
    /// 创建参数错误
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// 创建资源未找到错误
    pub fn not_found<T: Into<String>, I: ToString>(resource_type: T, identifier: I) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            identifier: identifier.to_string(),
        }
    }

    /// 创建资源耗尽错误
    pub fn exhausted<T: Into<String>>(message: T) -> Self {
        Self::Exhausted {
            message: message.into(),
        }
    }

    /// 创建持久化错误
    pub fn persistence<T: Into<String>>(message: T) -> Self {
        Self::Persistence {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的持久化错误
    pub fn persistence_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Persistence {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建数据库错误
    pub fn database<T: Into<String>>(message: T) -> Self {
        Self::Database {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的数据库错误
    pub fn database_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Database {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建缓存错误
    pub fn cache<T: Into<String>>(message: T) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的缓存错误
    pub fn cache_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Cache {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建配置错误
    pub fn config<T: Into<String>>(message: T) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的配置错误
    pub fn config_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建通知错误
    pub fn notification<T: Into<String>>(message: T) -> Self {
        Self::Notification {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的通知错误
    pub fn notification_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Notification {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建内部错误
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的内部错误
    pub fn internal_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 错误归类，供调用方决定是否重试或降级
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } | Self::NotFound { .. } => ErrorCategory::Client,
            Self::Exhausted { .. } => ErrorCategory::Capacity,
            Self::Context { source, .. } => source.category(),
            _ => ErrorCategory::Server,
        }
    }

    /// 是否为资源耗尽（调用方可以选择降级到下一优先级）
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.category() == ErrorCategory::Capacity
    }
}

// 自动转换常见错误类型
impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: "文件操作失败".to_string(),
            source: err,
        }
    }
}

impl From<toml::de::Error> for RelayError {
    fn from(err: toml::de::Error) -> Self {
        Self::config_with_source("TOML解析失败", err)
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: "JSON处理失败".to_string(),
            source: err.into(),
        }
    }
}

impl From<sea_orm::error::DbErr> for RelayError {
    fn from(err: sea_orm::error::DbErr) -> Self {
        Self::database_with_source("数据库操作失败", err)
    }
}

// Redis错误转换
impl From<redis::RedisError> for RelayError {
    fn from(err: redis::RedisError) -> Self {
        Self::cache_with_source("Redis操作失败", err)
    }
}

// Reqwest错误转换
impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        Self::notification_with_source("HTTP请求失败", err)
    }
}
