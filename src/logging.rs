//! # 日志配置模块
//!
//! 提供日志初始化以及带统一结构化字段的日志宏。
//! 所有库代码都通过 `linfo!/ldebug!/lwarn!/lerror!` 记录日志，
//! 每条日志都携带 `request_id`、`stage`、`component`、`operation` 四个固定字段。

use std::env;
use std::fmt;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// 日志所处的处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStage {
    /// 启动
    Startup,
    /// 关闭
    Shutdown,
    /// 配置加载
    Configuration,
    /// 渠道与 Key 调度
    Scheduling,
    /// 数据库读写
    Db,
    /// 缓存读写
    Cache,
    /// 故障处理
    Failover,
    /// 通知投递
    Notification,
    /// 后台任务
    BackgroundTask,
    /// 管理操作
    Admin,
    /// 内部错误
    Internal,
}

impl LogStage {
    /// 转换为字符串
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Shutdown => "shutdown",
            Self::Configuration => "configuration",
            Self::Scheduling => "scheduling",
            Self::Db => "db",
            Self::Cache => "cache",
            Self::Failover => "failover",
            Self::Notification => "notification",
            Self::BackgroundTask => "background_task",
            Self::Admin => "admin",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for LogStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 产生日志的组件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogComponent {
    /// 主程序
    Main,
    /// 数据库
    Database,
    /// 缓存
    Cache,
    /// 能力索引
    AbilityIndex,
    /// 渠道选择器
    Selector,
    /// 多Key环
    KeyRing,
    /// 故障处理
    FailureHandler,
    /// 通知
    Notifier,
    /// 异步持久化队列
    Persistence,
    /// 对外门面
    Router,
    /// 配置
    Config,
}

impl LogComponent {
    /// 转换为字符串
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Database => "database",
            Self::Cache => "cache",
            Self::AbilityIndex => "ability_index",
            Self::Selector => "selector",
            Self::KeyRing => "key_ring",
            Self::FailureHandler => "failure_handler",
            Self::Notifier => "notifier",
            Self::Persistence => "persistence",
            Self::Router => "router",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for LogComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __relay_log {
    ($level:ident, $rid:expr, $stage:expr, $comp:expr, $op:expr, $desc:expr $(,)?) => {
        ::tracing::$level!(
            request_id = %$rid,
            stage = %$stage,
            component = %$comp,
            operation = %$op,
            "{}",
            $desc
        )
    };
    ($level:ident, $rid:expr, $stage:expr, $comp:expr, $op:expr, $desc:expr, $($fields:tt)+) => {
        ::tracing::$level!(
            request_id = %$rid,
            stage = %$stage,
            component = %$comp,
            operation = %$op,
            $($fields)+,
            "{}",
            $desc
        )
    };
}

/// INFO 级别结构化日志
#[macro_export]
macro_rules! linfo {
    ($($args:tt)+) => {
        $crate::__relay_log!(info, $($args)+)
    };
}

/// DEBUG 级别结构化日志
#[macro_export]
macro_rules! ldebug {
    ($($args:tt)+) => {
        $crate::__relay_log!(debug, $($args)+)
    };
}

/// WARN 级别结构化日志
#[macro_export]
macro_rules! lwarn {
    ($($args:tt)+) => {
        $crate::__relay_log!(warn, $($args)+)
    };
}

/// ERROR 级别结构化日志
#[macro_export]
macro_rules! lerror {
    ($($args:tt)+) => {
        $crate::__relay_log!(error, $($args)+)
    };
}

/// 初始化日志系统
///
/// `RUST_LOG` 优先；否则使用传入级别，并默认关闭 sqlx 的逐条查询日志。
pub fn init_logging(log_level: Option<&str>) {
    let level = log_level.unwrap_or("info");

    let default_filter = format!(
        "{level},channel_relay=debug,sqlx::query=off,sea_orm::query=warn,sqlx=warn"
    );

    let log_filter = env::var("RUST_LOG").unwrap_or(default_filter);

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_new(&log_filter).unwrap_or_else(|_| EnvFilter::new(level)))
        .with(
            tracing_fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_and_component_display() {
        assert_eq!(LogStage::Scheduling.to_string(), "scheduling");
        assert_eq!(LogStage::BackgroundTask.to_string(), "background_task");
        assert_eq!(LogComponent::KeyRing.to_string(), "key_ring");
        assert_eq!(LogComponent::FailureHandler.as_str(), "failure_handler");
    }

    #[test]
    fn test_macros_accept_both_forms() {
        crate::testing::init_test_env();
        let channel_id = 3;
        crate::linfo!("system", LogStage::Startup, LogComponent::Main, "plain", "no fields");
        crate::lwarn!(
            "req-1",
            LogStage::Scheduling,
            LogComponent::Selector,
            "with_fields",
            &format!("channel {channel_id}"),
            channel_id = channel_id,
            group = %"default"
        );
    }
}
