//! # 禁用通知
//!
//! Key 或渠道被自动禁用时发布事件，由后台任务渲染并投递。

mod dispatcher;
mod events;
mod hub;
mod notifier;

pub use dispatcher::NotificationDispatcher;
pub use events::{ChannelDisabledEvent, KeyDisabledEvent, RenderedMessage};
pub use hub::{NotificationHub, NotificationStreams};
pub use notifier::{LogNotifier, Notifier, WebhookNotifier};

use crate::config::NotificationConfig;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;

/// 按配置构建投递通道：配置了 webhook 则走 HTTP，否则只写日志
pub fn build_notifier(config: &NotificationConfig) -> Result<Arc<dyn Notifier>> {
    match &config.webhook_url {
        Some(url) if !url.trim().is_empty() => Ok(Arc::new(WebhookNotifier::new(
            url.trim(),
            Duration::from_secs(config.webhook_timeout_secs),
        )?)),
        _ => Ok(Arc::new(LogNotifier)),
    }
}
