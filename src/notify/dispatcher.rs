//! # 通知分发
//!
//! 每条事件流一个监听任务，渲染消息后交给 [`Notifier`] 投递。投递失败只记日志。

use super::hub::NotificationStreams;
use super::notifier::Notifier;
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lwarn};
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// 启动两个监听任务，发送端全部关闭后任务自然退出
    pub fn spawn(self, streams: NotificationStreams) -> Vec<JoinHandle<()>> {
        let NotificationStreams {
            mut key_disabled,
            mut channel_disabled,
        } = streams;

        let key_notifier = Arc::clone(&self.notifier);
        let key_task = tokio::spawn(async move {
            while let Some(event) = key_disabled.recv().await {
                let message = event.render();
                deliver(key_notifier.as_ref(), &message.subject, &message.body, event.channel_id)
                    .await;
            }
            ldebug!(
                "system",
                LogStage::Shutdown,
                LogComponent::Notifier,
                "key_listener_stopped",
                "Key 禁用通知监听已退出"
            );
        });

        let channel_notifier = Arc::clone(&self.notifier);
        let channel_task = tokio::spawn(async move {
            while let Some(event) = channel_disabled.recv().await {
                let message = event.render();
                deliver(
                    channel_notifier.as_ref(),
                    &message.subject,
                    &message.body,
                    event.channel_id,
                )
                .await;
            }
            ldebug!(
                "system",
                LogStage::Shutdown,
                LogComponent::Notifier,
                "channel_listener_stopped",
                "渠道禁用通知监听已退出"
            );
        });

        vec![key_task, channel_task]
    }
}

async fn deliver(notifier: &dyn Notifier, subject: &str, body: &str, channel_id: i32) {
    if let Err(e) = notifier.send(subject, body).await {
        lwarn!(
            "system",
            LogStage::Notification,
            LogComponent::Notifier,
            "deliver_failed",
            "通知投递失败",
            channel_id = channel_id,
            error = %e
        );
    }
}
