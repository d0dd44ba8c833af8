//! # 通知事件流
//!
//! 两条独立的有界事件流。生产者只做 `try_send`，流满时丢弃事件并计数，热路径永不阻塞。

use super::events::{ChannelDisabledEvent, KeyDisabledEvent};
use crate::{logging::{LogComponent, LogStage}, lwarn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// 事件流接收端，交给 [`super::NotificationDispatcher`] 消费
pub struct NotificationStreams {
    pub key_disabled: mpsc::Receiver<KeyDisabledEvent>,
    pub channel_disabled: mpsc::Receiver<ChannelDisabledEvent>,
}

/// 事件流发送端
#[derive(Clone)]
pub struct NotificationHub {
    key_tx: mpsc::Sender<KeyDisabledEvent>,
    channel_tx: mpsc::Sender<ChannelDisabledEvent>,
    dropped: Arc<AtomicU64>,
}

impl NotificationHub {
    /// 创建容量为 `capacity` 的两条事件流
    pub fn new(capacity: usize) -> (Self, NotificationStreams) {
        let (key_tx, key_rx) = mpsc::channel(capacity.max(1));
        let (channel_tx, channel_rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                key_tx,
                channel_tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            NotificationStreams {
                key_disabled: key_rx,
                channel_disabled: channel_rx,
            },
        )
    }

    /// 发布 Key 禁用事件，返回是否入队成功
    pub fn publish_key_disabled(&self, event: KeyDisabledEvent) -> bool {
        match self.key_tx.try_send(event) {
            Ok(()) => true,
            Err(err) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                let event = match err {
                    mpsc::error::TrySendError::Full(event)
                    | mpsc::error::TrySendError::Closed(event) => event,
                };
                lwarn!(
                    "system",
                    LogStage::Notification,
                    LogComponent::Notifier,
                    "key_event_dropped",
                    "Key 禁用通知队列已满或已关闭，事件被丢弃",
                    channel_id = event.channel_id,
                    key_index = event.key_index
                );
                false
            }
        }
    }

    /// 发布渠道禁用事件，返回是否入队成功
    pub fn publish_channel_disabled(&self, event: ChannelDisabledEvent) -> bool {
        match self.channel_tx.try_send(event) {
            Ok(()) => true,
            Err(err) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                let event = match err {
                    mpsc::error::TrySendError::Full(event)
                    | mpsc::error::TrySendError::Closed(event) => event,
                };
                lwarn!(
                    "system",
                    LogStage::Notification,
                    LogComponent::Notifier,
                    "channel_event_dropped",
                    "渠道禁用通知队列已满或已关闭，事件被丢弃",
                    channel_id = event.channel_id
                );
                false
            }
        }
    }

    /// 累计丢弃的事件数
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn channel_event(id: i32) -> ChannelDisabledEvent {
        ChannelDisabledEvent {
            channel_id: id,
            channel_name: format!("c{id}"),
            reason: "all keys disabled".to_string(),
            multi_key: true,
            disabled_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_full_stream_drops_without_blocking() {
        let (hub, mut streams) = NotificationHub::new(2);
        assert!(hub.publish_channel_disabled(channel_event(1)));
        assert!(hub.publish_channel_disabled(channel_event(2)));
        assert!(!hub.publish_channel_disabled(channel_event(3)));
        assert_eq!(hub.dropped(), 1);

        assert_eq!(streams.channel_disabled.recv().await.unwrap().channel_id, 1);
        assert_eq!(streams.channel_disabled.recv().await.unwrap().channel_id, 2);
    }

    #[tokio::test]
    async fn test_streams_are_independent() {
        let (hub, mut streams) = NotificationHub::new(1);
        assert!(hub.publish_channel_disabled(channel_event(1)));
        assert!(hub.publish_key_disabled(KeyDisabledEvent {
            channel_id: 1,
            channel_name: "c1".to_string(),
            key_index: 0,
            masked_key: "k".to_string(),
            error_message: "quota".to_string(),
            status_code: Some(429),
            disabled_at: Utc::now(),
        }));
        assert_eq!(hub.dropped(), 0);
        assert_eq!(streams.key_disabled.recv().await.unwrap().status_code, Some(429));
    }

    #[tokio::test]
    async fn test_closed_stream_counts_as_dropped() {
        let (hub, streams) = NotificationHub::new(4);
        drop(streams);
        assert!(!hub.publish_channel_disabled(channel_event(9)));
        assert_eq!(hub.dropped(), 1);
    }
}
