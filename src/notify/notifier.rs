//! # 通知投递

use crate::error::{RelayError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{linfo, lwarn};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// 通知投递通道
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<()>;
}

/// 只写日志的投递实现，未配置 webhook 时使用
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        linfo!(
            "system",
            LogStage::Notification,
            LogComponent::Notifier,
            "notification",
            subject,
            body = body
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
}

/// 以 JSON POST 投递到 webhook
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::notification_with_source("构建 webhook 客户端失败", e))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { subject, body })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            lwarn!(
                "system",
                LogStage::Notification,
                LogComponent::Notifier,
                "webhook_rejected",
                "webhook 返回非成功状态",
                status = status.as_u16()
            );
            return Err(RelayError::notification(format!(
                "webhook 返回状态码 {}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}
