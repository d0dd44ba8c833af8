//! # 通知事件

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 多Key渠道中某个 Key 被自动禁用
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyDisabledEvent {
    pub channel_id: i32,
    pub channel_name: String,
    pub key_index: usize,
    pub masked_key: String,
    pub error_message: String,
    pub status_code: Option<u16>,
    pub disabled_at: DateTime<Utc>,
}

/// 渠道被自动禁用
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelDisabledEvent {
    pub channel_id: i32,
    pub channel_name: String,
    pub reason: String,
    /// 多Key渠道因全部 Key 不可用而被禁用
    pub multi_key: bool,
    pub disabled_at: DateTime<Utc>,
}

/// 渲染好的通知消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

fn local_time(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format(TIME_FORMAT).to_string()
}

impl KeyDisabledEvent {
    #[must_use]
    pub fn render(&self) -> RenderedMessage {
        let status = self
            .status_code
            .map_or_else(|| "-".to_string(), |code| code.to_string());
        RenderedMessage {
            subject: format!(
                "多Key渠道「{}」（#{}）中的Key已被禁用",
                self.channel_name, self.channel_id
            ),
            body: format!(
                "渠道名称：{}\n渠道ID：#{}\n被禁用的Key：Key #{} ({})\n禁用原因：{}\n状态码：{}\n禁用时间：{}\n\n\
                 该Key因出现错误已被系统自动禁用，请检查Key的有效性。如果所有Key都被禁用，整个渠道也将被禁用。",
                self.channel_name,
                self.channel_id,
                self.key_index,
                self.masked_key,
                self.error_message,
                status,
                local_time(&self.disabled_at)
            ),
        }
    }
}

impl ChannelDisabledEvent {
    #[must_use]
    pub fn render(&self) -> RenderedMessage {
        if self.multi_key {
            RenderedMessage {
                subject: format!(
                    "多Key渠道「{}」（#{}）已被完全禁用",
                    self.channel_name, self.channel_id
                ),
                body: format!(
                    "渠道名称：{}\n渠道ID：#{}\n禁用原因：{}\n禁用时间：{}\n\n\
                     该渠道的所有Key都已被禁用，因此整个渠道已被系统自动禁用。请检查并修复所有Key的问题后重新启用。",
                    self.channel_name,
                    self.channel_id,
                    self.reason,
                    local_time(&self.disabled_at)
                ),
            }
        } else {
            RenderedMessage {
                subject: format!("渠道「{}」（#{}）已被禁用", self.channel_name, self.channel_id),
                body: format!(
                    "渠道名称：{}\n渠道ID：#{}\n禁用原因：{}\n禁用时间：{}\n\n\
                     该渠道因出现错误已被系统自动禁用，请检查渠道配置和密钥的有效性。",
                    self.channel_name,
                    self.channel_id,
                    self.reason,
                    local_time(&self.disabled_at)
                ),
            }
        }
    }
}
