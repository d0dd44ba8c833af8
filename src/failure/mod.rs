//! # 故障处理
//!
//! Key 级自动禁用、向渠道级的级联禁用，以及单 Key 渠道的整体禁用。
//! 这里只计算状态变化和待发布事件，落库与发布由调用方完成。
//!
//! 自动路径只会禁用，从不重新启用：处于 `AutoDisabled` 的渠道即使重新有了可用 Key，
//! 也要等管理员手动启用。

use crate::key_ring::KeyRing;
use crate::logging::{LogComponent, LogStage};
use crate::notify::{ChannelDisabledEvent, KeyDisabledEvent};
use crate::{linfo, lwarn};
use chrono::{DateTime, Utc};
use entity::channels;
use entity::sea_orm_active_enums::ChannelStatus;

pub const REASON_NO_KEYS: &str = "no keys available";
pub const REASON_ALL_KEYS_DISABLED: &str = "all keys disabled";

/// 渠道复检结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recheck {
    /// 渠道状态未发生迁移
    Unchanged,
    /// 渠道刚刚被自动禁用
    Disabled(ChannelDisabledEvent),
}

impl Recheck {
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled(_))
    }

    #[must_use]
    pub fn into_event(self) -> Option<ChannelDisabledEvent> {
        match self {
            Self::Unchanged => None,
            Self::Disabled(event) => Some(event),
        }
    }
}

/// 一次 Key 故障产生的影响
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFailure {
    pub key_disabled: KeyDisabledEvent,
    pub recheck: Recheck,
}

fn channel_event(channel: &channels::Model, reason: &str, at: DateTime<Utc>) -> ChannelDisabledEvent {
    ChannelDisabledEvent {
        channel_id: channel.id,
        channel_name: channel.name.clone(),
        reason: reason.to_string(),
        multi_key: channel.multi_key_info.is_multi_key,
        disabled_at: at,
    }
}

fn auto_disable(channel: &mut channels::Model, reason: &str, at: DateTime<Utc>) -> Recheck {
    let was_auto_disabled = channel.status == ChannelStatus::AutoDisabled;
    channel.status = ChannelStatus::AutoDisabled;
    channel.auto_disabled_reason = Some(reason.to_string());
    channel.auto_disabled_time = Some(at.timestamp());

    if was_auto_disabled {
        Recheck::Unchanged
    } else {
        Recheck::Disabled(channel_event(channel, reason, at))
    }
}

/// 按当前 Key 状态复检多Key渠道，并刷新 Key 计数
///
/// 单 Key 渠道不受影响。
pub fn recheck(channel: &mut channels::Model, at: DateTime<Utc>) -> Recheck {
    if !channel.is_multi_key() {
        return Recheck::Unchanged;
    }

    let stats = channel.key_stats();
    channel.multi_key_info.key_count = stats.total;
    channel.multi_key_info.enabled_key_count = stats.enabled;

    if stats.total == 0 {
        let result = auto_disable(channel, REASON_NO_KEYS, at);
        if result.is_disabled() {
            lwarn!(
                "system",
                LogStage::Failover,
                LogComponent::FailureHandler,
                "channel_auto_disabled",
                "渠道没有任何 Key，已自动禁用",
                channel_id = channel.id
            );
        }
        return result;
    }

    if stats.enabled == 0 {
        let result = auto_disable(channel, REASON_ALL_KEYS_DISABLED, at);
        if result.is_disabled() {
            lwarn!(
                "system",
                LogStage::Failover,
                LogComponent::FailureHandler,
                "channel_auto_disabled",
                "渠道所有 Key 均已禁用，已自动禁用",
                channel_id = channel.id,
                total_keys = stats.total,
                auto_disabled = stats.auto_disabled,
                manually_disabled = stats.manually_disabled
            );
        }
        return result;
    }

    if channel.status == ChannelStatus::AutoDisabled {
        linfo!(
            "system",
            LogStage::Failover,
            LogComponent::FailureHandler,
            "awaiting_manual_enable",
            "渠道已有可用 Key 但仍处于自动禁用状态，需要管理员手动启用",
            channel_id = channel.id,
            enabled_keys = stats.enabled
        );
    }
    Recheck::Unchanged
}

/// 多Key渠道中某个 Key 出现需要禁用的错误
///
/// 渠道不是多Key或关闭了自动禁用时返回 `None`，状态不变。
pub fn apply_key_failure(
    channel: &mut channels::Model,
    key_index: usize,
    message: &str,
    status_code: Option<u16>,
    model: &str,
    at: DateTime<Utc>,
) -> Option<KeyFailure> {
    if !channel.is_multi_key() || !channel.auto_disable {
        return None;
    }

    let masked_key = channel.mark_key_failed(key_index, message, status_code, model, at.timestamp());
    lwarn!(
        "system",
        LogStage::Failover,
        LogComponent::FailureHandler,
        "key_auto_disabled",
        "Key 已被自动禁用",
        channel_id = channel.id,
        key_index = key_index,
        masked_key = %masked_key,
        status_code = ?status_code,
        error = %message
    );

    let key_disabled = KeyDisabledEvent {
        channel_id: channel.id,
        channel_name: channel.name.clone(),
        key_index,
        masked_key,
        error_message: message.to_string(),
        status_code,
        disabled_at: at,
    };

    Some(KeyFailure {
        key_disabled,
        recheck: recheck(channel, at),
    })
}

/// 单 Key 渠道出现需要禁用的错误，禁用整个渠道
///
/// 关闭了自动禁用的渠道保持不变。
pub fn disable_single_key_channel(
    channel: &mut channels::Model,
    reason: &str,
    model: &str,
    at: DateTime<Utc>,
) -> Recheck {
    if !channel.auto_disable {
        linfo!(
            "system",
            LogStage::Failover,
            LogComponent::FailureHandler,
            "auto_disable_off",
            "渠道应被禁用，但已关闭自动禁用",
            channel_id = channel.id
        );
        return Recheck::Unchanged;
    }

    channel.auto_disabled_model = Some(model.to_string());
    let result = auto_disable(channel, reason, at);
    if result.is_disabled() {
        lwarn!(
            "system",
            LogStage::Failover,
            LogComponent::FailureHandler,
            "channel_auto_disabled",
            "渠道已被自动禁用",
            channel_id = channel.id,
            model = %model,
            reason = %reason
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ChannelFixture;
    use entity::multi_key::KeySelectionMode;
    use pretty_assertions::assert_eq;

    fn ring(keys: &[&str]) -> channels::Model {
        ChannelFixture::multi_key(4, "pool", keys, KeySelectionMode::Polling).build()
    }

    #[test]
    fn test_all_keys_disabled_cascades_once() {
        let mut channel = ring(&["k0", "k1", "k2"]);
        channel.toggle_keys(&[0, 1, 2], false);
        let now = Utc::now();

        let first = recheck(&mut channel, now);
        let event = first.into_event().unwrap();
        assert_eq!(event.reason, REASON_ALL_KEYS_DISABLED);
        assert!(event.multi_key);
        assert_eq!(channel.status, ChannelStatus::AutoDisabled);
        assert_eq!(channel.auto_disabled_reason.as_deref(), Some(REASON_ALL_KEYS_DISABLED));
        assert_eq!(channel.auto_disabled_time, Some(now.timestamp()));
        assert_eq!(channel.multi_key_info.enabled_key_count, 0);

        assert_eq!(recheck(&mut channel, now), Recheck::Unchanged);
    }

    #[test]
    fn test_one_enabled_key_keeps_channel_enabled() {
        let mut channel = ring(&["k0", "k1", "k2"]);
        channel.toggle_keys(&[0, 1], false);
        assert_eq!(recheck(&mut channel, Utc::now()), Recheck::Unchanged);
        assert_eq!(channel.status, ChannelStatus::Enabled);
        assert_eq!(channel.multi_key_info.enabled_key_count, 1);
    }

    #[test]
    fn test_auto_disabled_channel_is_not_re_enabled() {
        let mut channel = ring(&["k0", "k1"]);
        channel.status = ChannelStatus::AutoDisabled;
        assert_eq!(recheck(&mut channel, Utc::now()), Recheck::Unchanged);
        assert_eq!(channel.status, ChannelStatus::AutoDisabled);
    }

    #[test]
    fn test_empty_ring_is_disabled() {
        let mut channel = ring(&["k0"]);
        channel.key = String::new();
        let event = recheck(&mut channel, Utc::now()).into_event().unwrap();
        assert_eq!(event.reason, REASON_NO_KEYS);
        assert_eq!(channel.multi_key_info.key_count, 0);
    }

    #[test]
    fn test_single_key_channels_ignore_recheck() {
        let mut channel = ChannelFixture::new(1, "single").build();
        channel.key = String::new();
        assert_eq!(recheck(&mut channel, Utc::now()), Recheck::Unchanged);
        assert_eq!(channel.status, ChannelStatus::Enabled);
    }

    #[test]
    fn test_key_failure_emits_key_event_then_channel_event() {
        let mut channel = ring(&["sk-aaaaaaaaaaaa", "sk-bbbbbbbbbbbb"]);
        let now = Utc::now();

        let first = apply_key_failure(&mut channel, 0, "invalid key", Some(401), "gpt-4o", now).unwrap();
        assert_eq!(first.key_disabled.masked_key, "sk-a***aaaa");
        assert_eq!(first.key_disabled.status_code, Some(401));
        assert_eq!(first.recheck, Recheck::Unchanged);

        let second = apply_key_failure(&mut channel, 1, "invalid key", Some(401), "gpt-4o", now).unwrap();
        assert!(second.recheck.is_disabled());
        assert_eq!(channel.status, ChannelStatus::AutoDisabled);
    }

    #[test]
    fn test_key_failure_respects_auto_disable_flag() {
        let mut channel = ChannelFixture::multi_key(4, "pool", &["k0", "k1"], KeySelectionMode::Polling)
            .auto_disable(false)
            .build();
        assert!(apply_key_failure(&mut channel, 0, "boom", Some(500), "m", Utc::now()).is_none());
        assert_eq!(channel.key_status(0), ChannelStatus::Enabled);

        let mut single = ChannelFixture::new(5, "single").build();
        assert!(apply_key_failure(&mut single, 0, "boom", Some(500), "m", Utc::now()).is_none());
    }

    #[test]
    fn test_single_key_channel_disable() {
        let mut channel = ChannelFixture::new(6, "single").build();
        let now = Utc::now();
        let event = disable_single_key_channel(&mut channel, "quota exceeded", "gpt-4o", now)
            .into_event()
            .unwrap();
        assert!(!event.multi_key);
        assert_eq!(event.reason, "quota exceeded");
        assert_eq!(channel.status, ChannelStatus::AutoDisabled);
        assert_eq!(channel.auto_disabled_model.as_deref(), Some("gpt-4o"));

        assert_eq!(
            disable_single_key_channel(&mut channel, "again", "gpt-4o", now),
            Recheck::Unchanged
        );

        let mut manual = ChannelFixture::new(7, "manual").auto_disable(false).build();
        assert_eq!(
            disable_single_key_channel(&mut manual, "quota", "gpt-4o", now),
            Recheck::Unchanged
        );
        assert_eq!(manual.status, ChannelStatus::Enabled);
    }
}
