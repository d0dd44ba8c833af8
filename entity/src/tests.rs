//! # 实体定义测试

#[cfg(test)]
mod tests {
    use crate::channels::{self, split_tokens};
    use crate::multi_key::{KeyMetadata, KeySelectionMode, MultiKeyInfo};
    use crate::sea_orm_active_enums::ChannelStatus;
    use sea_orm::Set;

    fn sample_channel() -> channels::Model {
        channels::Model {
            id: 7,
            channel_type: 1,
            name: "openai-main".to_string(),
            key: "sk-a\nsk-b".to_string(),
            status: ChannelStatus::Enabled,
            weight: 0,
            priority: 10,
            group: "default, vip,,".to_string(),
            models: "gpt-4o,gpt-4o-mini".to_string(),
            auto_disable: true,
            multi_key_info: MultiKeyInfo::default(),
            auto_disabled_reason: None,
            auto_disabled_time: None,
            auto_disabled_model: None,
            created_time: 0,
        }
    }

    #[test]
    fn test_split_tokens_skips_blank_entries() {
        let tokens: Vec<&str> = split_tokens(" a, ,b ,,c").collect();
        assert_eq!(tokens, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_channel_serves_trimmed_tokens() {
        let channel = sample_channel();
        assert!(channel.serves("vip", "gpt-4o"));
        assert!(!channel.serves("vip", "claude-3"));
        assert!(!channel.serves("", "gpt-4o"));
        assert_eq!(channel.effective_weight(), 1);
    }

    #[test]
    fn test_merge_routing_fields_keeps_ring_and_status() {
        let mut stored = sample_channel();
        stored.status = ChannelStatus::AutoDisabled;
        stored.auto_disabled_reason = Some("all keys disabled".to_string());
        stored
            .multi_key_info
            .key_status_list
            .insert(0, ChannelStatus::AutoDisabled);

        let mut edit = sample_channel();
        edit.priority = 3;
        edit.models = "claude-3".to_string();
        edit.auto_disable = false;
        stored.merge_routing_fields(edit);

        assert_eq!(stored.priority, 3);
        assert_eq!(stored.models, "claude-3");
        assert!(!stored.auto_disable);
        assert_eq!(stored.status, ChannelStatus::AutoDisabled);
        assert_eq!(stored.auto_disabled_reason.as_deref(), Some("all keys disabled"));
        assert_eq!(stored.multi_key_info.key_status(0), ChannelStatus::AutoDisabled);
    }

    #[test]
    fn test_missing_status_defaults_to_enabled() {
        let mut info = MultiKeyInfo::default();
        info.key_status_list.insert(1, ChannelStatus::AutoDisabled);

        assert_eq!(info.key_status(0), ChannelStatus::Enabled);
        assert_eq!(info.key_status(1), ChannelStatus::AutoDisabled);
        assert_eq!(info.key_status(99), ChannelStatus::Enabled);
    }

    #[test]
    fn test_multi_key_info_json_shape() {
        let mut info = MultiKeyInfo {
            is_multi_key: true,
            key_selection_mode: KeySelectionMode::Random,
            ..Default::default()
        };
        info.key_status_list.insert(2, ChannelStatus::ManuallyDisabled);
        info.key_metadata.insert(
            0,
            KeyMetadata {
                usage: 3,
                ..Default::default()
            },
        );

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["key_selection_mode"], "random");
        assert_eq!(value["key_status_list"]["2"], "manually_disabled");
        assert_eq!(value["key_metadata"]["0"]["usage"], 3);

        let decoded: MultiKeyInfo = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn test_legacy_partial_json_uses_defaults() {
        let decoded: MultiKeyInfo = serde_json::from_str(r#"{"is_multi_key":true}"#).unwrap();
        assert!(decoded.is_multi_key);
        assert_eq!(decoded.polling_index, 0);
        assert!(decoded.key_status_list.is_empty());
    }

    #[tokio::test]
    async fn test_channel_active_model_creation() {
        let channel = channels::ActiveModel {
            name: Set("claude".to_string()),
            status: Set(ChannelStatus::Enabled),
            auto_disable: Set(true),
            ..Default::default()
        };

        assert_eq!(channel.name.as_ref(), "claude");
        assert_eq!(channel.status.as_ref(), &ChannelStatus::Enabled);
    }
}
