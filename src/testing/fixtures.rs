//! # 测试数据构造

use entity::channels;
use entity::multi_key::{KeySelectionMode, MultiKeyInfo};
use entity::sea_orm_active_enums::ChannelStatus;

/// 渠道测试数据构造器
#[derive(Debug, Clone)]
pub struct ChannelFixture {
    model: channels::Model,
}

impl ChannelFixture {
    /// 单 Key 渠道
    pub fn new(id: i32, name: &str) -> Self {
        Self {
            model: channels::Model {
                id,
                channel_type: 1,
                name: name.to_string(),
                key: format!("sk-{name}-0000000000"),
                status: ChannelStatus::Enabled,
                weight: 1,
                priority: 0,
                group: "default".to_string(),
                models: "gpt-4o".to_string(),
                auto_disable: true,
                multi_key_info: MultiKeyInfo::default(),
                auto_disabled_reason: None,
                auto_disabled_time: None,
                auto_disabled_model: None,
                created_time: 0,
            },
        }
    }

    /// 多 Key 渠道，Key 以换行分隔
    pub fn multi_key(id: i32, name: &str, keys: &[&str], mode: KeySelectionMode) -> Self {
        let mut fixture = Self::new(id, name);
        fixture.model.key = keys.join("\n");
        fixture.model.multi_key_info = MultiKeyInfo {
            is_multi_key: true,
            key_count: keys.len(),
            enabled_key_count: keys.len(),
            key_selection_mode: mode,
            ..Default::default()
        };
        fixture
    }

    /// 原始 Key 文本，不改动多Key信息
    #[must_use]
    pub fn key(mut self, key: &str) -> Self {
        self.model.key = key.to_string();
        self
    }

    #[must_use]
    pub const fn priority(mut self, priority: i64) -> Self {
        self.model.priority = priority;
        self
    }

    #[must_use]
    pub const fn weight(mut self, weight: i32) -> Self {
        self.model.weight = weight;
        self
    }

    #[must_use]
    pub fn group(mut self, group: &str) -> Self {
        self.model.group = group.to_string();
        self
    }

    #[must_use]
    pub fn models(mut self, models: &str) -> Self {
        self.model.models = models.to_string();
        self
    }

    #[must_use]
    pub const fn status(mut self, status: ChannelStatus) -> Self {
        self.model.status = status;
        self
    }

    #[must_use]
    pub const fn channel_type(mut self, channel_type: i32) -> Self {
        self.model.channel_type = channel_type;
        self
    }

    #[must_use]
    pub const fn auto_disable(mut self, auto_disable: bool) -> Self {
        self.model.auto_disable = auto_disable;
        self
    }

    #[must_use]
    pub fn build(self) -> channels::Model {
        self.model
    }
}
