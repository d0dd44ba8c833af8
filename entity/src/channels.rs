//! # 渠道实体定义
//!
//! 一个渠道对应一组上游凭证，可以是单 Key，也可以是多 Key 聚合

use crate::multi_key::MultiKeyInfo;
use crate::sea_orm_active_enums::ChannelStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 渠道实体
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "channels")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub channel_type: i32,
    pub name: String,
    #[sea_orm(column_type = "Text")]
    pub key: String,
    pub status: ChannelStatus,
    pub weight: i32,
    pub priority: i64,
    pub group: String,
    #[sea_orm(column_type = "Text")]
    pub models: String,
    pub auto_disable: bool,
    #[sea_orm(column_type = "Json")]
    pub multi_key_info: MultiKeyInfo,
    #[sea_orm(column_type = "Text", nullable)]
    pub auto_disabled_reason: Option<String>,
    pub auto_disabled_time: Option<i64>,
    pub auto_disabled_model: Option<String>,
    pub created_time: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::abilities::Entity")]
    Abilities,
}

impl Related<super::abilities::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Abilities.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// 拆分分组列表，忽略空白项
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        split_tokens(&self.group)
    }

    /// 拆分模型列表，忽略空白项
    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        split_tokens(&self.models)
    }

    /// 有效权重，0 视为 1
    #[must_use]
    pub fn effective_weight(&self) -> u64 {
        u64::try_from(self.weight.max(1)).unwrap_or(1)
    }

    /// 用管理端提交的数据覆盖路由相关字段
    ///
    /// 状态、自动禁用记录与多Key信息保持不变，只能通过各自的操作修改。
    pub fn merge_routing_fields(&mut self, edit: Self) {
        self.channel_type = edit.channel_type;
        self.name = edit.name;
        self.key = edit.key;
        self.weight = edit.weight;
        self.priority = edit.priority;
        self.group = edit.group;
        self.models = edit.models;
        self.auto_disable = edit.auto_disable;
    }

    /// 渠道是否同时服务于指定分组与模型
    #[must_use]
    pub fn serves(&self, group: &str, model: &str) -> bool {
        self.groups().any(|g| g == group) && self.model_names().any(|m| m == model)
    }
}

/// 逗号分隔列表的拆分规则：去除两端空白并跳过空项
pub fn split_tokens(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}
