//! # 数据库枚举类型
//!
//! 渠道状态以整数形式落库：1 启用，2 手动禁用，3 自动禁用

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 渠道/Key 状态
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// 启用
    #[default]
    #[sea_orm(num_value = 1)]
    Enabled,
    /// 管理员手动禁用
    #[sea_orm(num_value = 2)]
    ManuallyDisabled,
    /// 故障自动禁用
    #[sea_orm(num_value = 3)]
    AutoDisabled,
}

impl ChannelStatus {
    /// 是否可参与调度
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled)
    }

    /// 转换为字符串
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::ManuallyDisabled => "manually_disabled",
            Self::AutoDisabled => "auto_disabled",
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
