//! # 多Key聚合信息
//!
//! 作为 JSON 列存储在 `channels.multi_key_info` 中。
//! `key_status_list` 与 `key_metadata` 都是稀疏映射：索引不存在即表示默认值（启用 / 无元数据）。

use crate::sea_orm_active_enums::ChannelStatus;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key 选择模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySelectionMode {
    /// 轮询
    #[default]
    Polling,
    /// 随机
    Random,
}

/// 批量导入模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchImportMode {
    /// 覆盖已有 Key
    #[default]
    Override,
    /// 追加到已有 Key 之后
    Append,
}

/// 单个 Key 的元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyMetadata {
    /// 余额
    pub balance: f64,
    /// 使用次数
    pub usage: i64,
    /// 最后使用时间（unix 秒，0 表示从未使用）
    pub last_used: i64,
    /// 导入批次
    pub import_batch: String,
    /// 备注
    pub note: String,
    /// 禁用原因
    pub disabled_reason: Option<String>,
    /// 禁用时间
    pub disabled_time: Option<i64>,
    /// 触发禁用的 HTTP 状态码
    pub status_code: Option<u16>,
    /// 触发禁用的模型
    pub disabled_model: Option<String>,
}

/// 多Key聚合信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(default)]
pub struct MultiKeyInfo {
    /// 是否启用多Key模式
    pub is_multi_key: bool,
    /// Key 总数
    pub key_count: usize,
    /// 可用 Key 数
    pub enabled_key_count: usize,
    /// 选择模式
    pub key_selection_mode: KeySelectionMode,
    /// 轮询游标
    pub polling_index: usize,
    /// 状态覆盖：索引 -> 状态
    pub key_status_list: BTreeMap<usize, ChannelStatus>,
    /// 元数据：索引 -> 元数据
    pub key_metadata: BTreeMap<usize, KeyMetadata>,
    /// 最后一次批量导入时间
    pub last_batch_import_time: i64,
    /// 批量导入模式
    pub batch_import_mode: BatchImportMode,
}

impl MultiKeyInfo {
    /// 读取某个 Key 的状态，没有覆盖时视为启用
    #[must_use]
    pub fn key_status(&self, index: usize) -> ChannelStatus {
        self.key_status_list
            .get(&index)
            .copied()
            .unwrap_or(ChannelStatus::Enabled)
    }
}

impl std::str::FromStr for KeySelectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polling" | "0" => Ok(Self::Polling),
            "random" | "1" => Ok(Self::Random),
            other => Err(format!("unknown key selection mode: {other}")),
        }
    }
}

impl std::str::FromStr for BatchImportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "override" | "0" => Ok(Self::Override),
            "append" | "1" => Ok(Self::Append),
            other => Err(format!("unknown batch import mode: {other}")),
        }
    }
}
