//! # 多Key环
//!
//! 所有对 `MultiKeyInfo` 的修改都经过 [`KeyRing`]。这里只做内存中的状态变换，
//! 落库、加锁和通知由 [`crate::router::ChannelRouter`] 负责。

use super::health::{KeyHealth, KeyHealthReport, OverallHealth, health_score, mask_key};
use super::parser::parse_keys;
use crate::error::KeyRingError;
use entity::channels;
use entity::multi_key::{BatchImportMode, KeyMetadata, KeySelectionMode};
use entity::sea_orm_active_enums::ChannelStatus;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;

/// 选中的 Key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySelection {
    pub credential: String,
    pub index: usize,
}

/// 一次选择的结果，轮询模式下附带推进后的游标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPick {
    pub selection: KeySelection,
    pub next_cursor: Option<usize>,
}

/// Key 状态统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyStats {
    pub total: usize,
    pub enabled: usize,
    pub manually_disabled: usize,
    pub auto_disabled: usize,
    pub is_multi_key: bool,
    pub selection_mode: KeySelectionMode,
}

/// 渠道上的多Key操作
pub trait KeyRing {
    /// 解析出的有序 Key 列表
    fn keys(&self) -> Vec<String>;

    fn is_multi_key(&self) -> bool;

    /// 某个 Key 的状态，没有覆盖时为启用
    fn key_status(&self, index: usize) -> ChannelStatus;

    /// 选择一个可用 Key
    ///
    /// `cursor` 为当前轮询游标，越界时从 0 开始扫描。单 Key 渠道直接返回原始 Key 与索引 0。
    fn pick_key<R: Rng + ?Sized>(
        &self,
        cursor: usize,
        exclude: &[usize],
        rng: &mut R,
    ) -> Result<KeyPick, KeyRingError>;

    /// 新建渠道时初始化多Key信息，返回是否为多Key渠道
    fn init_multi_key(&mut self, now: i64) -> bool;

    /// 批量导入
    fn import_keys(
        &mut self,
        new_keys: Vec<String>,
        mode: BatchImportMode,
        now: i64,
    ) -> Result<(), KeyRingError>;

    /// Key 文本被直接改写后裁掉越界的状态与元数据，游标越界时归零
    fn fit_to_keys(&mut self);

    /// 索引必须落在当前 Key 列表内
    fn check_index(&self, index: usize) -> Result<(), KeyRingError>;

    fn toggle_key(&mut self, index: usize, enabled: bool) -> Result<(), KeyRingError>;

    /// 批量切换，越界索引被跳过，返回实际处理的数量
    fn toggle_keys(&mut self, indices: &[usize], enabled: bool) -> usize;

    fn toggle_keys_by_batch(&mut self, batch_id: &str, enabled: bool)
    -> Result<usize, KeyRingError>;

    /// 删除所有非启用 Key 并压缩索引，返回删除数量
    fn delete_disabled_keys(&mut self) -> Result<usize, KeyRingError>;

    /// 为没有状态记录的 Key 写入显式的启用状态，返回补齐数量
    fn backfill_key_status(&mut self) -> Result<usize, KeyRingError>;

    fn set_selection_mode(&mut self, mode: KeySelectionMode);

    /// 切换多Key模式，关闭时清空状态、元数据与游标
    fn set_multi_key(&mut self, enabled: bool);

    /// 记录一次使用，仅对多Key渠道生效
    fn record_usage(&mut self, index: usize, now: i64) -> bool;

    /// 把 Key 标记为自动禁用，返回脱敏后的 Key（索引越界时为 `unknown`）
    fn mark_key_failed(
        &mut self,
        index: usize,
        reason: &str,
        status_code: Option<u16>,
        model: &str,
        now: i64,
    ) -> String;

    fn key_stats(&self) -> KeyStats;

    fn health_report(&self, now: i64) -> KeyHealthReport;
}

fn batch_id(now: i64) -> String {
    format!("batch_{now}")
}

fn apply_toggle(status_list: &mut BTreeMap<usize, ChannelStatus>, index: usize, enabled: bool) {
    if enabled {
        status_list.remove(&index);
    } else {
        status_list.insert(index, ChannelStatus::ManuallyDisabled);
    }
}

impl KeyRing for channels::Model {
    fn keys(&self) -> Vec<String> {
        parse_keys(self.channel_type, &self.key)
    }

    fn is_multi_key(&self) -> bool {
        self.multi_key_info.is_multi_key
    }

    fn key_status(&self, index: usize) -> ChannelStatus {
        self.multi_key_info.key_status(index)
    }

    fn pick_key<R: Rng + ?Sized>(
        &self,
        cursor: usize,
        exclude: &[usize],
        rng: &mut R,
    ) -> Result<KeyPick, KeyRingError> {
        if !self.is_multi_key() {
            return Ok(KeyPick {
                selection: KeySelection {
                    credential: self.key.clone(),
                    index: 0,
                },
                next_cursor: None,
            });
        }

        let mut keys = self.keys();
        if keys.is_empty() {
            return Err(KeyRingError::NoKeys {
                channel_id: self.id,
            });
        }

        let eligible: Vec<usize> = (0..keys.len())
            .filter(|&i| self.key_status(i).is_enabled() && !exclude.contains(&i))
            .collect();

        if eligible.is_empty() {
            return Err(if exclude.is_empty() {
                KeyRingError::NoEnabledKeys {
                    channel_id: self.id,
                }
            } else {
                KeyRingError::AllExcluded {
                    channel_id: self.id,
                }
            });
        }

        let (index, next_cursor) = match self.multi_key_info.key_selection_mode {
            KeySelectionMode::Random => (eligible[rng.gen_range(0..eligible.len())], None),
            KeySelectionMode::Polling => {
                let len = keys.len();
                let start = if cursor < len { cursor } else { 0 };
                let found = (0..len)
                    .map(|offset| (start + offset) % len)
                    .find(|idx| eligible.contains(idx))
                    .unwrap_or(eligible[0]);
                (found, Some((found + 1) % len))
            }
        };

        Ok(KeyPick {
            selection: KeySelection {
                credential: keys.swap_remove(index),
                index,
            },
            next_cursor,
        })
    }

    fn init_multi_key(&mut self, now: i64) -> bool {
        let keys = self.keys();
        if keys.len() <= 1 {
            if let Some(only) = keys.into_iter().next() {
                self.key = only;
            }
            return false;
        }

        let batch = batch_id(now);
        let info = &mut self.multi_key_info;
        info.is_multi_key = true;
        info.key_count = keys.len();
        info.enabled_key_count = keys.len();
        info.polling_index = 0;
        info.last_batch_import_time = now;
        info.key_status_list = (0..keys.len())
            .map(|i| (i, ChannelStatus::Enabled))
            .collect();
        info.key_metadata = (0..keys.len())
            .map(|i| {
                (
                    i,
                    KeyMetadata {
                        import_batch: batch.clone(),
                        ..Default::default()
                    },
                )
            })
            .collect();
        self.key = keys.join("\n");
        true
    }

    fn import_keys(
        &mut self,
        new_keys: Vec<String>,
        mode: BatchImportMode,
        now: i64,
    ) -> Result<(), KeyRingError> {
        if new_keys.is_empty() {
            return Err(KeyRingError::EmptyImport);
        }

        let was_multi_key = self.multi_key_info.is_multi_key;
        let original_key_count = self.multi_key_info.key_count;
        let added = new_keys.len();

        let final_keys = match mode {
            BatchImportMode::Override => {
                self.multi_key_info.key_status_list.clear();
                self.multi_key_info.key_metadata.clear();
                self.multi_key_info.polling_index = 0;
                new_keys
            }
            BatchImportMode::Append => {
                let mut existing = self.keys();
                existing.extend(new_keys);
                existing
            }
        };

        self.key = final_keys.join("\n");

        let info = &mut self.multi_key_info;
        info.is_multi_key = match mode {
            BatchImportMode::Override => final_keys.len() > 1,
            BatchImportMode::Append => {
                final_keys.len() > 1 || (was_multi_key && original_key_count > 1)
            }
        };
        info.key_count = final_keys.len();
        info.last_batch_import_time = now;
        info.batch_import_mode = mode;

        let batch = batch_id(now);
        let start = final_keys.len() - added;
        for index in start..final_keys.len() {
            info.key_metadata.entry(index).or_insert_with(|| KeyMetadata {
                import_batch: batch.clone(),
                ..Default::default()
            });
        }

        Ok(())
    }

    fn fit_to_keys(&mut self) {
        let len = self.keys().len();
        let info = &mut self.multi_key_info;
        info.key_count = len;
        info.key_status_list.retain(|&index, _| index < len);
        info.key_metadata.retain(|&index, _| index < len);
        if info.polling_index >= len {
            info.polling_index = 0;
        }
    }

    fn check_index(&self, index: usize) -> Result<(), KeyRingError> {
        let len = self.keys().len();
        if index >= len {
            return Err(KeyRingError::InvalidIndex { index, len });
        }
        Ok(())
    }

    fn toggle_key(&mut self, index: usize, enabled: bool) -> Result<(), KeyRingError> {
        self.check_index(index)?;
        apply_toggle(&mut self.multi_key_info.key_status_list, index, enabled);
        Ok(())
    }

    fn toggle_keys(&mut self, indices: &[usize], enabled: bool) -> usize {
        let len = self.keys().len();
        let status_list = &mut self.multi_key_info.key_status_list;
        let mut applied = 0;
        for &index in indices.iter().filter(|&&index| index < len) {
            apply_toggle(status_list, index, enabled);
            applied += 1;
        }
        applied
    }

    fn toggle_keys_by_batch(
        &mut self,
        batch_id: &str,
        enabled: bool,
    ) -> Result<usize, KeyRingError> {
        let targets: Vec<usize> = self
            .multi_key_info
            .key_metadata
            .iter()
            .filter(|(_, metadata)| metadata.import_batch == batch_id)
            .map(|(&index, _)| index)
            .collect();

        if targets.is_empty() {
            return Err(KeyRingError::BatchNotFound {
                batch_id: batch_id.to_string(),
            });
        }

        Ok(self.toggle_keys(&targets, enabled))
    }

    fn delete_disabled_keys(&mut self) -> Result<usize, KeyRingError> {
        if !self.is_multi_key() {
            return Err(KeyRingError::NotMultiKey {
                channel_id: self.id,
            });
        }

        let keys = self.keys();
        if keys.is_empty() {
            return Ok(0);
        }

        let total = keys.len();
        let mut kept = Vec::with_capacity(total);
        let mut kept_metadata = BTreeMap::new();
        for (index, key) in keys.into_iter().enumerate() {
            if !self.key_status(index).is_enabled() {
                continue;
            }
            if let Some(metadata) = self.multi_key_info.key_metadata.remove(&index) {
                kept_metadata.insert(kept.len(), metadata);
            }
            kept.push(key);
        }

        let removed = total - kept.len();
        self.key = kept.join("\n");
        let info = &mut self.multi_key_info;
        info.key_count = kept.len();
        info.key_metadata = kept_metadata;
        info.key_status_list.clear();
        info.polling_index = 0;

        Ok(removed)
    }

    fn backfill_key_status(&mut self) -> Result<usize, KeyRingError> {
        if !self.is_multi_key() {
            return Err(KeyRingError::NotMultiKey {
                channel_id: self.id,
            });
        }

        let len = self.keys().len();
        let status_list = &mut self.multi_key_info.key_status_list;
        let mut filled = 0;
        for index in 0..len {
            status_list.entry(index).or_insert_with(|| {
                filled += 1;
                ChannelStatus::Enabled
            });
        }
        Ok(filled)
    }

    fn set_selection_mode(&mut self, mode: KeySelectionMode) {
        self.multi_key_info.key_selection_mode = mode;
    }

    fn set_multi_key(&mut self, enabled: bool) {
        let info = &mut self.multi_key_info;
        info.is_multi_key = enabled;
        if !enabled {
            info.key_status_list.clear();
            info.key_metadata.clear();
            info.polling_index = 0;
        }
    }

    fn record_usage(&mut self, index: usize, now: i64) -> bool {
        if !self.is_multi_key() {
            return false;
        }
        let metadata = self.multi_key_info.key_metadata.entry(index).or_default();
        metadata.usage += 1;
        metadata.last_used = now;
        true
    }

    fn mark_key_failed(
        &mut self,
        index: usize,
        reason: &str,
        status_code: Option<u16>,
        model: &str,
        now: i64,
    ) -> String {
        let masked = self
            .keys()
            .get(index)
            .map_or_else(|| "unknown".to_string(), |key| mask_key(key));

        let info = &mut self.multi_key_info;
        info.key_status_list
            .insert(index, ChannelStatus::AutoDisabled);
        let metadata = info.key_metadata.entry(index).or_default();
        metadata.disabled_reason = Some(reason.to_string());
        metadata.disabled_time = Some(now);
        metadata.status_code = status_code;
        metadata.disabled_model = Some(model.to_string());

        masked
    }

    fn key_stats(&self) -> KeyStats {
        let total = self.keys().len();
        let mut stats = KeyStats {
            total,
            enabled: 0,
            manually_disabled: 0,
            auto_disabled: 0,
            is_multi_key: self.is_multi_key(),
            selection_mode: self.multi_key_info.key_selection_mode,
        };
        for index in 0..total {
            match self.key_status(index) {
                ChannelStatus::Enabled => stats.enabled += 1,
                ChannelStatus::ManuallyDisabled => stats.manually_disabled += 1,
                ChannelStatus::AutoDisabled => stats.auto_disabled += 1,
            }
        }
        stats
    }

    fn health_report(&self, now: i64) -> KeyHealthReport {
        let stats = self.key_stats();
        let keys = self
            .keys()
            .iter()
            .enumerate()
            .map(|(index, key)| {
                let status = self.key_status(index);
                let metadata = self
                    .multi_key_info
                    .key_metadata
                    .get(&index)
                    .cloned()
                    .unwrap_or_default();
                KeyHealth {
                    index,
                    masked_key: mask_key(key),
                    status,
                    usage: metadata.usage,
                    last_used: metadata.last_used,
                    health_score: health_score(&metadata, status, now),
                }
            })
            .collect();

        #[allow(clippy::cast_precision_loss)]
        let healthy_ratio = if stats.total == 0 {
            0.0
        } else {
            stats.enabled as f64 / stats.total as f64
        };

        KeyHealthReport {
            channel_id: self.id,
            channel_name: self.name.clone(),
            total_keys: stats.total,
            enabled_keys: stats.enabled,
            manually_disabled_keys: stats.manually_disabled,
            auto_disabled_keys: stats.auto_disabled,
            healthy_ratio,
            overall_health: OverallHealth::from_ratio(healthy_ratio),
            keys,
        }
    }
}
