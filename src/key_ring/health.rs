//! # Key 脱敏与健康评估

use entity::multi_key::KeyMetadata;
use entity::sea_orm_active_enums::ChannelStatus;
use serde::Serialize;

const SECONDS_PER_DAY: i64 = 86_400;

/// 脱敏显示：超过 8 个字符时保留首尾各 4 个字符
#[must_use]
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return key.to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}***{tail}")
}

/// 单个 Key 的健康分，范围 [0, 100]
#[must_use]
pub fn health_score(metadata: &KeyMetadata, status: ChannelStatus, now: i64) -> u8 {
    if !status.is_enabled() {
        return 0;
    }

    let mut score: i32 = 100;

    if metadata.usage > 10_000 {
        score -= 20;
    } else if metadata.usage > 5_000 {
        score -= 10;
    }

    if metadata.last_used > 0 {
        let days_since_last_use = (now - metadata.last_used) / SECONDS_PER_DAY;
        if days_since_last_use > 7 {
            score -= 30;
        } else if days_since_last_use > 3 {
            score -= 15;
        }
    }

    u8::try_from(score.max(0)).unwrap_or(0)
}

/// 渠道整体健康等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl OverallHealth {
    /// 按可用 Key 占比分级
    #[must_use]
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 0.8 {
            Self::Excellent
        } else if ratio >= 0.6 {
            Self::Good
        } else if ratio >= 0.4 {
            Self::Fair
        } else if ratio > 0.0 {
            Self::Poor
        } else {
            Self::Critical
        }
    }
}

/// 单个 Key 的健康明细
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyHealth {
    pub index: usize,
    pub masked_key: String,
    pub status: ChannelStatus,
    pub usage: i64,
    pub last_used: i64,
    pub health_score: u8,
}

/// 渠道的 Key 健康报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyHealthReport {
    pub channel_id: i32,
    pub channel_name: String,
    pub total_keys: usize,
    pub enabled_keys: usize,
    pub manually_disabled_keys: usize,
    pub auto_disabled_keys: usize,
    pub healthy_ratio: f64,
    pub overall_health: OverallHealth,
    pub keys: Vec<KeyHealth>,
}
