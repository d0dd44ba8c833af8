//! # 多Key管理
//!
//! Key 解析、轮换选择、批次生命周期与健康评估

mod health;
mod parser;
mod ring;

pub use health::{KeyHealth, KeyHealthReport, OverallHealth, health_score, mask_key};
pub use parser::{CHANNEL_TYPE_VERTEX_AI, extract_json_objects, parse_keys};
pub use ring::{KeyPick, KeyRing, KeySelection, KeyStats};
