use super::RelayError;
use thiserror::Error;

/// 多Key环操作错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyRingError {
    #[error("渠道 #{channel_id} 没有任何 Key")]
    NoKeys { channel_id: i32 },

    #[error("渠道 #{channel_id} 的所有 Key 都已禁用")]
    NoEnabledKeys { channel_id: i32 },

    #[error("渠道 #{channel_id} 的可用 Key 均已被排除")]
    AllExcluded { channel_id: i32 },

    #[error("Key 索引越界: {index} (共 {len} 个)")]
    InvalidIndex { index: usize, len: usize },

    #[error("找不到批次 {batch_id} 的 Key")]
    BatchNotFound { batch_id: String },

    #[error("导入的 Key 列表为空")]
    EmptyImport,

    #[error("渠道 #{channel_id} 不是多Key渠道")]
    NotMultiKey { channel_id: i32 },
}

impl From<KeyRingError> for RelayError {
    fn from(err: KeyRingError) -> Self {
        match err {
            KeyRingError::NoKeys { .. }
            | KeyRingError::NoEnabledKeys { .. }
            | KeyRingError::AllExcluded { .. } => Self::exhausted(err.to_string()),
            KeyRingError::BatchNotFound { ref batch_id } => {
                Self::not_found("key_batch", batch_id)
            }
            KeyRingError::InvalidIndex { .. }
            | KeyRingError::EmptyImport
            | KeyRingError::NotMultiKey { .. } => Self::validation(err.to_string()),
        }
    }
}
