//! # 测试框架模块
//!
//! 单元测试与 `tests/` 集成测试共用的 fixtures 和辅助函数

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
