//! # Entity 模块
//!
//! 包含所有 Sea-ORM 实体定义

pub mod abilities;
pub mod channels;
pub mod multi_key;
pub mod sea_orm_active_enums;

pub use abilities::Entity as Abilities;
pub use channels::Entity as Channels;

#[cfg(test)]
mod tests;
