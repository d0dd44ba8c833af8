//! # Channel Relay Library
//!
//! AI 网关的渠道路由与多 Key 故障转移核心库

pub mod ability;
pub mod config;
pub mod database;
pub mod error;
pub mod failure;
pub mod key_ring;
pub mod logging;
pub mod notify;
pub mod persist;
pub mod router;
pub mod selector;
pub mod store;
pub mod testing;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{RelayError, Result};
pub use router::{ChannelRouter, Outcome, RouterOptions};
pub use selector::SelectRequest;
