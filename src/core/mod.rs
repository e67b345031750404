//! 内核配置与管理

pub mod config;

pub use config::{CoreConfig, CoreConfigBuilder, LogConfig, ModuleConfig};
