//! # LBBS Core - 轻量级公告板系统内核
//!
//! LBBS 内核是轻量级公告板系统（Lightweight Bulletin Board
//! System）的进程级核心：一个动态模块加载器与生命周期管理器。
//! 网络服务（SMTP、IMAP、IRC 等）和领域功能（ChanServ、邮箱
//! 事件）都以可插拔模块的形式接入内核。核心功能：
//!
//! - **模块注册表**: 按规范名索引的模块记录，含状态、引用计数与延迟重载队列
//! - **动态库后端**: 从磁盘打开共享对象并解析注册符号
//! - **生命周期协调**: 加载 / 卸载 / 重载状态机与并发门控
//! - **依赖追踪**: require / unrequire 维护的有向无环图
//! - **自动加载**: 启动时按配置加载，停机时逆依赖序卸载
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use lbbs_core::{BbsCore, CoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CoreConfig::default();
//!     let mut core = BbsCore::new(config).await?;
//!
//!     core.start().await?;
//!     // ...
//!     core.shutdown().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 模块加载器核心（注册表、后端、协调器、依赖、自动加载）
//! - `core` - 内核配置
//! - `utils` - 错误类型、令牌生成和日志系统
//! - `api` - 公共 API 接口

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod core;
pub mod module;
pub mod utils;

// 重导出常用类型，方便使用
pub use module::{
    canonical_name, AutoloadOrchestrator, AutoloadReport, DependencyTracker, DynamicLoader,
    LifecycleCoordinator, ModuleContext, ModuleDescriptor, ModuleEntry, ModuleFlags,
    ModuleListEntry, ModuleRecord, ModuleRef, ModuleRegistration, ModuleRegistry, ModuleState,
    SelfToken,
};

pub use crate::core::config::{CoreConfig, CoreConfigBuilder, LogConfig, ModuleConfig};

pub use utils::logger::{LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
pub use utils::{error_code, status_code, CoreError, Result};

pub use api::sdk::{BbsCore, CommandOutcome, CoreState};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
