//! 模块管理
//!
//! 模块加载器内核的核心组件：
//! - 描述符与生命周期入口点定义
//! - 模块注册表（记录、状态、引用计数、延迟重载队列）
//! - 动态库后端
//! - 生命周期协调器
//! - 依赖追踪
//! - 自动加载编排

pub mod autoload;
pub mod backend;
pub mod dependency;
pub mod descriptor;
pub mod lifecycle;
pub mod registry;

// 重导出常用类型
pub use autoload::{AutoloadOrchestrator, AutoloadReport};
pub use backend::{DynamicLoader, ModuleBacking};
pub use dependency::{DependencyTracker, ModuleRef};
pub use descriptor::{
    ModuleDescriptor, ModuleEntry, ModuleFlags, ModuleRegistration, ModuleState, SelfToken,
};
pub use lifecycle::{LifecycleCoordinator, ModuleContext};
pub use registry::{canonical_name, ModuleListEntry, ModuleRecord, ModuleRegistry};
