//! BbsCore SDK
//!
//! LBBS 内核的主要对外接口。提供统一的 API 访问模块加载器的
//! 全部功能：
//!
//! - 生命周期：创建、启动（自动加载）、停机（全量卸载）
//! - 模块操作：加载、卸载、重载、列表、引用计数
//! - 控制台命令包装：单一状态码 + 消息清单
//!
//! # 示例
//!
//! ```rust,no_run
//! use lbbs_core::{BbsCore, CoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CoreConfig::builder()
//!         .modules_dir("/var/lib/lbbs/modules")
//!         .autoload_module("net_smtp")
//!         .build();
//!
//!     let mut core = BbsCore::new(config).await?;
//!     core.start().await?;
//!
//!     // ... 运行期间通过 core 操作模块 ...
//!
//!     core.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::core::config::CoreConfig;
use crate::module::{
    AutoloadOrchestrator, AutoloadReport, DependencyTracker, DynamicLoader, LifecycleCoordinator,
    ModuleDescriptor, ModuleListEntry, ModuleRegistry, SelfToken,
};
use crate::utils::{status_code, CoreError, Result};

// ============================================================================
// 内核状态
// ============================================================================

/// 内核状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreState {
    /// 已初始化
    Initialized,
    /// 运行中
    Running,
    /// 正在停机
    ShuttingDown,
    /// 已停机
    Shutdown,
}

impl CoreState {
    /// 检查是否可以启动
    pub fn can_start(&self) -> bool {
        matches!(self, CoreState::Initialized)
    }

    /// 检查是否可以停机
    pub fn can_shutdown(&self) -> bool {
        matches!(self, CoreState::Running)
    }

    /// 检查是否正在运行
    pub fn is_running(&self) -> bool {
        matches!(self, CoreState::Running)
    }
}

// ============================================================================
// 控制台命令结果
// ============================================================================

/// 控制台命令结果
///
/// 每个顶层操作返回单一状态加一组人类可读消息。
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// 是否成功（控制台据此决定退出码）
    pub success: bool,
    /// 状态码
    pub status: u16,
    /// 操作期间收集的消息
    pub messages: Vec<String>,
}

impl CommandOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            status: status_code::OK,
            messages: vec![message.into()],
        }
    }

    fn from_error(error: &CoreError) -> Self {
        Self {
            success: false,
            status: error.status_code(),
            messages: vec![error.to_string()],
        }
    }
}

// ============================================================================
// BbsCore 主结构体
// ============================================================================

/// LBBS 内核主结构体
///
/// 模块加载器各组件的组合根。
///
/// # 生命周期
///
/// 1. `new()` - 创建并初始化内核
/// 2. `start()` - 扫描模块目录并自动加载配置列表
/// 3. `shutdown()` - 逆依赖序卸载全部模块
pub struct BbsCore {
    /// 内核配置
    config: CoreConfig,

    /// 内核状态
    state: Arc<RwLock<CoreState>>,

    /// 生命周期协调器
    coordinator: Arc<LifecycleCoordinator>,

    /// 自动加载编排器
    orchestrator: AutoloadOrchestrator,

    /// 启动时间
    started_at: Option<Instant>,
}

impl BbsCore {
    // ==================== 初始化和生命周期 ====================

    /// 创建新的内核实例
    ///
    /// # Errors
    ///
    /// 配置校验失败时返回错误。
    pub async fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let registry = ModuleRegistry::new();
        let tracker = DependencyTracker::new();
        let backend = DynamicLoader::new(config.modules.modules_dir.clone());
        let coordinator = Arc::new(LifecycleCoordinator::new(registry, tracker, backend));
        let orchestrator = AutoloadOrchestrator::new(Arc::clone(&coordinator));

        info!(
            modules_dir = %config.modules.modules_dir.display(),
            autoload = config.modules.autoload.len(),
            "内核已初始化"
        );

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(CoreState::Initialized)),
            coordinator,
            orchestrator,
            started_at: None,
        })
    }

    /// 启动内核
    ///
    /// 扫描模块目录（开关允许时），随后按配置列表自动加载。
    /// 单项失败不阻止启动，结果反映在返回的报告里。
    pub async fn start(&mut self) -> Result<AutoloadReport> {
        {
            let mut state = self.state.write().await;
            if !state.can_start() {
                return Err(CoreError::InitFailed(format!(
                    "当前状态 {:?} 不允许启动",
                    *state
                )));
            }
            *state = CoreState::Running;
        }

        info!("内核启动");
        self.started_at = Some(Instant::now());

        if self.config.modules.scan_on_start {
            if let Err(e) = self.orchestrator.scan().await {
                warn!(error = %e, "模块目录扫描失败");
            }
        }

        let report = self.orchestrator.load_all(&self.config.modules.autoload).await;
        Ok(report)
    }

    /// 停机
    ///
    /// 排空延迟重载队列后按逆依赖序卸载全部存活模块。
    /// 返回卸载的模块数。
    pub async fn shutdown(&mut self) -> Result<usize> {
        {
            let mut state = self.state.write().await;
            if !state.can_shutdown() {
                return Err(CoreError::InitFailed(format!(
                    "当前状态 {:?} 不允许停机",
                    *state
                )));
            }
            *state = CoreState::ShuttingDown;
        }

        info!("内核停机中");
        let unloaded = self.orchestrator.unload_all().await;

        let mut state = self.state.write().await;
        *state = CoreState::Shutdown;
        info!("内核已停机");
        Ok(unloaded)
    }

    /// 当前内核状态
    pub async fn state(&self) -> CoreState {
        *self.state.read().await
    }

    /// 启动以来的运行时长
    pub fn uptime(&self) -> Option<std::time::Duration> {
        self.started_at.map(|at| at.elapsed())
    }

    /// 内核配置
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// 生命周期协调器
    pub fn coordinator(&self) -> &Arc<LifecycleCoordinator> {
        &self.coordinator
    }

    /// 模块注册表
    pub fn registry(&self) -> &ModuleRegistry {
        self.coordinator.registry()
    }

    // ==================== 模块操作 ====================

    /// 注册进程内静态模块
    pub async fn register_static(&self, descriptor: ModuleDescriptor) -> Result<SelfToken> {
        self.coordinator.registry().register_static(descriptor).await
    }

    /// 加载模块
    pub async fn load_module(&self, name: &str) -> Result<()> {
        self.coordinator.load(name).await
    }

    /// 卸载模块
    pub async fn unload_module(&self, name: &str) -> Result<()> {
        self.coordinator.unload(name).await
    }

    /// 重载模块
    pub async fn reload_module(&self, name: &str, queue: bool) -> Result<()> {
        self.coordinator.reload(name, queue).await
    }

    /// 列出所有模块记录
    pub async fn list_modules(&self) -> Vec<ModuleListEntry> {
        self.coordinator.list().await
    }

    /// 持有模块引用
    pub async fn ref_module(&self, name: &str) -> Result<()> {
        self.coordinator.ref_module(name).await.map(|_| ())
    }

    /// 释放模块引用
    pub async fn unref_module(&self, name: &str) -> Result<()> {
        self.coordinator.unref_module(name).await
    }

    // ==================== 控制台命令包装 ====================

    /// 控制台 `load <name>`
    pub async fn command_load(&self, name: &str) -> CommandOutcome {
        match self.load_module(name).await {
            Ok(()) => CommandOutcome::ok(format!("模块 '{}' 已加载", name)),
            Err(e) => CommandOutcome::from_error(&e),
        }
    }

    /// 控制台 `unload <name>`
    pub async fn command_unload(&self, name: &str) -> CommandOutcome {
        match self.unload_module(name).await {
            Ok(()) => CommandOutcome::ok(format!("模块 '{}' 已卸载", name)),
            Err(e) => CommandOutcome::from_error(&e),
        }
    }

    /// 控制台 `reload <name> [--queue]`
    ///
    /// 排队成功时消息为 "已排队"，退出状态与其他失败一致为
    /// 非零（与原始控制台语义一致）。
    pub async fn command_reload(&self, name: &str, queue: bool) -> CommandOutcome {
        match self.reload_module(name, queue).await {
            Ok(()) => CommandOutcome::ok(format!("模块 '{}' 已重载", name)),
            Err(e) => CommandOutcome::from_error(&e),
        }
    }

    /// 控制台 `modules`
    pub async fn command_modules(&self) -> CommandOutcome {
        let entries = self.list_modules().await;
        let mut messages: Vec<String> = entries.iter().map(|e| e.format_line()).collect();
        messages.push(format!("共 {} 个模块", entries.len()));
        CommandOutcome {
            success: true,
            status: status_code::OK,
            messages,
        }
    }
}
