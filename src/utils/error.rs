//! LBBS 内核错误类型定义
//!
//! 本模块定义了模块加载器内核中使用的所有错误类型。

use thiserror::Error;

/// LBBS 内核核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 模块生命周期错误 ====================

    /// 模块未找到
    #[error("模块未找到: '{0}'")]
    ModuleNotFound(String),

    /// 模块已加载
    #[error("模块已加载: '{0}'")]
    ModuleAlreadyLoaded(String),

    /// 模块加载失败
    #[error("模块加载失败: '{module}' - {cause}")]
    ModuleLoadFailed {
        module: String,
        cause: String,
    },

    /// 模块卸载失败（unload 入口点返回错误）
    #[error("模块卸载失败: '{module}' - {cause}")]
    ModuleUnloadFailed {
        module: String,
        cause: String,
    },

    /// 卸载被拒绝（引用计数非零或存在依赖者）
    #[error("模块 '{module}' 卸载被拒绝: {reason}")]
    UnloadRefused {
        module: String,
        reason: String,
    },

    /// 重载已排队（引用计数归零后执行）
    #[error("模块 '{0}' 重载已排队")]
    ReloadQueued(String),

    /// 重载被拒绝（模块忙且未请求排队）
    #[error("模块 '{0}' 忙，重载被拒绝")]
    ReloadRefused(String),

    /// 会形成循环依赖
    #[error("检测到循环依赖: {0}")]
    WouldCycle(String),

    /// 模块名非法
    #[error("模块名非法: '{0}'")]
    InvalidName(String),

    /// 状态冲突（当前状态不允许该操作）
    #[error("模块 '{module}' 状态冲突: 当前状态 {state} 不允许 {operation}")]
    StateConflict {
        module: String,
        state: String,
        operation: String,
    },

    // ==================== 注册与依赖错误 ====================

    /// 注册失败（无匹配的打开中记录，或名字冲突）
    #[error("模块注册失败: '{module}' - {reason}")]
    RegisterFailed {
        module: String,
        reason: String,
    },

    /// 依赖模块未找到
    #[error("依赖模块未找到: '{0}'")]
    DependencyNotFound(String),

    // ==================== 动态库后端错误 ====================

    /// 共享对象文件不存在
    #[error("共享对象不存在: {0}")]
    BackingNotFound(String),

    /// 共享对象格式损坏或无法打开
    #[error("共享对象无法打开: {path} - {cause}")]
    BackingMalformed {
        path: String,
        cause: String,
    },

    /// 注册符号缺失
    #[error("共享对象缺少注册符号: {path}")]
    SymbolMissing {
        path: String,
    },

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue {
        key: String,
        reason: String,
    },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ==================== 通用错误 ====================

    /// 内部错误（不变量被破坏）
    #[error("内部错误: {0}")]
    Internal(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 内核操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 状态码常量
pub mod status_code {
    /// 成功
    pub const OK: u16 = 200;

    /// 已接受（重载已排队，稍后执行）
    pub const ACCEPTED: u16 = 202;

    /// 请求格式错误
    pub const BAD_REQUEST: u16 = 400;

    /// 未找到
    pub const NOT_FOUND: u16 = 404;

    /// 冲突
    pub const CONFLICT: u16 = 409;

    /// 内部错误
    pub const INTERNAL_ERROR: u16 = 500;

    /// 服务不可用（模块忙）
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// 错误码常量
pub mod error_code {
    // 模块错误 (MODULE-xxx)
    pub const MODULE_NOT_FOUND: &str = "MODULE-001";
    pub const MODULE_ALREADY_LOADED: &str = "MODULE-002";
    pub const MODULE_LOAD_FAILED: &str = "MODULE-003";
    pub const MODULE_UNLOAD_FAILED: &str = "MODULE-004";
    pub const MODULE_UNLOAD_REFUSED: &str = "MODULE-005";
    pub const MODULE_WOULD_CYCLE: &str = "MODULE-006";
    pub const MODULE_STATE_CONFLICT: &str = "MODULE-007";
    pub const MODULE_INVALID_NAME: &str = "MODULE-008";

    // 重载错误 (RELOAD-xxx)
    pub const RELOAD_QUEUED: &str = "RELOAD-001";
    pub const RELOAD_REFUSED: &str = "RELOAD-002";

    // 动态库后端错误 (BACKING-xxx)
    pub const BACKING_NOT_FOUND: &str = "BACKING-001";
    pub const BACKING_MALFORMED: &str = "BACKING-002";
    pub const BACKING_SYMBOL_MISSING: &str = "BACKING-003";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";

    // 核心错误 (CORE-xxx)
    pub const CORE_INTERNAL: &str = "CORE-001";
    pub const CORE_INIT_FAILED: &str = "CORE-002";
}

impl CoreError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::ModuleNotFound(_) => error_code::MODULE_NOT_FOUND,
            CoreError::ModuleAlreadyLoaded(_) => error_code::MODULE_ALREADY_LOADED,
            CoreError::ModuleLoadFailed { .. } => error_code::MODULE_LOAD_FAILED,
            CoreError::ModuleUnloadFailed { .. } => error_code::MODULE_UNLOAD_FAILED,
            CoreError::UnloadRefused { .. } => error_code::MODULE_UNLOAD_REFUSED,
            CoreError::ReloadQueued(_) => error_code::RELOAD_QUEUED,
            CoreError::ReloadRefused(_) => error_code::RELOAD_REFUSED,
            CoreError::WouldCycle(_) => error_code::MODULE_WOULD_CYCLE,
            CoreError::InvalidName(_) => error_code::MODULE_INVALID_NAME,
            CoreError::StateConflict { .. } => error_code::MODULE_STATE_CONFLICT,
            CoreError::DependencyNotFound(_) => error_code::MODULE_NOT_FOUND,
            CoreError::BackingNotFound(_) => error_code::BACKING_NOT_FOUND,
            CoreError::BackingMalformed { .. } => error_code::BACKING_MALFORMED,
            CoreError::SymbolMissing { .. } => error_code::BACKING_SYMBOL_MISSING,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            CoreError::InitFailed(_) => error_code::CORE_INIT_FAILED,
            _ => error_code::CORE_INTERNAL,
        }
    }

    /// 获取状态码
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::ModuleNotFound(_) => status_code::NOT_FOUND,
            CoreError::DependencyNotFound(_) => status_code::NOT_FOUND,
            CoreError::BackingNotFound(_) => status_code::NOT_FOUND,
            CoreError::ModuleAlreadyLoaded(_) => status_code::CONFLICT,
            CoreError::StateConflict { .. } => status_code::CONFLICT,
            CoreError::UnloadRefused { .. } => status_code::CONFLICT,
            CoreError::WouldCycle(_) => status_code::CONFLICT,
            CoreError::ReloadQueued(_) => status_code::ACCEPTED,
            CoreError::ReloadRefused(_) => status_code::SERVICE_UNAVAILABLE,
            CoreError::InvalidName(_) => status_code::BAD_REQUEST,
            CoreError::InvalidConfigValue { .. } => status_code::BAD_REQUEST,
            _ => status_code::INTERNAL_ERROR,
        }
    }

    /// 是否为"重载已排队"
    ///
    /// 排队不是真正的失败，控制台对它单独提示。
    pub fn is_reload_queued(&self) -> bool {
        matches!(self, CoreError::ReloadQueued(_))
    }
}
