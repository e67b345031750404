//! 日志系统模块
//!
//! 基于 tracing 生态实现内核日志，包括：
//!
//! - 多级别日志（TRACE, DEBUG, INFO, WARN, ERROR）
//! - 结构化日志（JSON 格式输出）
//! - 文件日志输出（异步非阻塞）
//! - 日志轮转（每天、每小时）
//! - 按模块过滤（EnvFilter 指令）
//!
//! # 示例
//!
//! ```rust,no_run
//! use lbbs_core::utils::logger::{Logger, LoggerConfig, RotationStrategy};
//! use std::path::PathBuf;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LoggerConfig::builder()
//!         .level("debug")
//!         .file_output(PathBuf::from("./logs"))
//!         .rotation(RotationStrategy::Daily)
//!         .build();
//!
//!     let _guard = Logger::init(config)?;
//!     tracing::info!(module = "net_smtp", "模块加载完成");
//!     Ok(())
//! }
//! ```

use crate::core::config::LogConfig;
use crate::utils::{CoreError, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// 日志轮转策略
// ============================================================================

/// 日志轮转策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// 不轮转（单个日志文件）
    Never,
    /// 每小时轮转
    Hourly,
    /// 每天轮转（默认）
    #[default]
    Daily,
}

impl RotationStrategy {
    /// 转换为 tracing-appender 的 Rotation 类型
    fn to_rotation(self) -> Rotation {
        match self {
            RotationStrategy::Never => Rotation::NEVER,
            RotationStrategy::Hourly => Rotation::HOURLY,
            RotationStrategy::Daily => Rotation::DAILY,
        }
    }

    /// 从字符串解析轮转策略
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "never" | "none" => RotationStrategy::Never,
            "hourly" | "hour" => RotationStrategy::Hourly,
            _ => RotationStrategy::Daily,
        }
    }
}

impl std::fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RotationStrategy::Never => write!(f, "never"),
            RotationStrategy::Hourly => write!(f, "hourly"),
            RotationStrategy::Daily => write!(f, "daily"),
        }
    }
}

// ============================================================================
// 日志配置
// ============================================================================

/// 日志系统配置
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// 默认日志级别（"trace", "debug", "info", "warn", "error"）
    pub level: String,

    /// 是否使用 JSON 格式输出
    pub json_format: bool,

    /// 是否输出到控制台
    pub console_output: bool,

    /// 文件输出目录（None 表示不输出到文件）
    pub file_output: Option<PathBuf>,

    /// 日志文件名前缀
    pub file_prefix: String,

    /// 日志轮转策略
    pub rotation: RotationStrategy,

    /// 是否显示目标模块
    pub show_target: bool,

    /// 是否显示线程 ID
    pub show_thread_ids: bool,

    /// 自定义过滤指令（EnvFilter 格式）
    /// 例如："lbbs_core=debug,lbbs_core::module=trace"
    pub filter_directives: Option<String>,

    /// 是否启用 ANSI 颜色（控制台输出）
    pub ansi_colors: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: None,
            file_prefix: "lbbs".to_string(),
            rotation: RotationStrategy::Daily,
            show_target: true,
            show_thread_ids: false,
            filter_directives: None,
            ansi_colors: true,
        }
    }
}

impl LoggerConfig {
    /// 创建配置构建器
    pub fn builder() -> LoggerConfigBuilder {
        LoggerConfigBuilder::default()
    }

    /// 从内核日志配置段转换
    pub fn from_log_config(config: &LogConfig) -> Self {
        Self {
            level: config.level.clone(),
            json_format: config.json_format,
            file_output: if config.file_output {
                config.log_dir.clone()
            } else {
                None
            },
            rotation: RotationStrategy::parse(&config.rotation),
            ..Self::default()
        }
    }
}

/// 日志配置构建器
#[derive(Debug, Default)]
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    /// 设置日志级别
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// 启用 JSON 格式输出
    pub fn json_format(mut self, json: bool) -> Self {
        self.config.json_format = json;
        self
    }

    /// 设置是否输出到控制台
    pub fn console_output(mut self, console: bool) -> Self {
        self.config.console_output = console;
        self
    }

    /// 设置文件输出目录
    pub fn file_output(mut self, dir: PathBuf) -> Self {
        self.config.file_output = Some(dir);
        self
    }

    /// 设置日志文件名前缀
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.file_prefix = prefix.into();
        self
    }

    /// 设置轮转策略
    pub fn rotation(mut self, rotation: RotationStrategy) -> Self {
        self.config.rotation = rotation;
        self
    }

    /// 设置是否显示线程 ID
    pub fn show_thread_ids(mut self, show: bool) -> Self {
        self.config.show_thread_ids = show;
        self
    }

    /// 设置过滤指令
    pub fn filter_directives(mut self, directives: impl Into<String>) -> Self {
        self.config.filter_directives = Some(directives.into());
        self
    }

    /// 构建配置
    pub fn build(self) -> LoggerConfig {
        self.config
    }
}

// ============================================================================
// 日志系统
// ============================================================================

/// 日志系统守卫
///
/// 持有异步写入线程的守卫；丢弃时冲刷并关闭文件输出。
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 日志系统入口
pub struct Logger;

impl Logger {
    /// 初始化全局日志订阅器
    ///
    /// 进程内只能初始化一次；重复初始化返回错误。
    /// 返回的守卫需要持有到进程退出，否则文件日志可能丢尾。
    pub fn init(config: LoggerConfig) -> Result<LogGuard> {
        let filter = Self::build_filter(&config);

        let mut file_guard = None;
        let file_layer = match &config.file_output {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let appender = RollingFileAppender::new(
                    config.rotation.to_rotation(),
                    dir,
                    format!("{}.log", config.file_prefix),
                );
                let (writer, guard) = tracing_appender::non_blocking(appender);
                file_guard = Some(guard);

                let layer = fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(config.show_target);
                Some(layer)
            }
            None => None,
        };

        let registry = tracing_subscriber::registry().with(filter);

        let init_result = if config.console_output {
            let console_layer = fmt::layer()
                .with_ansi(config.ansi_colors)
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids);

            if config.json_format {
                registry
                    .with(file_layer)
                    .with(console_layer.json())
                    .try_init()
            } else {
                registry.with(file_layer).with(console_layer).try_init()
            }
        } else {
            registry.with(file_layer).try_init()
        };

        init_result.map_err(|e| CoreError::InitFailed(format!("日志系统初始化失败: {}", e)))?;

        Ok(LogGuard {
            _file_guard: file_guard,
        })
    }

    /// 构建过滤器
    fn build_filter(config: &LoggerConfig) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let directives = config
                .filter_directives
                .clone()
                .unwrap_or_else(|| format!("lbbs_core={}", config.level));
            EnvFilter::new(directives)
        })
    }
}
