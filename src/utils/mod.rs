//! 工具模块
//!
//! 包含错误类型、令牌生成和日志系统等通用工具。

pub mod error;
pub mod id;
pub mod logger;

// 重导出常用类型
pub use error::{error_code, status_code, CoreError, Result};
pub use id::{is_valid_token, issue_token};
pub use logger::{LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
