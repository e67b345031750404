//! 内核配置
//!
//! 定义内核的配置结构和加载逻辑。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// 保留日志文件数
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

fn default_max_files() -> usize {
    7
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
            max_files: default_max_files(),
        }
    }
}

/// 模块管理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// 模块目录（共享对象所在处）
    #[serde(default = "default_modules_dir")]
    pub modules_dir: PathBuf,

    /// 启动时是否扫描模块目录
    #[serde(default = "default_true")]
    pub scan_on_start: bool,

    /// 自动加载的模块列表（按序）
    #[serde(default)]
    pub autoload: Vec<String>,
}

fn default_modules_dir() -> PathBuf {
    PathBuf::from("./modules")
}

fn default_true() -> bool {
    true
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            modules_dir: default_modules_dir(),
            scan_on_start: true,
            autoload: vec![],
        }
    }
}

/// 内核配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 模块管理配置
    #[serde(default)]
    pub modules: ModuleConfig,

    /// 是否为开发模式
    #[serde(default)]
    pub dev_mode: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            logging: LogConfig::default(),
            modules: ModuleConfig::default(),
            dev_mode: false,
        }
    }
}

impl CoreConfig {
    /// 创建配置构建器
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::new()
    }

    /// 从文件加载配置
    ///
    /// 按扩展名选择格式：`.json` 走 JSON，其余按 YAML 解析。
    pub async fn from_file(path: impl Into<PathBuf>) -> crate::utils::Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await?;

        let mut config: CoreConfig = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        config.config_path = Some(path);
        config.validate()?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> crate::utils::Result<()> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(crate::utils::CoreError::InvalidConfigValue {
                key: "logging.level".to_string(),
                reason: format!("未知日志级别 '{}'", self.logging.level),
            });
        }

        for name in &self.modules.autoload {
            if crate::module::canonical_name(name).is_err() {
                return Err(crate::utils::CoreError::InvalidConfigValue {
                    key: "modules.autoload".to_string(),
                    reason: format!("模块名非法 '{}'", name),
                });
            }
        }

        Ok(())
    }
}

/// 内核配置构建器
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    /// 创建构建器
    pub fn new() -> Self {
        Self {
            config: CoreConfig::default(),
        }
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 设置模块目录
    pub fn modules_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.modules.modules_dir = dir.into();
        self
    }

    /// 设置自动加载列表
    pub fn autoload(mut self, modules: Vec<String>) -> Self {
        self.config.modules.autoload = modules;
        self
    }

    /// 追加一个自动加载模块
    pub fn autoload_module(mut self, name: impl Into<String>) -> Self {
        self.config.modules.autoload.push(name.into());
        self
    }

    /// 设置启动扫描开关
    pub fn scan_on_start(mut self, scan: bool) -> Self {
        self.config.modules.scan_on_start = scan;
        self
    }

    /// 设置开发模式
    pub fn dev_mode(mut self, dev: bool) -> Self {
        self.config.dev_mode = dev;
        self
    }

    /// 构建配置
    pub fn build(self) -> CoreConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.modules.modules_dir, PathBuf::from("./modules"));
        assert!(config.modules.scan_on_start);
        assert!(config.modules.autoload.is_empty());
        assert!(!config.dev_mode);
    }

    #[test]
    fn test_builder() {
        let config = CoreConfig::builder()
            .log_level("debug")
            .modules_dir("/var/lib/lbbs/modules")
            .autoload_module("net_smtp")
            .autoload_module("mod_chanserv")
            .scan_on_start(false)
            .dev_mode(true)
            .build();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.modules.modules_dir,
            PathBuf::from("/var/lib/lbbs/modules")
        );
        assert_eq!(config.modules.autoload, vec!["net_smtp", "mod_chanserv"]);
        assert!(!config.modules.scan_on_start);
        assert!(config.dev_mode);
    }

    #[test]
    fn test_validate_log_level() {
        let config = CoreConfig::builder().log_level("verbose").build();
        assert!(config.validate().is_err());

        let config = CoreConfig::builder().log_level("warn").build();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_autoload_names() {
        let config = CoreConfig::builder()
            .autoload_module("../escape")
            .build();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_from_yaml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bbs.yaml");
        let yaml = r#"
logging:
  level: debug
modules:
  modules_dir: /opt/lbbs/modules
  autoload:
    - net_smtp
    - net_imap
    - mod_chanserv
"#;
        tokio::fs::write(&path, yaml).await.unwrap();

        let config = CoreConfig::from_file(&path).await.unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.modules.modules_dir,
            PathBuf::from("/opt/lbbs/modules")
        );
        assert_eq!(
            config.modules.autoload,
            vec!["net_smtp", "net_imap", "mod_chanserv"]
        );
        assert_eq!(config.config_path, Some(path));
    }

    #[tokio::test]
    async fn test_from_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bbs.json");
        let json = r#"{"modules": {"autoload": ["net_irc"]}}"#;
        tokio::fs::write(&path, json).await.unwrap();

        let config = CoreConfig::from_file(&path).await.unwrap();
        assert_eq!(config.modules.autoload, vec!["net_irc"]);
        // 未给出的段落落到默认值
        assert_eq!(config.logging.level, "info");
    }

    #[tokio::test]
    async fn test_from_file_invalid_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bbs.yaml");
        tokio::fs::write(&path, "logging: [broken").await.unwrap();

        let result = CoreConfig::from_file(&path).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_from_file_missing() {
        let result = CoreConfig::from_file("/nonexistent/bbs.yaml").await;
        assert!(result.is_err());
    }
}
