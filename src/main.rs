//! LBBS Core 命令行入口
//!
//! LBBS 内核的命令行工具，提供启动、管理和调试功能。
//!
//! # 命令概览
//!
//! - `start` - 启动内核（自动加载配置的模块，Ctrl+C 优雅停机）
//! - `version` - 显示版本信息
//! - `check-config` - 验证配置文件
//! - `load <name>` - 加载模块
//! - `unload <name>` - 卸载模块
//! - `reload <name> [--queue]` - 重载模块（可排队）
//! - `modules` - 列出模块记录
//!
//! # 使用示例
//!
//! ```bash
//! # 启动内核
//! lbbs-core start
//!
//! # 使用自定义配置文件启动
//! lbbs-core -c my-bbs.yaml start
//!
//! # 重载模块，忙时排队
//! lbbs-core reload net_smtp --queue
//!
//! # 查看模块列表
//! lbbs-core modules
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

use lbbs_core::{BbsCore, CommandOutcome, CoreConfig};

/// LBBS Core - 轻量级公告板系统内核
///
/// 动态模块加载器与生命周期管理器，网络服务与领域功能
/// 以可插拔模块的形式接入。
#[derive(Parser)]
#[command(name = "lbbs-core")]
#[command(version, about = "轻量级公告板系统内核", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "bbs.yaml", global = true)]
    config: PathBuf,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// 开发模式（启用更详细的日志和调试功能）
    #[arg(long, global = true)]
    dev: bool,

    /// 子命令
    #[command(subcommand)]
    command: Option<Commands>,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 启动内核
    ///
    /// 扫描模块目录并自动加载配置列表。
    /// 按 Ctrl+C 可优雅停机（逆依赖序卸载全部模块）。
    Start,

    /// 查看版本信息
    Version,

    /// 验证配置文件
    ///
    /// 检查配置文件是否有效，并显示解析后的配置内容。
    CheckConfig {
        /// 配置文件路径（不指定则使用全局 -c 选项）
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// 加载模块
    ///
    /// 退出状态 0 表示成功，非零表示失败。
    Load {
        /// 模块名（可带可不带 .so 扩展名）
        name: String,
    },

    /// 卸载模块
    ///
    /// 引用计数非零或存在依赖者时失败。
    Unload {
        /// 模块名
        name: String,
    },

    /// 重载模块
    ///
    /// 不带 --queue 时模块忙则拒绝；带 --queue 时返回"已排队"，
    /// 引用计数归零后执行。
    Reload {
        /// 模块名
        name: String,

        /// 模块忙时排队等待引用计数归零
        #[arg(long)]
        queue: bool,
    },

    /// 列出模块记录
    ///
    /// 每条记录一行：名字、引用计数、状态、描述。
    Modules,
}

/// 初始化日志系统
///
/// 根据日志级别和开发模式配置 tracing 日志。
fn init_logging(level: &str, dev_mode: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::new(format!("lbbs_core={}", level))
    });

    let builder = fmt().with_env_filter(filter).with_target(true);

    if dev_mode {
        // 开发模式：显示更多信息
        builder
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    } else {
        // 生产模式：简洁输出
        builder
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

/// 启动内核
async fn run_start(config: CoreConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("启动 LBBS 内核...");

    let mut core = BbsCore::new(config).await?;
    let report = core.start().await?;

    println!();
    println!("╔════════════════════════════════════════════════════════╗");
    println!("║            LBBS 内核已启动 (LBBS Core Started)         ║");
    println!("╠════════════════════════════════════════════════════════╣");
    println!("║  版本: {}                                           ║", lbbs_core::VERSION);
    println!("║  模块: {}                                              ║", report.summary());
    println!("║                                                        ║");
    println!("║  按 Ctrl+C 优雅停机                                    ║");
    println!("╚════════════════════════════════════════════════════════╝");
    println!();

    // 等待停机信号
    signal::ctrl_c().await?;

    println!();
    info!("收到停机信号，正在优雅停机...");
    let unloaded = core.shutdown().await?;
    info!(unloaded, "LBBS 内核已停机");

    Ok(())
}

/// 检查配置文件
async fn check_config(path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    println!("检查配置文件: {}", path.display());
    println!();

    if !path.exists() {
        println!("⚠️  警告: 配置文件不存在，将使用默认配置");
        println!();
        print_config(&CoreConfig::default());
        return Ok(());
    }

    match CoreConfig::from_file(path).await {
        Ok(config) => {
            println!("✅ 配置文件有效！");
            println!();
            print_config(&config);
            Ok(())
        }
        Err(e) => {
            println!("❌ 配置文件无效: {}", e);
            Err(Box::new(e))
        }
    }
}

/// 打印配置内容
fn print_config(config: &CoreConfig) {
    println!("配置内容:");
    println!("────────────────────────────────────────");
    println!("  [日志配置]");
    println!("    日志级别:       {}", config.logging.level);
    println!("    文件输出:       {}", if config.logging.file_output { "是" } else { "否" });
    println!("    JSON 格式:      {}", if config.logging.json_format { "是" } else { "否" });
    println!("    轮转策略:       {}", config.logging.rotation);
    println!();
    println!("  [模块配置]");
    println!("    模块目录:       {}", config.modules.modules_dir.display());
    println!("    启动扫描:       {}", if config.modules.scan_on_start { "是" } else { "否" });
    println!("    自动加载:       {:?}", config.modules.autoload);
    println!();
    println!("  [其他]");
    println!("    开发模式:       {}", if config.dev_mode { "是" } else { "否" });
    println!("────────────────────────────────────────");
}

/// 打印版本信息
fn print_version() {
    println!();
    println!("LBBS Core - 轻量级公告板系统内核");
    println!("═══════════════════════════════════════");
    println!("  版本:             {}", lbbs_core::VERSION);
    println!();
    println!("构建信息:");
    println!("  目标平台:         {}", std::env::consts::ARCH);
    println!("  操作系统:         {}", std::env::consts::OS);
    println!("  共享对象扩展名:   .{}", std::env::consts::DLL_EXTENSION);
    println!("═══════════════════════════════════════");
    println!();
}

/// 打印命令结果并换算退出码
fn report_outcome(outcome: CommandOutcome) -> ExitCode {
    for message in &outcome.messages {
        println!("{}", message);
    }
    if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// 对临时内核实例执行一条模块命令
///
/// 注意：这是一个简化实现，操作的是一个新建的内核实例，
/// 实际部署应通过控制台套接字与运行中的内核通信。
async fn run_module_command<F, Fut>(
    config: CoreConfig,
    command: F,
) -> Result<ExitCode, Box<dyn std::error::Error>>
where
    F: FnOnce(BbsCore) -> Fut,
    Fut: std::future::Future<Output = CommandOutcome>,
{
    let mut core = BbsCore::new(config).await?;
    core.start().await?;
    Ok(report_outcome(command(core).await))
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // 初始化日志（Version 和 CheckConfig 命令不需要日志）
    let needs_logging = !matches!(
        cli.command,
        Some(Commands::Version) | Some(Commands::CheckConfig { .. })
    );

    if needs_logging {
        init_logging(&cli.log_level, cli.dev);
    }

    match cli.command {
        // 默认命令或 Start 命令：启动内核
        Some(Commands::Start) | None => {
            let config = load_config(&cli.config, cli.dev).await?;
            run_start(config).await?;
            Ok(ExitCode::SUCCESS)
        }

        // 显示版本信息
        Some(Commands::Version) => {
            print_version();
            Ok(ExitCode::SUCCESS)
        }

        // 检查配置文件
        Some(Commands::CheckConfig { config }) => {
            let config_path = config.unwrap_or(cli.config);
            check_config(&config_path).await?;
            Ok(ExitCode::SUCCESS)
        }

        // 加载模块
        Some(Commands::Load { name }) => {
            let config = load_config(&cli.config, cli.dev).await?;
            run_module_command(config, |core| async move { core.command_load(&name).await }).await
        }

        // 卸载模块
        Some(Commands::Unload { name }) => {
            let config = load_config(&cli.config, cli.dev).await?;
            run_module_command(config, |core| async move { core.command_unload(&name).await })
                .await
        }

        // 重载模块
        Some(Commands::Reload { name, queue }) => {
            let config = load_config(&cli.config, cli.dev).await?;
            run_module_command(config, |core| async move {
                core.command_reload(&name, queue).await
            })
            .await
        }

        // 列出模块记录
        Some(Commands::Modules) => {
            let config = load_config(&cli.config, cli.dev).await?;
            run_module_command(config, |core| async move { core.command_modules().await }).await
        }
    }
}

/// 加载配置文件
async fn load_config(
    config_path: &PathBuf,
    dev_mode: bool,
) -> Result<CoreConfig, Box<dyn std::error::Error>> {
    let config = if config_path.exists() {
        let mut config = CoreConfig::from_file(config_path).await?;
        if dev_mode {
            config.dev_mode = true;
        }
        info!("已加载配置文件: {}", config_path.display());
        config
    } else {
        info!("配置文件不存在 ({})，使用默认配置", config_path.display());
        let mut config = CoreConfig::default();
        if dev_mode {
            config.dev_mode = true;
        }
        config
    };

    Ok(config)
}
