//! # 端到端集成测试
//!
//! 测试 BbsCore 门面的完整工作流程，包括：
//! - 配置文件 → 内核创建 → 启动自动加载 → 停机全量卸载
//! - 控制台命令表面（load / unload / reload / modules）
//! - 状态机守卫（重复启动、未启动停机）

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lbbs_core::{
    status_code, BbsCore, CoreConfig, CoreState, ModuleContext, ModuleDescriptor, ModuleEntry,
    ModuleState, Result,
};
use tempfile::TempDir;

// ============================================================================
// 测试辅助结构
// ============================================================================

/// 计数型模拟模块
#[derive(Default)]
struct CountingModule {
    load_count: AtomicUsize,
    unload_count: AtomicUsize,
}

#[async_trait]
impl ModuleEntry for CountingModule {
    async fn load(&self, _ctx: &ModuleContext) -> Result<()> {
        self.load_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unload(&self, _ctx: &ModuleContext) -> Result<()> {
        self.unload_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn test_config() -> CoreConfig {
    CoreConfig::builder()
        .modules_dir("/nonexistent/modules")
        .scan_on_start(false)
        .build()
}

async fn register(core: &BbsCore, name: &str, module: Arc<CountingModule>) {
    core.register_static(ModuleDescriptor::new(
        name,
        format!("Mock {}", name),
        module as Arc<dyn ModuleEntry>,
    ))
    .await
    .unwrap();
}

// ============================================================================
// 完整生命周期
// ============================================================================

#[tokio::test]
async fn test_full_lifecycle_with_autoload() {
    let config = CoreConfig::builder()
        .modules_dir("/nonexistent/modules")
        .scan_on_start(false)
        .autoload_module("net_smtp")
        .autoload_module("mod_chanserv")
        .build();

    let mut core = BbsCore::new(config).await.unwrap();
    let smtp = Arc::new(CountingModule::default());
    let chanserv = Arc::new(CountingModule::default());
    register(&core, "net_smtp", Arc::clone(&smtp)).await;
    register(&core, "mod_chanserv", Arc::clone(&chanserv)).await;

    // 启动：按配置列表自动加载
    let report = core.start().await.unwrap();
    assert!(report.fully_loaded());
    assert_eq!(report.loaded, vec!["net_smtp", "mod_chanserv"]);
    assert_eq!(core.state().await, CoreState::Running);
    assert_eq!(smtp.load_count.load(Ordering::SeqCst), 1);

    // 停机：全部卸载
    let unloaded = core.shutdown().await.unwrap();
    assert_eq!(unloaded, 2);
    assert_eq!(core.state().await, CoreState::Shutdown);
    assert_eq!(smtp.unload_count.load(Ordering::SeqCst), 1);
    assert_eq!(chanserv.unload_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_config_file_to_running_core() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("bbs.yaml");
    let yaml = format!(
        r#"
logging:
  level: warn
modules:
  modules_dir: {}
  scan_on_start: false
  autoload:
    - mod_boards
"#,
        dir.path().display()
    );
    tokio::fs::write(&config_path, yaml).await.unwrap();

    let config = CoreConfig::from_file(&config_path).await.unwrap();
    let mut core = BbsCore::new(config).await.unwrap();
    let boards = Arc::new(CountingModule::default());
    register(&core, "mod_boards", Arc::clone(&boards)).await;

    let report = core.start().await.unwrap();
    assert!(report.fully_loaded());
    assert_eq!(
        core.registry().state_of("mod_boards").await,
        Some(ModuleState::Loaded)
    );

    core.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_state_machine_guards() {
    let mut core = BbsCore::new(test_config()).await.unwrap();

    // 未启动先停机：拒绝
    assert!(core.shutdown().await.is_err());

    core.start().await.unwrap();

    // 重复启动：拒绝
    assert!(core.start().await.is_err());

    core.shutdown().await.unwrap();

    // 重复停机：拒绝
    assert!(core.shutdown().await.is_err());
}

// ============================================================================
// 控制台命令表面
// ============================================================================

#[tokio::test]
async fn test_console_load_unload_roundtrip() {
    let core = BbsCore::new(test_config()).await.unwrap();
    register(&core, "mod_a", Arc::new(CountingModule::default())).await;

    let outcome = core.command_load("mod_a").await;
    assert!(outcome.success);
    assert_eq!(outcome.status, status_code::OK);

    let outcome = core.command_unload("mod_a").await;
    assert!(outcome.success);

    // 未加载时卸载失败，退出状态非零
    let outcome = core.command_unload("mod_a").await;
    assert!(!outcome.success);
}

#[tokio::test]
async fn test_console_unload_refused_has_reason() {
    let core = BbsCore::new(test_config()).await.unwrap();
    register(&core, "mod_a", Arc::new(CountingModule::default())).await;
    core.load_module("mod_a").await.unwrap();
    core.ref_module("mod_a").await.unwrap();

    let outcome = core.command_unload("mod_a").await;
    assert!(!outcome.success);
    assert_eq!(outcome.status, status_code::CONFLICT);
    assert!(outcome.messages[0].contains("拒绝"));
}

#[tokio::test]
async fn test_console_reload_queue_then_fires() {
    let core = BbsCore::new(test_config()).await.unwrap();
    let module = Arc::new(CountingModule::default());
    register(&core, "mod_a", Arc::clone(&module)).await;
    core.load_module("mod_a").await.unwrap();
    core.ref_module("mod_a").await.unwrap();

    // --queue：返回"已排队"
    let outcome = core.command_reload("mod_a", true).await;
    assert!(!outcome.success);
    assert_eq!(outcome.status, status_code::ACCEPTED);

    // 引用释放后延迟重载执行
    core.unref_module("mod_a").await.unwrap();
    assert_eq!(module.load_count.load(Ordering::SeqCst), 2);
    assert_eq!(
        core.registry().state_of("mod_a").await,
        Some(ModuleState::Loaded)
    );
}

#[tokio::test]
async fn test_console_modules_listing() {
    let core = BbsCore::new(test_config()).await.unwrap();
    register(&core, "net_irc", Arc::new(CountingModule::default())).await;
    register(&core, "mod_chanserv", Arc::new(CountingModule::default())).await;
    core.load_module("net_irc").await.unwrap();

    let outcome = core.command_modules().await;
    assert!(outcome.success);

    // 每条记录一行（按名字排序）+ 汇总行
    assert_eq!(outcome.messages.len(), 3);
    assert!(outcome.messages[0].contains("mod_chanserv"));
    assert!(outcome.messages[0].contains("registered"));
    assert!(outcome.messages[1].contains("net_irc"));
    assert!(outcome.messages[1].contains("loaded"));
    assert!(outcome.messages[2].contains("共 2 个模块"));
}
