//! 基础用法示例
//!
//! 演示如何嵌入 LBBS 内核：注册一个进程内模块、声明依赖、
//! 加载并查看模块列表，最后优雅停机。
//!
//! 运行方式：
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lbbs_core::{
    BbsCore, CoreConfig, ModuleContext, ModuleDescriptor, ModuleEntry, ModuleRef, Result,
};

/// 一个最小的服务模块
struct EchoService;

#[async_trait]
impl ModuleEntry for EchoService {
    async fn load(&self, ctx: &ModuleContext) -> Result<()> {
        println!("[{}] 服务初始化", ctx.module_name());
        Ok(())
    }

    async fn unload(&self, ctx: &ModuleContext) -> Result<()> {
        println!("[{}] 服务清理", ctx.module_name());
        Ok(())
    }
}

/// 一个依赖 echo 服务的功能模块
struct EchoConsumer {
    held: Mutex<Vec<ModuleRef>>,
}

#[async_trait]
impl ModuleEntry for EchoConsumer {
    async fn load(&self, ctx: &ModuleContext) -> Result<()> {
        // 钉住依赖：echo 服务的引用计数加一
        let reference = ctx.require("svc_echo").await?;
        self.held.lock().unwrap().push(reference);
        println!("[{}] 已连接 svc_echo", ctx.module_name());
        Ok(())
    }

    async fn unload(&self, ctx: &ModuleContext) -> Result<()> {
        let references: Vec<_> = self.held.lock().unwrap().drain(..).collect();
        for reference in references {
            ctx.unrequire(reference).await?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let config = CoreConfig::builder()
        .scan_on_start(false)
        .autoload_module("mod_echo_consumer")
        .build();

    let mut core = BbsCore::new(config).await?;

    // 注册进程内模块
    core.register_static(ModuleDescriptor::new(
        "svc_echo",
        "Echo service",
        Arc::new(EchoService),
    ))
    .await?;
    core.register_static(ModuleDescriptor::new(
        "mod_echo_consumer",
        "Echo consumer",
        Arc::new(EchoConsumer {
            held: Mutex::new(Vec::new()),
        }),
    ))
    .await?;

    // 启动：mod_echo_consumer 自动加载，svc_echo 被隐式拉起
    let report = core.start().await?;
    println!("启动结果: {}", report.summary());

    // 查看模块列表
    for line in core.command_modules().await.messages {
        println!("{}", line);
    }

    // 停机：逆依赖序卸载
    let unloaded = core.shutdown().await?;
    println!("已卸载 {} 个模块", unloaded);

    Ok(())
}
