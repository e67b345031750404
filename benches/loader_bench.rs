//! 加载器基准测试
//!
//! 测量进程内模块的加载/卸载循环和引用计数操作的吞吐。

use std::sync::Arc;

use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, Criterion};
use lbbs_core::{
    DependencyTracker, DynamicLoader, LifecycleCoordinator, ModuleContext, ModuleDescriptor,
    ModuleEntry, ModuleRegistry, Result,
};

struct NoopModule;

#[async_trait]
impl ModuleEntry for NoopModule {
    async fn load(&self, _ctx: &ModuleContext) -> Result<()> {
        Ok(())
    }

    async fn unload(&self, _ctx: &ModuleContext) -> Result<()> {
        Ok(())
    }
}

fn new_coordinator() -> Arc<LifecycleCoordinator> {
    Arc::new(LifecycleCoordinator::new(
        ModuleRegistry::new(),
        DependencyTracker::new(),
        DynamicLoader::new("/nonexistent/modules"),
    ))
}

fn bench_load_unload_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let coord = new_coordinator();
    rt.block_on(async {
        coord
            .registry()
            .register_static(ModuleDescriptor::new(
                "mod_bench",
                "Bench module",
                Arc::new(NoopModule),
            ))
            .await
            .unwrap();
    });

    c.bench_function("load_unload_cycle", |b| {
        b.to_async(&rt).iter(|| {
            let coord = Arc::clone(&coord);
            async move {
                coord.load("mod_bench").await.unwrap();
                coord.unload("mod_bench").await.unwrap();
            }
        })
    });
}

fn bench_ref_unref(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let coord = new_coordinator();
    rt.block_on(async {
        coord
            .registry()
            .register_static(ModuleDescriptor::new(
                "mod_bench",
                "Bench module",
                Arc::new(NoopModule),
            ))
            .await
            .unwrap();
        coord.load("mod_bench").await.unwrap();
    });

    c.bench_function("ref_unref", |b| {
        b.to_async(&rt).iter(|| {
            let coord = Arc::clone(&coord);
            async move {
                coord.ref_module("mod_bench").await.unwrap();
                coord.unref_module("mod_bench").await.unwrap();
            }
        })
    });
}

fn bench_list_modules(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let coord = new_coordinator();
    rt.block_on(async {
        for i in 0..64 {
            coord
                .registry()
                .register_static(ModuleDescriptor::new(
                    format!("mod_bench_{:02}", i),
                    "Bench module",
                    Arc::new(NoopModule),
                ))
                .await
                .unwrap();
        }
    });

    c.bench_function("list_modules_64", |b| {
        b.to_async(&rt).iter(|| {
            let coord = Arc::clone(&coord);
            async move {
                let entries = coord.list().await;
                assert_eq!(entries.len(), 64);
            }
        })
    });
}

criterion_group!(
    benches,
    bench_load_unload_cycle,
    bench_ref_unref,
    bench_list_modules
);
criterion_main!(benches);
