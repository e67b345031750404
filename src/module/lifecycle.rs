//! 生命周期协调器
//!
//! 驱动模块的加载 / 卸载 / 重载状态机：
//! `unloaded -> opening -> registered -> loaded -> unloading -> unloaded`，
//! 任何非终止状态出错都进入 `failed`。
//!
//! 并发门控：取记录走注册表锁，随后在不持注册表锁的前提下获取
//! 记录的变迁锁；入口点调用期间只持变迁锁，同一记录同一时刻至多
//! 一个生命周期变迁在途。入口点可以无限期阻塞，协调器不设超时。

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::backend::DynamicLoader;
use super::dependency::{DependencyTracker, ModuleRef};
use super::descriptor::{ModuleEntry, ModuleState, SelfToken};
use super::registry::{canonical_name, ModuleListEntry, ModuleRecord, ModuleRegistry};
use crate::utils::{CoreError, Result};

// ============================================================================
// 模块上下文
// ============================================================================

/// 交给模块入口点的上下文
///
/// 携带模块的自持令牌，并提供 require / unrequire 回调。上下文
/// 还记录本次加载的调用链，用于拒绝同一链内的重入式 require。
pub struct ModuleContext {
    coordinator: Arc<LifecycleCoordinator>,
    self_token: SelfToken,
    chain: Vec<String>,
}

impl ModuleContext {
    /// 模块的自持令牌
    pub fn self_token(&self) -> &SelfToken {
        &self.self_token
    }

    /// 模块的规范名
    pub fn module_name(&self) -> &str {
        self.self_token.name()
    }

    /// 声明本模块依赖指定模块
    ///
    /// 依赖未加载时递归加载之。成功时依赖的引用计数加一并记下
    /// 依赖边，返回的引用必须在本模块 `unload` 里交还给
    /// [`unrequire`](Self::unrequire)。
    ///
    /// # Errors
    ///
    /// `ModuleNotFound` / `ModuleLoadFailed` / `WouldCycle`
    pub async fn require(&self, name: &str) -> Result<ModuleRef> {
        self.coordinator
            .require_for(&self.self_token, &self.chain, name)
            .await
    }

    /// 解除对指定模块的依赖
    ///
    /// 必须在本模块的 `unload` 入口点内调用，次序与获取相反。
    pub async fn unrequire(&self, reference: ModuleRef) -> Result<()> {
        self.coordinator
            .unrequire_for(&self.self_token, reference)
            .await
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module", &self.self_token.name())
            .field("chain", &self.chain)
            .finish()
    }
}

// ============================================================================
// 协调器
// ============================================================================

/// 生命周期协调器
///
/// 注册表、依赖追踪器和动态库后端的组合体；load / unload /
/// reload / list 的唯一入口。
pub struct LifecycleCoordinator {
    registry: ModuleRegistry,
    tracker: DependencyTracker,
    backend: DynamicLoader,
}

impl LifecycleCoordinator {
    /// 创建协调器
    pub fn new(registry: ModuleRegistry, tracker: DependencyTracker, backend: DynamicLoader) -> Self {
        Self {
            registry,
            tracker,
            backend,
        }
    }

    /// 注册表访问
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// 依赖追踪器访问
    pub fn tracker(&self) -> &DependencyTracker {
        &self.tracker
    }

    /// 动态库后端访问
    pub fn backend(&self) -> &DynamicLoader {
        &self.backend
    }

    // ==================== 顶层操作 ====================

    /// 按名字加载模块
    ///
    /// 名字可带可不带平台扩展名。
    #[instrument(skip(self))]
    pub async fn load(self: &Arc<Self>, name: &str) -> Result<()> {
        let canon = canonical_name(name)?;
        let result = self.load_chain(&canon, &[]).await;
        self.drain_deferred().await;
        result
    }

    /// 按名字卸载模块
    ///
    /// 引用计数非零或存在依赖者时拒绝。
    #[instrument(skip(self))]
    pub async fn unload(self: &Arc<Self>, name: &str) -> Result<()> {
        let canon = canonical_name(name)?;
        let result = self.unload_internal(&canon).await;
        self.drain_deferred().await;
        result
    }

    /// 重载模块（完整的卸载-再加载循环）
    ///
    /// 模块忙（引用计数非零）时：`try_delayed` 置位则设置延迟
    /// 重载位并返回 [`CoreError::ReloadQueued`]，否则返回
    /// [`CoreError::ReloadRefused`]。延迟位是电平触发的，多次
    /// 请求合并为一次。
    #[instrument(skip(self))]
    pub async fn reload(self: &Arc<Self>, name: &str, try_delayed: bool) -> Result<()> {
        let canon = canonical_name(name)?;
        let result = self.reload_internal(&canon, try_delayed).await;
        self.drain_deferred().await;
        result
    }

    /// 列出所有记录：名字、描述、引用计数、状态
    pub async fn list(&self) -> Vec<ModuleListEntry> {
        self.registry.list().await
    }

    /// 增加模块引用计数（外部消费者持引用）
    pub async fn ref_module(&self, name: &str) -> Result<Arc<ModuleRecord>> {
        let canon = canonical_name(name)?;
        self.registry.ref_module(&canon).await
    }

    /// 减少模块引用计数
    ///
    /// 最后一个引用离开且延迟重载位置位时，名字进入延迟重载
    /// 队列，由下一次顶层操作的排空步骤执行。
    pub async fn unref_module(self: &Arc<Self>, name: &str) -> Result<()> {
        let canon = canonical_name(name)?;
        self.registry.unref_module(&canon).await?;
        self.drain_deferred().await;
        Ok(())
    }

    // ==================== 加载 ====================

    /// 加载一个规范名，`chain` 是发起本次加载的 require 调用链
    pub(crate) async fn load_chain(self: &Arc<Self>, canon: &str, chain: &[String]) -> Result<()> {
        match self.registry.state_of(canon).await {
            Some(ModuleState::Loaded) => {
                return Err(CoreError::ModuleAlreadyLoaded(canon.to_string()));
            }
            Some(ModuleState::Unloading) => {
                // 与并发卸载串行化，后到者被拒
                return Err(CoreError::StateConflict {
                    module: canon.to_string(),
                    state: ModuleState::Unloading.to_string(),
                    operation: "load".to_string(),
                });
            }
            Some(ModuleState::Opening) => {
                // 另一次加载正在途中：在它的变迁锁上汇合
                return self.join_inflight_load(canon).await;
            }
            Some(ModuleState::Registered) => {
                // 静态注册的模块从这里加载；也可能与动态加载赛跑
                return self.load_registered(canon, chain).await;
            }
            _ => {}
        }

        self.load_dynamic(canon, chain).await
    }

    /// 汇合一次在途的加载：等它的变迁结束后按结果返回
    async fn join_inflight_load(self: &Arc<Self>, canon: &str) -> Result<()> {
        let record = match self.registry.lookup(canon).await {
            Some(record) => record,
            None => return Err(CoreError::ModuleNotFound(canon.to_string())),
        };

        // 只等待，不持有：锁释放后按最终状态判定
        drop(record.transition.lock().await);

        match self.registry.state_of(canon).await {
            Some(ModuleState::Loaded) => Ok(()),
            Some(state) => Err(CoreError::StateConflict {
                module: canon.to_string(),
                state: state.to_string(),
                operation: "load".to_string(),
            }),
            None => Err(CoreError::ModuleLoadFailed {
                module: canon.to_string(),
                cause: "并发加载失败".to_string(),
            }),
        }
    }

    /// 加载一条已注册（静态）的记录
    async fn load_registered(self: &Arc<Self>, canon: &str, chain: &[String]) -> Result<()> {
        let record = match self.registry.lookup(canon).await {
            Some(record) => record,
            None => return Err(CoreError::ModuleNotFound(canon.to_string())),
        };

        let guard = record.transition.lock().await;

        // 拿到锁后复查：可能刚被并发加载推进
        match self.registry.state_of(canon).await {
            Some(ModuleState::Registered) => {}
            Some(ModuleState::Loaded) => return Ok(()),
            Some(state) => {
                return Err(CoreError::StateConflict {
                    module: canon.to_string(),
                    state: state.to_string(),
                    operation: "load".to_string(),
                });
            }
            None => return Err(CoreError::ModuleNotFound(canon.to_string())),
        }

        let result = self.run_load_entry(&record, canon, chain).await;
        drop(guard);
        result
    }

    /// 打开共享对象并走完注册 + 加载
    async fn load_dynamic(self: &Arc<Self>, canon: &str, chain: &[String]) -> Result<()> {
        let record = self.registry.begin_open(canon).await?;
        let guard = record.transition.lock().await;

        // dlopen 在阻塞线程上执行；注册表锁不跨越这一步
        let backend = self.backend.clone();
        let canon_owned = canon.to_string();
        let opened = tokio::task::spawn_blocking(move || backend.open(&canon_owned))
            .await
            .map_err(|e| CoreError::Internal(format!("后端任务失败: {}", e)));

        let (backing, descriptor) = match opened {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) | Err(e) => {
                // 打开失败：清掉 opening 记录
                self.registry.remove(canon).await;
                return Err(e);
            }
        };

        // 注册先于 load 入口点
        if let Err(e) = self.registry.register(descriptor).await {
            self.registry.remove(canon).await;
            // 描述符已在注册表内部丢弃，后备可以安全关闭
            self.backend.close(canon, backing);
            return Err(e);
        }
        record.set_backing(backing);

        let result = self.run_load_entry(&record, canon, chain).await;
        drop(guard);
        result
    }

    /// 调用 load 入口点并收尾（调用方持有变迁锁）
    async fn run_load_entry(
        self: &Arc<Self>,
        record: &Arc<ModuleRecord>,
        canon: &str,
        chain: &[String],
    ) -> Result<()> {
        let entry = record
            .entry()
            .ok_or_else(|| CoreError::Internal(format!("模块 '{}' 没有入口点", canon)))?;
        let token = record
            .self_token()
            .ok_or_else(|| CoreError::Internal(format!("模块 '{}' 没有自持令牌", canon)))?;

        let mut ctx_chain = chain.to_vec();
        ctx_chain.push(canon.to_string());
        let ctx = ModuleContext {
            coordinator: Arc::clone(self),
            self_token: token,
            chain: ctx_chain,
        };

        match entry.load(&ctx).await {
            Ok(()) => {
                drop(ctx);
                drop(entry);
                self.registry.set_state(canon, ModuleState::Loaded).await?;
                info!(module = canon, "模块加载完成");
                Ok(())
            }
            Err(e) => {
                warn!(module = canon, error = %e, "load 入口点失败");
                drop(ctx);
                self.fail_record(record, canon, entry).await;
                Err(CoreError::ModuleLoadFailed {
                    module: canon.to_string(),
                    cause: e.to_string(),
                })
            }
        }
    }

    /// 失败收尾：回收 require、标记 failed、关闭后备、清除记录
    ///
    /// failed 记录的引用计数必为零（状态从未到过 loaded 或门控
    /// 已确认归零），失败上报后立即清除。
    async fn fail_record(
        self: &Arc<Self>,
        record: &Arc<ModuleRecord>,
        canon: &str,
        entry: Arc<dyn ModuleEntry>,
    ) {
        self.release_requires(canon).await;

        let _ = self.registry.set_state(canon, ModuleState::Failed).await;
        let backing = record.take_backing();
        self.registry.remove(canon).await;
        self.tracker.remove_module(canon).await;

        // 入口点代码位于共享对象内：先丢句柄，再关对象
        drop(entry);
        self.backend.close(canon, backing);
    }

    /// 回收某模块持有的全部 require（逆序）并逐个递减引用计数
    async fn release_requires(self: &Arc<Self>, canon: &str) {
        let released = self.tracker.release_all(canon).await;
        for dep in released {
            if let Err(e) = self.registry.unref_module(&dep).await {
                warn!(module = canon, dependency = %dep, error = %e, "回收依赖引用失败");
            }
        }
    }

    // ==================== 卸载 ====================

    async fn unload_internal(self: &Arc<Self>, canon: &str) -> Result<()> {
        let record = match self.registry.lookup(canon).await {
            Some(record) => record,
            None => return Err(CoreError::ModuleNotFound(canon.to_string())),
        };

        let guard = record.transition.lock().await;

        // 依赖者名单先取出来，拒绝时放进提示里
        let dependents = self.tracker.dependents_of(canon).await;
        if let Err(e) = self.registry.begin_unload(canon).await {
            if matches!(e, CoreError::UnloadRefused { .. }) && !dependents.is_empty() {
                return Err(CoreError::UnloadRefused {
                    module: canon.to_string(),
                    reason: format!("被 {} 依赖", dependents.join(", ")),
                });
            }
            return Err(e);
        }

        let (entry, token) = match (record.entry(), record.self_token()) {
            (Some(entry), Some(token)) => (entry, token),
            _ => {
                // 记录不完整是不变量被破坏，不能停在 unloading
                let _ = self.registry.set_state(canon, ModuleState::Failed).await;
                return Err(CoreError::Internal(format!("模块 '{}' 记录不完整", canon)));
            }
        };
        let ctx = ModuleContext {
            coordinator: Arc::clone(self),
            self_token: token,
            chain: Vec::new(),
        };

        let result = entry.unload(&ctx).await;
        drop(ctx);

        // 模块没有亲手 unrequire 的边由协调器兜底释放
        self.release_requires(canon).await;

        match result {
            Ok(()) => {
                // unload 入口点先于共享对象析构
                let backing = record.take_backing();
                if backing.is_shared() {
                    // 动态记录：unloaded 即销毁（无引用、无依赖者）
                    let _ = self.registry.set_state(canon, ModuleState::Unloaded).await;
                    self.registry.remove(canon).await;
                    self.tracker.remove_module(canon).await;
                    drop(entry);
                    self.backend.close(canon, backing);
                } else {
                    // 静态记录：进程内注册关系仍然有效，回到 registered，
                    // 之后可以再次 load / reload
                    let _ = self
                        .registry
                        .set_state(canon, ModuleState::Registered)
                        .await;
                    self.tracker.remove_module(canon).await;
                }
                drop(guard);
                info!(module = canon, "模块卸载完成");
                Ok(())
            }
            Err(e) => {
                warn!(module = canon, error = %e, "unload 入口点失败");
                self.fail_record(&record, canon, entry).await;
                drop(guard);
                Err(CoreError::ModuleUnloadFailed {
                    module: canon.to_string(),
                    cause: e.to_string(),
                })
            }
        }
    }

    // ==================== 重载 ====================

    async fn reload_internal(self: &Arc<Self>, canon: &str, try_delayed: bool) -> Result<()> {
        self.registry.reload_gate(canon, try_delayed).await?;

        // 完整的卸载-再加载循环；重新加载沿用同一个规范名
        self.unload_internal(canon).await?;
        self.load_chain(canon, &[]).await
    }

    /// 排空延迟重载队列
    ///
    /// 在每个顶层操作之间以及停机入口处调用。重试时引用计数又
    /// 升上去的条目重新置位等待下一次归零；卸载/加载循环中真正
    /// 失败的条目此时已进入 failed 并被清除。
    pub async fn drain_deferred(self: &Arc<Self>) {
        while let Some(name) = self.registry.pop_deferred_reload().await {
            self.registry.clear_deferred_reload(&name).await;
            debug!(module = %name, "执行延迟重载");

            match self.reload_internal(&name, false).await {
                Ok(()) => info!(module = %name, "延迟重载完成"),
                Err(CoreError::ReloadRefused(_)) | Err(CoreError::UnloadRefused { .. }) => {
                    // 又有了新的引用：位重新置上，等下一次归零
                    let _ = self.registry.set_deferred_reload(&name).await;
                }
                Err(e) => {
                    warn!(module = %name, error = %e, "延迟重载失败");
                }
            }
        }
    }

    // ==================== require / unrequire ====================

    /// 模块在自身 load 内声明依赖
    pub(crate) async fn require_for(
        self: &Arc<Self>,
        dependent: &SelfToken,
        chain: &[String],
        name: &str,
    ) -> Result<ModuleRef> {
        let canon = canonical_name(name)?;
        let dependent_name = dependent.name();

        if canon == dependent_name {
            return Err(CoreError::WouldCycle(format!(
                "{} -> {}",
                dependent_name, canon
            )));
        }
        // 同一调用链内的重入视为环
        if chain.iter().any(|link| link == &canon) {
            return Err(CoreError::WouldCycle(format!(
                "{} -> {} ({})",
                dependent_name,
                canon,
                chain.join(" -> ")
            )));
        }

        match self.registry.state_of(&canon).await {
            Some(ModuleState::Loaded) => {}
            Some(ModuleState::Opening) => {
                // 打开中的模块无法区分是否会反向依赖本模块，按环拒绝
                return Err(CoreError::WouldCycle(format!(
                    "{} -> {} (对方正在加载)",
                    dependent_name, canon
                )));
            }
            _ => match self.load_chain(&canon, chain).await {
                Ok(()) | Err(CoreError::ModuleAlreadyLoaded(_)) => {}
                Err(e @ CoreError::WouldCycle(_)) => return Err(e),
                Err(e @ CoreError::BackingNotFound(_)) => return Err(e),
                Err(e @ CoreError::ModuleNotFound(_)) => return Err(e),
                Err(e) => {
                    return Err(CoreError::ModuleLoadFailed {
                        module: canon.clone(),
                        cause: e.to_string(),
                    });
                }
            },
        }

        // 先计数后记边，保证 refcount >= required-by 边数
        self.registry.ref_module(&canon).await?;
        match self.tracker.record_require(dependent_name, &canon).await {
            Ok(reference) => {
                debug!(dependent = dependent_name, dependency = %canon, "依赖已钉住");
                Ok(reference)
            }
            Err(e) => {
                let _ = self.registry.unref_module(&canon).await;
                Err(e)
            }
        }
    }

    /// 模块在自身 unload 内解除依赖
    pub(crate) async fn unrequire_for(
        self: &Arc<Self>,
        dependent: &SelfToken,
        reference: ModuleRef,
    ) -> Result<()> {
        if reference.dependent() != dependent.name() {
            return Err(CoreError::Internal(format!(
                "模块 '{}' 试图释放 '{}' 的依赖引用",
                dependent.name(),
                reference.dependent()
            )));
        }

        let dependency = reference.dependency().to_string();
        self.tracker.release(&reference).await?;
        self.registry.unref_module(&dependency).await?;
        debug!(dependent = dependent.name(), dependency = %dependency, "依赖已解除");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::descriptor::{ModuleDescriptor, ModuleEntry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// 可配置行为的测试模块入口点
    #[derive(Default)]
    struct TestEntry {
        fail_load: bool,
        fail_unload: bool,
        requires: Vec<String>,
        load_calls: AtomicUsize,
        unload_calls: AtomicUsize,
        held: Mutex<Vec<ModuleRef>>,
    }

    impl TestEntry {
        fn new() -> Self {
            Self::default()
        }

        fn failing_load() -> Self {
            Self {
                fail_load: true,
                ..Self::default()
            }
        }

        fn failing_unload() -> Self {
            Self {
                fail_unload: true,
                ..Self::default()
            }
        }

        fn with_requires(requires: &[&str]) -> Self {
            Self {
                requires: requires.iter().map(|s| s.to_string()).collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ModuleEntry for TestEntry {
        async fn load(&self, ctx: &ModuleContext) -> Result<()> {
            self.load_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_load {
                return Err(CoreError::Internal("load 故障注入".to_string()));
            }
            for dep in &self.requires {
                let reference = ctx.require(dep).await?;
                self.held.lock().unwrap().push(reference);
            }
            Ok(())
        }

        async fn unload(&self, ctx: &ModuleContext) -> Result<()> {
            self.unload_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_unload {
                return Err(CoreError::Internal("unload 故障注入".to_string()));
            }
            let mut held = self.held.lock().unwrap().drain(..).collect::<Vec<_>>();
            held.reverse();
            for reference in held {
                ctx.unrequire(reference).await?;
            }
            Ok(())
        }
    }

    fn coordinator() -> Arc<LifecycleCoordinator> {
        Arc::new(LifecycleCoordinator::new(
            ModuleRegistry::new(),
            DependencyTracker::new(),
            DynamicLoader::new("/nonexistent/modules"),
        ))
    }

    async fn register(coord: &Arc<LifecycleCoordinator>, name: &str, entry: TestEntry) {
        coord
            .registry()
            .register_static(ModuleDescriptor::new(
                name,
                format!("Test {}", name),
                Arc::new(entry),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_load_static_module() {
        let coord = coordinator();
        register(&coord, "mod_a", TestEntry::new()).await;

        coord.load("mod_a").await.unwrap();
        assert_eq!(
            coord.registry().state_of("mod_a").await,
            Some(ModuleState::Loaded)
        );
    }

    #[tokio::test]
    async fn test_load_twice_already_loaded() {
        let coord = coordinator();
        register(&coord, "mod_a", TestEntry::new()).await;

        coord.load("mod_a").await.unwrap();
        let result = coord.load("mod_a").await;
        assert!(matches!(result, Err(CoreError::ModuleAlreadyLoaded(_))));
    }

    #[tokio::test]
    async fn test_load_unknown_module() {
        let coord = coordinator();
        let result = coord.load("mod_missing").await;
        // 动态路径：模块目录里没有共享对象
        assert!(matches!(result, Err(CoreError::BackingNotFound(_))));
    }

    #[tokio::test]
    async fn test_load_failure_purges_record() {
        let coord = coordinator();
        register(&coord, "mod_bad", TestEntry::failing_load()).await;

        let result = coord.load("mod_bad").await;
        assert!(matches!(result, Err(CoreError::ModuleLoadFailed { .. })));
        // failed 记录在上报后立即清除
        assert_eq!(coord.registry().state_of("mod_bad").await, None);
    }

    #[tokio::test]
    async fn test_unload_roundtrip() {
        let coord = coordinator();
        register(&coord, "mod_a", TestEntry::new()).await;

        coord.load("mod_a").await.unwrap();
        coord.unload("mod_a").await.unwrap();

        // 静态模块的注册关系保留，记录回到 registered
        assert_eq!(
            coord.registry().state_of("mod_a").await,
            Some(ModuleState::Registered)
        );
        assert_eq!(coord.registry().count().await, 1);
    }

    #[tokio::test]
    async fn test_unload_not_loaded() {
        let coord = coordinator();
        let result = coord.unload("mod_a").await;
        assert!(matches!(result, Err(CoreError::ModuleNotFound(_))));
    }

    #[tokio::test]
    async fn test_unload_refused_with_refcount() {
        let coord = coordinator();
        register(&coord, "mod_a", TestEntry::new()).await;
        coord.load("mod_a").await.unwrap();

        coord.ref_module("mod_a").await.unwrap();
        let result = coord.unload("mod_a").await;
        assert!(matches!(result, Err(CoreError::UnloadRefused { .. })));

        // 引用释放后卸载成功
        coord.unref_module("mod_a").await.unwrap();
        coord.unload("mod_a").await.unwrap();
    }

    #[tokio::test]
    async fn test_unload_failure_moves_to_failed_and_purges() {
        let coord = coordinator();
        register(&coord, "mod_a", TestEntry::failing_unload()).await;
        coord.load("mod_a").await.unwrap();

        let result = coord.unload("mod_a").await;
        assert!(matches!(result, Err(CoreError::ModuleUnloadFailed { .. })));
        assert_eq!(coord.registry().state_of("mod_a").await, None);
    }

    #[tokio::test]
    async fn test_require_loads_dependency() {
        let coord = coordinator();
        register(&coord, "mod_a", TestEntry::new()).await;
        register(&coord, "mod_b", TestEntry::with_requires(&["mod_a"])).await;

        coord.load("mod_b").await.unwrap();

        // 依赖被隐式加载并被钉住
        assert_eq!(
            coord.registry().state_of("mod_a").await,
            Some(ModuleState::Loaded)
        );
        let a = coord.registry().lookup("mod_a").await.unwrap();
        assert_eq!(a.refcount(), 1);
        let b = coord.registry().lookup("mod_b").await.unwrap();
        assert_eq!(b.refcount(), 0);
    }

    #[tokio::test]
    async fn test_unload_dependency_refused_then_allowed() {
        let coord = coordinator();
        register(&coord, "mod_a", TestEntry::new()).await;
        register(&coord, "mod_b", TestEntry::with_requires(&["mod_a"])).await;
        coord.load("mod_b").await.unwrap();

        // 被依赖者拒绝卸载，提示依赖者名字
        let result = coord.unload("mod_a").await;
        match result {
            Err(CoreError::UnloadRefused { reason, .. }) => {
                assert!(reason.contains("mod_b"));
            }
            other => panic!("意外结果: {:?}", other),
        }

        // 依赖者先卸，引用随之归零
        coord.unload("mod_b").await.unwrap();
        let a = coord.registry().lookup("mod_a").await.unwrap();
        assert_eq!(a.refcount(), 0);
        coord.unload("mod_a").await.unwrap();
    }

    #[tokio::test]
    async fn test_require_cycle_refused() {
        let coord = coordinator();
        register(&coord, "mod_a", TestEntry::with_requires(&["mod_b"])).await;
        register(&coord, "mod_b", TestEntry::with_requires(&["mod_a"])).await;

        let result = coord.load("mod_a").await;
        match result {
            Err(CoreError::ModuleLoadFailed { cause, .. }) => {
                assert!(cause.contains("循环依赖"), "cause: {}", cause);
            }
            other => panic!("意外结果: {:?}", other),
        }

        // 两条记录都没有留下加载痕迹
        assert_ne!(
            coord.registry().state_of("mod_a").await,
            Some(ModuleState::Loaded)
        );
        assert_ne!(
            coord.registry().state_of("mod_b").await,
            Some(ModuleState::Loaded)
        );
    }

    #[tokio::test]
    async fn test_reload_quiescent() {
        let coord = coordinator();
        let entry = Arc::new(TestEntry::new());
        coord
            .registry()
            .register_static(ModuleDescriptor::new(
                "mod_a",
                "Test mod_a",
                Arc::clone(&entry) as Arc<dyn ModuleEntry>,
            ))
            .await
            .unwrap();
        coord.load("mod_a").await.unwrap();

        // 引用计数为零的重载 = 完整的卸载-再加载循环
        coord.reload("mod_a", false).await.unwrap();
        assert_eq!(
            coord.registry().state_of("mod_a").await,
            Some(ModuleState::Loaded)
        );
        assert_eq!(entry.load_calls.load(Ordering::SeqCst), 2);
        assert_eq!(entry.unload_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reload_busy_refused_and_queued() {
        let coord = coordinator();
        register(&coord, "mod_a", TestEntry::new()).await;
        coord.load("mod_a").await.unwrap();
        coord.ref_module("mod_a").await.unwrap();

        // 不排队：直接拒绝
        let result = coord.reload("mod_a", false).await;
        assert!(matches!(result, Err(CoreError::ReloadRefused(_))));

        // 排队：返回已排队，位被置上
        let result = coord.reload("mod_a", true).await;
        assert!(matches!(result, Err(CoreError::ReloadQueued(_))));
        let record = coord.registry().lookup("mod_a").await.unwrap();
        assert!(record.deferred_reload());

        // 重复请求合并，不报错
        let result = coord.reload("mod_a", true).await;
        assert!(matches!(result, Err(CoreError::ReloadQueued(_))));
    }

    #[tokio::test]
    async fn test_deferred_reload_fires_on_unref() {
        let coord = coordinator();
        register(&coord, "mod_a", TestEntry::new()).await;
        coord.load("mod_a").await.unwrap();
        coord.ref_module("mod_a").await.unwrap();

        assert!(matches!(
            coord.reload("mod_a", true).await,
            Err(CoreError::ReloadQueued(_))
        ));

        // 归零触发排空：重载执行完毕，模块回到 loaded
        coord.unref_module("mod_a").await.unwrap();
        assert_eq!(
            coord.registry().state_of("mod_a").await,
            Some(ModuleState::Loaded)
        );
        let record = coord.registry().lookup("mod_a").await.unwrap();
        assert!(!record.deferred_reload());
        assert_eq!(record.refcount(), 0);
    }

    #[tokio::test]
    async fn test_load_unload_idempotence_on_registry() {
        let coord = coordinator();
        register(&coord, "mod_a", TestEntry::new()).await;
        let before = coord.registry().count().await;

        coord.load("mod_a").await.unwrap();
        coord.unload("mod_a").await.unwrap();

        // load; unload 之后注册表回到先前的记录集合
        assert_eq!(coord.registry().count().await, before);
        assert_eq!(
            coord.registry().state_of("mod_a").await,
            Some(ModuleState::Registered)
        );
    }

    #[tokio::test]
    async fn test_entry_invocation_counts() {
        let coord = coordinator();
        let entry = Arc::new(TestEntry::new());
        coord
            .registry()
            .register_static(ModuleDescriptor::new(
                "mod_a",
                "Test mod_a",
                Arc::clone(&entry) as Arc<dyn ModuleEntry>,
            ))
            .await
            .unwrap();

        coord.load("mod_a").await.unwrap();
        coord.unload("mod_a").await.unwrap();

        assert_eq!(entry.load_calls.load(Ordering::SeqCst), 1);
        assert_eq!(entry.unload_calls.load(Ordering::SeqCst), 1);
    }
}
