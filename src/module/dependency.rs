//! 模块依赖追踪
//!
//! 维护 "模块 A 钉住模块 B" 的有向无环图。边由模块在自身
//! `load` / `unload` 入口点内通过 require / unrequire 显式建立
//! 和拆除；正向边记录获取次序（释放按相反次序），反向边用于
//! 诊断以及在存在依赖者时拒绝卸载。
//!
//! 环检测：加边 A -> B 之前先测 B 到 A 的可达性，可达则拒绝。
//! 图在任何可观察时刻都无环。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::utils::{CoreError, Result};

/// require 返回的依赖引用
///
/// 持有者必须在自身 `unload` 里用它调用 unrequire。引用不拥有
/// 记录，只标识一条被钉住的依赖边。
#[derive(Debug)]
pub struct ModuleRef {
    dependent: String,
    dependency: String,
    hold_id: u64,
}

impl ModuleRef {
    /// 依赖方（发起 require 的模块）
    pub fn dependent(&self) -> &str {
        &self.dependent
    }

    /// 被依赖方
    pub fn dependency(&self) -> &str {
        &self.dependency
    }
}

/// 一条被持有的 require
#[derive(Debug)]
struct HoldEntry {
    id: u64,
    dependency: String,
}

/// 追踪器锁保护的图数据
#[derive(Default)]
struct TrackerInner {
    /// 正向边：依赖方 -> 被依赖方集合
    edges: HashMap<String, Vec<String>>,
    /// 反向边：被依赖方 -> 依赖方集合
    reverse_edges: HashMap<String, Vec<String>>,
    /// 依赖方 -> 持有的 require（保持获取次序）
    holds: HashMap<String, Vec<HoldEntry>>,
    /// 下一个 hold 编号
    next_hold_id: u64,
}

impl TrackerInner {
    /// 测试 from 能否沿正向边到达 to
    fn reachable(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }
        let mut visited = HashSet::new();
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if !visited.insert(node.to_string()) {
                continue;
            }
            if let Some(deps) = self.edges.get(node) {
                for dep in deps {
                    if dep == to {
                        return true;
                    }
                    stack.push(dep);
                }
            }
        }
        false
    }

    fn add_edge(&mut self, dependent: &str, dependency: &str) {
        let deps = self.edges.entry(dependent.to_string()).or_default();
        if !deps.contains(&dependency.to_string()) {
            deps.push(dependency.to_string());
        }
        let rev = self.reverse_edges.entry(dependency.to_string()).or_default();
        if !rev.contains(&dependent.to_string()) {
            rev.push(dependent.to_string());
        }
    }

    fn remove_edge(&mut self, dependent: &str, dependency: &str) {
        if let Some(deps) = self.edges.get_mut(dependent) {
            deps.retain(|d| d != dependency);
        }
        if let Some(rev) = self.reverse_edges.get_mut(dependency) {
            rev.retain(|d| d != dependent);
        }
    }

    /// 依赖方是否还持有指向该被依赖方的其他 hold
    fn still_held(&self, dependent: &str, dependency: &str) -> bool {
        self.holds
            .get(dependent)
            .map(|holds| holds.iter().any(|h| h.dependency == dependency))
            .unwrap_or(false)
    }
}

/// 依赖追踪器
///
/// 追踪器自身的锁在注册表锁之后、两端记录的变迁锁之前获取。
pub struct DependencyTracker {
    inner: Arc<RwLock<TrackerInner>>,
}

impl DependencyTracker {
    /// 创建空追踪器
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(TrackerInner::default())),
        }
    }

    /// 记录一条 require 边
    ///
    /// 会闭合环（含自环与同一调用链内的重入）时拒绝。
    /// 同一对模块允许重复 require，每次各记一条 hold，
    /// 引用计数由调用方逐次维护。
    pub async fn record_require(&self, dependent: &str, dependency: &str) -> Result<ModuleRef> {
        let mut inner = self.inner.write().await;

        // 先测反向可达性：dependency 已能到达 dependent 则加边成环
        if inner.reachable(dependency, dependent) {
            return Err(CoreError::WouldCycle(format!(
                "{} -> {}",
                dependent, dependency
            )));
        }

        inner.add_edge(dependent, dependency);
        inner.next_hold_id += 1;
        let id = inner.next_hold_id;
        inner
            .holds
            .entry(dependent.to_string())
            .or_default()
            .push(HoldEntry {
                id,
                dependency: dependency.to_string(),
            });

        trace!(dependent, dependency, "记录 require 边");
        Ok(ModuleRef {
            dependent: dependent.to_string(),
            dependency: dependency.to_string(),
            hold_id: id,
        })
    }

    /// 释放一条 require 边
    ///
    /// 该依赖方对同一被依赖方的最后一条 hold 释放后，图上的边
    /// 一并移除。
    pub async fn release(&self, reference: &ModuleRef) -> Result<()> {
        let mut inner = self.inner.write().await;

        let holds = inner
            .holds
            .get_mut(&reference.dependent)
            .ok_or_else(|| CoreError::Internal(format!(
                "模块 '{}' 没有持有任何依赖",
                reference.dependent
            )))?;

        let before = holds.len();
        holds.retain(|h| h.id != reference.hold_id);
        if holds.len() == before {
            return Err(CoreError::Internal(format!(
                "模块 '{}' 未持有对 '{}' 的该引用",
                reference.dependent, reference.dependency
            )));
        }
        if holds.is_empty() {
            inner.holds.remove(&reference.dependent);
        }

        if !inner.still_held(&reference.dependent, &reference.dependency) {
            inner.remove_edge(&reference.dependent, &reference.dependency);
        }

        trace!(
            dependent = %reference.dependent,
            dependency = %reference.dependency,
            "释放 require 边"
        );
        Ok(())
    }

    /// 释放依赖方持有的全部 require
    ///
    /// 按获取次序的相反方向释放；返回释放次序下的被依赖方名字，
    /// 由调用方逐个递减引用计数。模块 unload 返回后协调器用它
    /// 兜底清理模块没有亲手 unrequire 的残留边。
    pub async fn release_all(&self, dependent: &str) -> Vec<String> {
        let mut inner = self.inner.write().await;

        let mut holds = match inner.holds.remove(dependent) {
            Some(holds) => holds,
            None => return Vec::new(),
        };
        holds.reverse();

        let mut released = Vec::with_capacity(holds.len());
        for hold in holds {
            if !inner.still_held(dependent, &hold.dependency) {
                inner.remove_edge(dependent, &hold.dependency);
            }
            released.push(hold.dependency);
        }

        if !released.is_empty() {
            debug!(dependent, count = released.len(), "释放全部 require 边");
        }
        released
    }

    /// 依赖该模块的模块列表（反向边）
    pub async fn dependents_of(&self, name: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        inner.reverse_edges.get(name).cloned().unwrap_or_default()
    }

    /// 该模块钉住的模块列表（正向边）
    pub async fn dependencies_of(&self, name: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        inner.edges.get(name).cloned().unwrap_or_default()
    }

    /// 测试加边 dependent -> dependency 是否会成环
    pub async fn would_cycle(&self, dependent: &str, dependency: &str) -> bool {
        let inner = self.inner.read().await;
        inner.reachable(dependency, dependent)
    }

    /// 从图中清除一个模块及其所有边
    ///
    /// 记录被清除（failed 清理）时调用。
    pub async fn remove_module(&self, name: &str) {
        let mut inner = self.inner.write().await;

        if let Some(deps) = inner.edges.remove(name) {
            for dep in deps {
                if let Some(rev) = inner.reverse_edges.get_mut(&dep) {
                    rev.retain(|d| d != name);
                }
            }
        }
        if let Some(dependents) = inner.reverse_edges.remove(name) {
            for dependent in dependents {
                if let Some(deps) = inner.edges.get_mut(&dependent) {
                    deps.retain(|d| d != name);
                }
            }
        }
        inner.holds.remove(name);
    }
}

impl Default for DependencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for DependencyTracker {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_release() {
        let tracker = DependencyTracker::new();

        let r = tracker.record_require("mod_b", "mod_a").await.unwrap();
        assert_eq!(tracker.dependents_of("mod_a").await, vec!["mod_b"]);
        assert_eq!(tracker.dependencies_of("mod_b").await, vec!["mod_a"]);

        tracker.release(&r).await.unwrap();
        assert!(tracker.dependents_of("mod_a").await.is_empty());
        assert!(tracker.dependencies_of("mod_b").await.is_empty());
    }

    #[tokio::test]
    async fn test_release_unknown_hold() {
        let tracker = DependencyTracker::new();
        let r = tracker.record_require("mod_b", "mod_a").await.unwrap();
        tracker.release(&r).await.unwrap();

        // 重复释放同一引用
        let result = tracker.release(&r).await;
        assert!(matches!(result, Err(CoreError::Internal(_))));
    }

    #[tokio::test]
    async fn test_cycle_refused() {
        let tracker = DependencyTracker::new();
        tracker.record_require("mod_b", "mod_a").await.unwrap();

        // a -> b 会闭合 b -> a
        let result = tracker.record_require("mod_a", "mod_b").await;
        assert!(matches!(result, Err(CoreError::WouldCycle(_))));
    }

    #[tokio::test]
    async fn test_transitive_cycle_refused() {
        let tracker = DependencyTracker::new();
        tracker.record_require("mod_c", "mod_b").await.unwrap();
        tracker.record_require("mod_b", "mod_a").await.unwrap();

        // a -> c 会闭合 c -> b -> a
        let result = tracker.record_require("mod_a", "mod_c").await;
        assert!(matches!(result, Err(CoreError::WouldCycle(_))));
    }

    #[tokio::test]
    async fn test_self_cycle_refused() {
        let tracker = DependencyTracker::new();
        let result = tracker.record_require("mod_a", "mod_a").await;
        assert!(matches!(result, Err(CoreError::WouldCycle(_))));
    }

    #[tokio::test]
    async fn test_duplicate_require_held_separately() {
        let tracker = DependencyTracker::new();

        let r1 = tracker.record_require("mod_b", "mod_a").await.unwrap();
        let r2 = tracker.record_require("mod_b", "mod_a").await.unwrap();

        // 释放一条后边仍在
        tracker.release(&r1).await.unwrap();
        assert_eq!(tracker.dependents_of("mod_a").await, vec!["mod_b"]);

        // 最后一条释放后边消失
        tracker.release(&r2).await.unwrap();
        assert!(tracker.dependents_of("mod_a").await.is_empty());
    }

    #[tokio::test]
    async fn test_release_all_reverse_order() {
        let tracker = DependencyTracker::new();
        tracker.record_require("mod_app", "mod_a").await.unwrap();
        tracker.record_require("mod_app", "mod_b").await.unwrap();
        tracker.record_require("mod_app", "mod_c").await.unwrap();

        let released = tracker.release_all("mod_app").await;
        // 按获取次序的相反方向
        assert_eq!(released, vec!["mod_c", "mod_b", "mod_a"]);
        assert!(tracker.dependencies_of("mod_app").await.is_empty());
        assert!(tracker.dependents_of("mod_a").await.is_empty());
    }

    #[tokio::test]
    async fn test_release_all_empty() {
        let tracker = DependencyTracker::new();
        assert!(tracker.release_all("mod_x").await.is_empty());
    }

    #[tokio::test]
    async fn test_would_cycle_probe() {
        let tracker = DependencyTracker::new();
        tracker.record_require("mod_b", "mod_a").await.unwrap();

        assert!(tracker.would_cycle("mod_a", "mod_b").await);
        assert!(!tracker.would_cycle("mod_c", "mod_a").await);
    }

    #[tokio::test]
    async fn test_remove_module() {
        let tracker = DependencyTracker::new();
        tracker.record_require("mod_b", "mod_a").await.unwrap();
        tracker.record_require("mod_c", "mod_a").await.unwrap();

        tracker.remove_module("mod_a").await;
        assert!(tracker.dependencies_of("mod_b").await.is_empty());
        assert!(tracker.dependencies_of("mod_c").await.is_empty());
        assert!(tracker.dependents_of("mod_a").await.is_empty());
    }
}
