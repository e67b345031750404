//! 自动加载编排
//!
//! 启动时按配置列表加载模块（单项失败记录在案、继续后续），
//! 停机时按依赖图的逆拓扑序卸载全部存活模块。

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use super::descriptor::ModuleState;
use super::lifecycle::LifecycleCoordinator;
use super::registry::canonical_name;
use crate::utils::Result;

/// 一次自动加载的结果
///
/// "全部加载" 或 "部分加载 + 失败清单"。
#[derive(Debug, Default)]
pub struct AutoloadReport {
    /// 成功加载的模块（按完成次序）
    pub loaded: Vec<String>,
    /// 失败的模块及原因
    pub failures: Vec<(String, String)>,
}

impl AutoloadReport {
    /// 是否全部加载成功
    pub fn fully_loaded(&self) -> bool {
        self.failures.is_empty()
    }

    /// 人类可读的结果摘要（控制台输出用）
    pub fn summary(&self) -> String {
        if self.fully_loaded() {
            format!("全部加载: {} 个模块", self.loaded.len())
        } else {
            let failed: Vec<String> = self
                .failures
                .iter()
                .map(|(name, cause)| format!("{} ({})", name, cause))
                .collect();
            format!(
                "部分加载: {} 个成功, {} 个失败 [{}]",
                self.loaded.len(),
                self.failures.len(),
                failed.join("; ")
            )
        }
    }
}

/// 自动加载编排器
pub struct AutoloadOrchestrator {
    coordinator: Arc<LifecycleCoordinator>,
}

impl AutoloadOrchestrator {
    /// 创建编排器
    pub fn new(coordinator: Arc<LifecycleCoordinator>) -> Self {
        Self { coordinator }
    }

    /// 扫描模块目录，登记已发现但未加载的模块
    ///
    /// 只认平台共享对象扩展名的文件；目录不存在时静默跳过。
    /// 返回新登记的规范名列表。
    pub async fn scan(&self) -> Result<Vec<String>> {
        let dir = self.coordinator.backend().modules_dir().to_path_buf();
        if !dir.exists() {
            debug!(dir = %dir.display(), "模块目录不存在，跳过扫描");
            return Ok(Vec::new());
        }

        let mut discovered = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let matches_ext = path
                .extension()
                .map(|ext| ext == std::ffi::OsStr::new(std::env::consts::DLL_EXTENSION))
                .unwrap_or(false);
            if !matches_ext {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem,
                None => continue,
            };
            match canonical_name(stem) {
                Ok(canon) => {
                    if self.coordinator.registry().insert_discovered(&canon).await {
                        debug!(module = %canon, "发现模块");
                        discovered.push(canon);
                    }
                }
                Err(_) => {
                    warn!(path = %path.display(), "忽略名字非法的共享对象");
                }
            }
        }

        info!(count = discovered.len(), "模块目录扫描完成");
        Ok(discovered)
    }

    /// 按配置列表加载模块
    ///
    /// 单项失败不终止整个流程；未知条目记入失败清单而非致命。
    #[instrument(skip_all)]
    pub async fn load_all(&self, autoload: &[String]) -> AutoloadReport {
        let mut report = AutoloadReport::default();

        for name in autoload {
            match self.coordinator.load(name).await {
                Ok(()) => {
                    let canon = canonical_name(name).unwrap_or_else(|_| name.clone());
                    report.loaded.push(canon);
                }
                Err(e) => {
                    warn!(module = %name, error = %e, "自动加载失败");
                    report.failures.push((name.clone(), e.to_string()));
                }
            }
        }

        info!("{}", report.summary());
        report
    }

    /// 停机卸载：反复摘取没有依赖者的存活模块并卸载
    ///
    /// 平级时最近加载完成的先卸。图无环保证终止；一轮下来毫无
    /// 进展（外部引用未释放等）时，把剩余模块强制标记为 failed
    /// 留作诊断。
    #[instrument(skip_all)]
    pub async fn unload_all(&self) -> usize {
        // 停机入口先排空延迟重载
        self.coordinator.drain_deferred().await;

        let mut unloaded = 0usize;
        loop {
            let loaded = self
                .coordinator
                .registry()
                .find_by_state(ModuleState::Loaded)
                .await;
            if loaded.is_empty() {
                break;
            }

            // 就绪集：没有存活依赖者的模块
            let mut ready = Vec::new();
            for name in &loaded {
                if self.coordinator.tracker().dependents_of(name).await.is_empty() {
                    ready.push(name.clone());
                }
            }

            // 平级排序：最近加载完成者先卸
            let mut keyed = Vec::with_capacity(ready.len());
            for name in ready {
                let seq = match self.coordinator.registry().lookup(&name).await {
                    Some(record) => record.load_seq(),
                    None => 0,
                };
                keyed.push((seq, name));
            }
            keyed.sort_by(|a, b| b.0.cmp(&a.0));

            let mut progressed = false;
            for (_, name) in keyed {
                match self.coordinator.unload(&name).await {
                    Ok(()) => {
                        unloaded += 1;
                        progressed = true;
                    }
                    Err(e) => {
                        warn!(module = %name, error = %e, "停机卸载失败");
                    }
                }
            }

            if !progressed {
                // 不应发生：图无环时每一轮都该有叶子可卸
                let remaining = self
                    .coordinator
                    .registry()
                    .find_by_state(ModuleState::Loaded)
                    .await;
                for name in remaining {
                    error!(module = %name, "模块无法卸载，强制标记为 failed");
                    let _ = self
                        .coordinator
                        .registry()
                        .set_state(&name, ModuleState::Failed)
                        .await;
                }
                break;
            }
        }

        info!(count = unloaded, "停机卸载完成");
        unloaded
    }
}
