//! 模块注册表
//!
//! 进程级的模块记录集合，按规范名索引。注册表锁保护
//! 名字 -> 记录表、状态表和延迟重载队列；每条记录另有
//! 一把变迁锁，序列化该记录上的生命周期操作。
//!
//! 锁持有纪律：注册表锁只做短查找和状态位更新，绝不跨越
//! 模块入口点调用或共享对象的打开/关闭。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, error, trace};

use super::backend::ModuleBacking;
use super::descriptor::{ModuleDescriptor, ModuleEntry, ModuleFlags, ModuleState, SelfToken};
use crate::utils::{CoreError, Result};

/// 把用户输入的模块名规范化
///
/// 允许带或不带平台共享对象扩展名（如 `.so`）；去掉尾部扩展名
/// 并转为小写。合法字符为 `[a-z0-9_-]`。
///
/// # Errors
///
/// 名字为空或包含非法字符时返回 `CoreError::InvalidName`。
pub fn canonical_name(raw: &str) -> Result<String> {
    let mut name = raw.trim();
    if name.is_empty() {
        return Err(CoreError::InvalidName(raw.to_string()));
    }

    // 去掉平台扩展名（".so" 在所有平台都接受，便于配置跨平台书写）
    for ext in [std::env::consts::DLL_EXTENSION, "so"] {
        if ext.is_empty() {
            continue;
        }
        let suffix_len = ext.len() + 1;
        if name.len() > suffix_len {
            let (stem, tail) = name.split_at(name.len() - suffix_len);
            if tail.as_bytes()[0] == b'.' && tail[1..].eq_ignore_ascii_case(ext) {
                name = stem;
                break;
            }
        }
    }

    let canonical = name.to_ascii_lowercase();
    if !canonical
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(CoreError::InvalidName(raw.to_string()));
    }

    Ok(canonical)
}

// ============================================================================
// 模块记录
// ============================================================================

/// 记录上受 slots 锁保护的可变数据
struct RecordSlots {
    /// 描述符（注册后附着）
    descriptor: Option<ModuleDescriptor>,
    /// 共享对象后备
    backing: ModuleBacking,
    /// 注册时签发的自持令牌
    self_token: Option<SelfToken>,
    /// 描述（list 输出用，注册时拷贝出来）
    description: String,
    /// 加载标志
    flags: ModuleFlags,
    /// 最近一次加载完成时间
    loaded_at: Option<DateTime<Utc>>,
}

/// 模块记录
///
/// 每个已发现或已加载的模块对应一条记录。引用计数和延迟重载位
/// 只在持有注册表写锁时修改；`transition` 是变迁锁，保证同一
/// 记录上同一时刻至多一个生命周期变迁在途。
pub struct ModuleRecord {
    /// 规范名（稳定身份）
    name: String,

    /// 引用计数（显式 ref 与 require 边之和）
    refcount: AtomicUsize,

    /// 延迟重载位（电平触发，多次请求合并为一次）
    deferred_reload: AtomicBool,

    /// 加载完成序号（0 表示尚未加载；卸载平级时最近加载者先卸）
    load_seq: AtomicU64,

    /// 描述符、后备等槽位（短临界区，不跨 await）
    slots: std::sync::Mutex<RecordSlots>,

    /// 变迁锁
    pub(crate) transition: tokio::sync::Mutex<()>,
}

impl ModuleRecord {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            refcount: AtomicUsize::new(0),
            deferred_reload: AtomicBool::new(false),
            load_seq: AtomicU64::new(0),
            slots: std::sync::Mutex::new(RecordSlots {
                descriptor: None,
                backing: ModuleBacking::None,
                self_token: None,
                description: String::new(),
                flags: ModuleFlags::standard(),
                loaded_at: None,
            }),
            transition: tokio::sync::Mutex::new(()),
        })
    }

    /// 模块规范名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前引用计数
    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::SeqCst)
    }

    /// 延迟重载位是否置位
    pub fn deferred_reload(&self) -> bool {
        self.deferred_reload.load(Ordering::SeqCst)
    }

    /// 加载完成序号（0 表示尚未加载）
    pub fn load_seq(&self) -> u64 {
        self.load_seq.load(Ordering::SeqCst)
    }

    /// 模块描述
    pub fn description(&self) -> String {
        self.slots.lock().unwrap().description.clone()
    }

    /// 加载标志
    pub fn flags(&self) -> ModuleFlags {
        self.slots.lock().unwrap().flags
    }

    /// 最近一次加载完成时间
    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.slots.lock().unwrap().loaded_at
    }

    /// 自持令牌
    pub fn self_token(&self) -> Option<SelfToken> {
        self.slots.lock().unwrap().self_token.clone()
    }

    /// 入口点（描述符附着后可用）
    pub fn entry(&self) -> Option<Arc<dyn ModuleEntry>> {
        self.slots.lock().unwrap().descriptor.as_ref().map(|d| Arc::clone(&d.entry))
    }

    /// 附着共享对象后备（仅协调器调用，持变迁锁）
    pub(crate) fn set_backing(&self, backing: ModuleBacking) {
        self.slots.lock().unwrap().backing = backing;
    }

    /// 取走共享对象后备（关闭时执行其析构）
    pub(crate) fn take_backing(&self) -> ModuleBacking {
        std::mem::replace(&mut self.slots.lock().unwrap().backing, ModuleBacking::None)
    }

    fn attach(&self, descriptor: ModuleDescriptor, token: SelfToken) {
        let mut slots = self.slots.lock().unwrap();
        slots.description = descriptor.description.clone();
        slots.flags = descriptor.flags;
        slots.self_token = Some(token);
        slots.descriptor = Some(descriptor);
    }

    fn detach(&self) {
        let mut slots = self.slots.lock().unwrap();
        slots.descriptor = None;
        slots.self_token = None;
    }
}

impl std::fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("name", &self.name)
            .field("refcount", &self.refcount())
            .field("deferred_reload", &self.deferred_reload())
            .finish_non_exhaustive()
    }
}

/// `modules` 列表的一行
#[derive(Debug, Clone)]
pub struct ModuleListEntry {
    /// 模块规范名
    pub name: String,
    /// 模块描述
    pub description: String,
    /// 引用计数
    pub refcount: usize,
    /// 当前状态
    pub state: ModuleState,
    /// 最近一次加载完成时间
    pub loaded_at: Option<DateTime<Utc>>,
}

impl ModuleListEntry {
    /// 渲染为 `modules` 命令输出的一行
    pub fn format_line(&self) -> String {
        format!(
            "{:<24} {:>4} {:<10} {}",
            self.name, self.refcount, self.state, self.description
        )
    }
}

// ============================================================================
// 注册表
// ============================================================================

/// 注册表锁保护的三张表
struct RegistryTable {
    /// 规范名 -> 记录
    records: HashMap<String, Arc<ModuleRecord>>,
    /// 规范名 -> 状态（与记录分表存放，读路径不触碰记录锁）
    states: HashMap<String, ModuleState>,
    /// 延迟重载队列（引用计数归零时入队，协调器排空）
    reload_queue: VecDeque<String>,
}

/// 模块注册表
///
/// 进程级共享；以显式值的形式传入协调器而非真正的全局变量，
/// 二进制入口处持有唯一的默认实例。
pub struct ModuleRegistry {
    table: Arc<RwLock<RegistryTable>>,
    load_counter: Arc<AtomicU64>,
}

impl ModuleRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            table: Arc::new(RwLock::new(RegistryTable {
                records: HashMap::new(),
                states: HashMap::new(),
                reload_queue: VecDeque::new(),
            })),
            load_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    // ==================== 记录创建与注册 ====================

    /// 为一次动态加载创建打开中的记录
    ///
    /// 已有活跃记录（opening/registered/loaded/unloading）时拒绝；
    /// 旧的 unloaded/failed/discovered 记录被替换为全新记录。
    pub async fn begin_open(&self, canon: &str) -> Result<Arc<ModuleRecord>> {
        let mut table = self.table.write().await;

        if let Some(state) = table.states.get(canon) {
            match state {
                ModuleState::Loaded => {
                    return Err(CoreError::ModuleAlreadyLoaded(canon.to_string()));
                }
                s if !s.can_load() => {
                    return Err(CoreError::StateConflict {
                        module: canon.to_string(),
                        state: s.to_string(),
                        operation: "load".to_string(),
                    });
                }
                _ => {}
            }
        }

        let record = ModuleRecord::new(canon);
        table.records.insert(canon.to_string(), Arc::clone(&record));
        table.states.insert(canon.to_string(), ModuleState::Opening);
        trace!(module = canon, "记录进入 opening");
        Ok(record)
    }

    /// 注册动态模块的描述符
    ///
    /// 仅当存在同名的打开中记录时成功；附着描述符并签发自持令牌，
    /// 记录从 opening 进入 registered。
    ///
    /// # Errors
    ///
    /// - 描述符名字不是规范名
    /// - 没有同名的打开中记录
    pub async fn register(&self, descriptor: ModuleDescriptor) -> Result<SelfToken> {
        let canon = canonical_name(&descriptor.name)?;
        if canon != descriptor.name {
            return Err(CoreError::RegisterFailed {
                module: descriptor.name.clone(),
                reason: format!("描述符名字不是规范名（应为 '{}'）", canon),
            });
        }

        let mut table = self.table.write().await;
        match table.states.get(&canon) {
            Some(ModuleState::Opening) => {}
            Some(state) => {
                return Err(CoreError::RegisterFailed {
                    module: canon.clone(),
                    reason: format!("同名记录已存在，状态为 {}", state),
                });
            }
            None => {
                return Err(CoreError::RegisterFailed {
                    module: canon.clone(),
                    reason: "没有打开中的记录".to_string(),
                });
            }
        }

        let record = table
            .records
            .get(&canon)
            .cloned()
            .ok_or_else(|| CoreError::Internal(format!("状态表与记录表不一致: {}", canon)))?;

        let token = SelfToken::issue(&canon);
        record.attach(descriptor, token.clone());
        table.states.insert(canon.clone(), ModuleState::Registered);
        debug!(module = %canon, "模块已注册");
        Ok(token)
    }

    /// 注册进程内静态模块
    ///
    /// 没有共享对象后备的模块（内建模块、测试）走此路径，
    /// 记录直接进入 registered，之后可以正常 load。
    pub async fn register_static(&self, descriptor: ModuleDescriptor) -> Result<SelfToken> {
        let canon = canonical_name(&descriptor.name)?;

        let mut table = self.table.write().await;
        if let Some(state) = table.states.get(&canon) {
            if !state.can_load() {
                return Err(CoreError::RegisterFailed {
                    module: canon.clone(),
                    reason: format!("同名记录已存在，状态为 {}", state),
                });
            }
        }

        let record = ModuleRecord::new(&canon);
        let token = SelfToken::issue(&canon);
        record.attach(descriptor, token.clone());
        table.records.insert(canon.clone(), Arc::clone(&record));
        table.states.insert(canon.clone(), ModuleState::Registered);
        debug!(module = %canon, "静态模块已注册");
        Ok(token)
    }

    /// 取消注册
    ///
    /// 仅在 registered / unloaded / failed 状态合法；其他状态说明
    /// 有生命周期变迁在途，属于不变量被破坏。
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let canon = canonical_name(name)?;
        let mut table = self.table.write().await;

        match table.states.get(&canon) {
            None => return Err(CoreError::ModuleNotFound(canon)),
            Some(state) if !state.can_unregister() => {
                error!(module = %canon, state = %state, "在非法状态下取消注册");
                return Err(CoreError::Internal(format!(
                    "模块 '{}' 在状态 {} 下被取消注册",
                    canon, state
                )));
            }
            Some(_) => {}
        }

        if let Some(record) = table.records.remove(&canon) {
            record.detach();
        }
        table.states.remove(&canon);
        debug!(module = %canon, "模块已取消注册");
        Ok(())
    }

    /// 登记一个已发现（尚未加载）的模块
    ///
    /// 目录扫描使用；已有记录时不做任何事。
    pub async fn insert_discovered(&self, canon: &str) -> bool {
        let mut table = self.table.write().await;
        if table.states.contains_key(canon) {
            return false;
        }
        let record = ModuleRecord::new(canon);
        table.records.insert(canon.to_string(), record);
        table
            .states
            .insert(canon.to_string(), ModuleState::Discovered);
        true
    }

    // ==================== 查询 ====================

    /// 按规范名查找记录
    pub async fn lookup(&self, canon: &str) -> Option<Arc<ModuleRecord>> {
        let table = self.table.read().await;
        table.records.get(canon).cloned()
    }

    /// 获取模块状态
    pub async fn state_of(&self, canon: &str) -> Option<ModuleState> {
        let table = self.table.read().await;
        table.states.get(canon).copied()
    }

    /// 已注册记录数量
    pub async fn count(&self) -> usize {
        let table = self.table.read().await;
        table.records.len()
    }

    /// 处于指定状态的模块名列表
    pub async fn find_by_state(&self, state: ModuleState) -> Vec<String> {
        let table = self.table.read().await;
        table
            .states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// 每条记录输出一行：名字、描述、引用计数、状态
    pub async fn list(&self) -> Vec<ModuleListEntry> {
        let table = self.table.read().await;
        let mut entries: Vec<ModuleListEntry> = table
            .records
            .iter()
            .map(|(name, record)| ModuleListEntry {
                name: name.clone(),
                description: record.description(),
                refcount: record.refcount(),
                state: table
                    .states
                    .get(name)
                    .copied()
                    .unwrap_or(ModuleState::Unloaded),
                loaded_at: record.loaded_at(),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    // ==================== 状态更新 ====================

    /// 设置模块状态
    ///
    /// 进入 loaded 时顺带记录加载序号和时间戳。
    pub async fn set_state(&self, canon: &str, state: ModuleState) -> Result<()> {
        let mut table = self.table.write().await;
        if !table.states.contains_key(canon) {
            return Err(CoreError::ModuleNotFound(canon.to_string()));
        }
        table.states.insert(canon.to_string(), state);

        if state == ModuleState::Loaded {
            if let Some(record) = table.records.get(canon) {
                let seq = self.load_counter.fetch_add(1, Ordering::SeqCst) + 1;
                record.load_seq.store(seq, Ordering::SeqCst);
                record.slots.lock().unwrap().loaded_at = Some(Utc::now());
            }
        }

        trace!(module = canon, state = %state, "模块状态更新");
        Ok(())
    }

    /// 从表中清除一条记录
    ///
    /// 仅当记录达到 unloaded（且无引用、无依赖者）或 failed
    /// （失败已上报）时由协调器调用。
    pub async fn remove(&self, canon: &str) {
        let mut table = self.table.write().await;
        if let Some(record) = table.records.remove(canon) {
            record.detach();
        }
        table.states.remove(canon);
        trace!(module = canon, "记录已清除");
    }

    // ==================== 引用计数 ====================

    /// 增加引用计数
    ///
    /// 仅在 loaded / registered 状态合法；状态检查与计数增加在
    /// 同一个注册表写临界区内完成，与卸载方的归零检查互斥。
    pub async fn ref_module(&self, canon: &str) -> Result<Arc<ModuleRecord>> {
        let mut table = self.table.write().await;
        let state = table
            .states
            .get(canon)
            .copied()
            .ok_or_else(|| CoreError::ModuleNotFound(canon.to_string()))?;
        if !state.can_ref() {
            return Err(CoreError::StateConflict {
                module: canon.to_string(),
                state: state.to_string(),
                operation: "ref".to_string(),
            });
        }
        let record = table
            .records
            .get(canon)
            .ok_or_else(|| CoreError::Internal(format!("状态表与记录表不一致: {}", canon)))?;
        record.refcount.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(record))
    }

    /// 减少引用计数
    ///
    /// 这是最后一个引用且延迟重载位置位时，在同一临界区内把
    /// 名字排入延迟重载队列（不会丢唤醒）。从不直接释放记录。
    pub async fn unref_module(&self, canon: &str) -> Result<()> {
        let mut table = self.table.write().await;
        let record = table
            .records
            .get(canon)
            .cloned()
            .ok_or_else(|| CoreError::ModuleNotFound(canon.to_string()))?;

        let prev = record.refcount.fetch_sub(1, Ordering::SeqCst);
        if prev == 0 {
            record.refcount.store(0, Ordering::SeqCst);
            return Err(CoreError::Internal(format!(
                "模块 '{}' 引用计数下溢",
                canon
            )));
        }

        if prev == 1 && record.deferred_reload.load(Ordering::SeqCst) {
            table.reload_queue.push_back(canon.to_string());
            debug!(module = canon, "引用计数归零，延迟重载入队");
        }
        Ok(())
    }

    // ==================== 生命周期门控 ====================

    /// 卸载门
    ///
    /// 状态检查、引用计数归零检查与置 `unloading` 在同一个写
    /// 临界区内完成，与并发 ref 的增计数互斥。
    pub async fn begin_unload(&self, canon: &str) -> Result<()> {
        let mut table = self.table.write().await;
        let state = table
            .states
            .get(canon)
            .copied()
            .ok_or_else(|| CoreError::ModuleNotFound(canon.to_string()))?;
        if state != ModuleState::Loaded {
            return Err(CoreError::StateConflict {
                module: canon.to_string(),
                state: state.to_string(),
                operation: "unload".to_string(),
            });
        }

        let record = table
            .records
            .get(canon)
            .ok_or_else(|| CoreError::Internal(format!("状态表与记录表不一致: {}", canon)))?;
        let refcount = record.refcount();
        if refcount > 0 {
            return Err(CoreError::UnloadRefused {
                module: canon.to_string(),
                reason: format!("引用计数为 {}", refcount),
            });
        }

        table
            .states
            .insert(canon.to_string(), ModuleState::Unloading);
        Ok(())
    }

    /// 重载门
    ///
    /// 引用计数为零时放行；非零时按 `try_delayed` 置延迟位并
    /// 返回已排队，或直接拒绝。检查与置位在同一临界区内，
    /// 与 unref 的归零入队不会丢唤醒。
    pub async fn reload_gate(&self, canon: &str, try_delayed: bool) -> Result<()> {
        let table = self.table.write().await;
        let state = table
            .states
            .get(canon)
            .copied()
            .ok_or_else(|| CoreError::ModuleNotFound(canon.to_string()))?;
        if state != ModuleState::Loaded {
            return Err(CoreError::StateConflict {
                module: canon.to_string(),
                state: state.to_string(),
                operation: "reload".to_string(),
            });
        }

        let record = table
            .records
            .get(canon)
            .ok_or_else(|| CoreError::Internal(format!("状态表与记录表不一致: {}", canon)))?;
        if record.refcount() > 0 {
            if try_delayed {
                record.deferred_reload.store(true, Ordering::SeqCst);
                return Err(CoreError::ReloadQueued(canon.to_string()));
            }
            return Err(CoreError::ReloadRefused(canon.to_string()));
        }
        Ok(())
    }

    // ==================== 延迟重载队列 ====================

    /// 置延迟重载位
    ///
    /// 位是电平触发的：重复请求合并为一次。
    pub async fn set_deferred_reload(&self, canon: &str) -> Result<()> {
        let table = self.table.write().await;
        let record = table
            .records
            .get(canon)
            .ok_or_else(|| CoreError::ModuleNotFound(canon.to_string()))?;
        record.deferred_reload.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// 清延迟重载位
    pub async fn clear_deferred_reload(&self, canon: &str) {
        let table = self.table.write().await;
        if let Some(record) = table.records.get(canon) {
            record.deferred_reload.store(false, Ordering::SeqCst);
        }
    }

    /// 取出队首的延迟重载请求
    pub async fn pop_deferred_reload(&self) -> Option<String> {
        let mut table = self.table.write().await;
        table.reload_queue.pop_front()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ModuleRegistry {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            load_counter: Arc::clone(&self.load_counter),
        }
    }
}
