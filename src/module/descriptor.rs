//! 模块描述符定义
//!
//! 定义模块向加载器公布的描述符、生命周期入口点接口、
//! 模块状态机的状态集合，以及动态模块导出注册符号用的宏。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::utils::id::issue_token;
use crate::utils::Result;

/// 动态模块导出的注册符号名
///
/// 后端打开共享对象后按此符号解析 [`ModuleRegistration`]，
/// 并在调用模块 `load` 入口点之前完成注册。
pub const REGISTRATION_SYMBOL: &[u8] = b"LBBS_MODULE_REGISTRATION\0";

/// 模块状态
///
/// 生命周期: unloaded -> opening -> registered -> loaded -> unloading -> unloaded，
/// 任何非终止状态都可能进入 failed。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    /// 已发现（扫描模块目录得到，尚未加载）
    Discovered,
    /// 打开中（正在打开共享对象，等待注册）
    Opening,
    /// 已注册（描述符已附着，load 入口点尚未执行）
    Registered,
    /// 已加载（load 入口点成功返回）
    Loaded,
    /// 卸载中（unload 入口点执行中）
    Unloading,
    /// 已卸载
    Unloaded,
    /// 失败
    Failed,
}

impl ModuleState {
    /// 检查该状态是否允许发起加载
    pub fn can_load(&self) -> bool {
        matches!(
            self,
            ModuleState::Discovered | ModuleState::Unloaded | ModuleState::Failed
        )
    }

    /// 检查该状态是否允许持有引用
    ///
    /// `registered` 也允许：模块在自身 load 期间就可能被依赖方引用。
    pub fn can_ref(&self) -> bool {
        matches!(self, ModuleState::Loaded | ModuleState::Registered)
    }

    /// 检查该状态是否允许取消注册
    pub fn can_unregister(&self) -> bool {
        matches!(
            self,
            ModuleState::Registered | ModuleState::Unloaded | ModuleState::Failed
        )
    }

    /// 是否为静止状态（没有生命周期变迁在进行）
    pub fn is_quiescent(&self) -> bool {
        matches!(
            self,
            ModuleState::Discovered
                | ModuleState::Loaded
                | ModuleState::Unloaded
                | ModuleState::Failed
        )
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleState::Discovered => "discovered",
            ModuleState::Opening => "opening",
            ModuleState::Registered => "registered",
            ModuleState::Loaded => "loaded",
            ModuleState::Unloading => "unloading",
            ModuleState::Unloaded => "unloaded",
            ModuleState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// 模块加载标志
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleFlags {
    /// 导出全局符号
    ///
    /// 置位时后端以全局符号可见性打开共享对象，
    /// 使其符号对之后加载的模块可见。
    #[serde(default)]
    pub global_symbols: bool,
}

impl ModuleFlags {
    /// 默认标志（符号仅对模块自身可见）
    pub fn standard() -> Self {
        Self::default()
    }

    /// 导出全局符号的标志
    pub fn global() -> Self {
        Self {
            global_symbols: true,
        }
    }
}

/// 模块自持令牌
///
/// 注册时由注册表签发给模块，供模块在日志、require 调用等场合
/// 标识自身。令牌不拥有记录：记录进入 `unloaded` 后令牌即失效。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfToken {
    name: String,
    token: String,
}

impl SelfToken {
    /// 签发新令牌（仅注册表调用）
    pub(crate) fn issue(name: &str) -> Self {
        Self {
            name: name.to_string(),
            token: issue_token(name),
        }
    }

    /// 模块的规范名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 令牌值
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Display for SelfToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.token)
    }
}

/// 模块生命周期入口点
///
/// 动态模块和进程内静态模块都通过实现此接口接入加载器。
/// `load` 和 `unload` 必须实现；`reload` 为可选钩子。
///
/// 入口点在持有本记录变迁锁的前提下被调用，同一记录同一时刻
/// 最多只有一个入口点调用在途。入口点内可以执行任意耗时的
/// I/O（监听线程、数据库连接等）。
#[async_trait]
pub trait ModuleEntry: Send + Sync {
    /// 加载入口点
    ///
    /// 模块在这里完成自身初始化，并通过 `ctx` 对依赖模块发起
    /// require。返回错误时记录进入 failed 并被清除。
    async fn load(&self, ctx: &super::lifecycle::ModuleContext) -> Result<()>;

    /// 卸载入口点
    ///
    /// 模块在这里释放资源，并对 load 期间 require 的模块逐个
    /// unrequire（与获取顺序相反）。
    async fn unload(&self, ctx: &super::lifecycle::ModuleContext) -> Result<()>;

    /// 可选的重载钩子
    ///
    /// 协调器的 reload 操作执行完整的卸载-再加载循环，不经由
    /// 此钩子；钩子留给模块自身刷新配置等轻量用途。
    async fn reload(&self, _ctx: &super::lifecycle::ModuleContext) -> Result<()> {
        Ok(())
    }
}

/// 模块描述符
///
/// 模块向加载器公布的记录：规范名、描述、加载标志和入口点。
#[derive(Clone)]
pub struct ModuleDescriptor {
    /// 规范名（小写，不含扩展名）
    pub name: String,

    /// 人类可读的描述
    pub description: String,

    /// 加载标志
    pub flags: ModuleFlags,

    /// 生命周期入口点
    pub entry: Arc<dyn ModuleEntry>,
}

impl ModuleDescriptor {
    /// 创建描述符
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        entry: Arc<dyn ModuleEntry>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            flags: ModuleFlags::standard(),
            entry,
        }
    }

    /// 设置加载标志
    pub fn with_flags(mut self, flags: ModuleFlags) -> Self {
        self.flags = flags;
        self
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// 动态模块的注册入口
///
/// 共享对象以 [`REGISTRATION_SYMBOL`] 为名导出一个本类型的静态值；
/// 后端解析符号后调用 `descriptor` 取得描述符并向注册表注册。
#[repr(C)]
pub struct ModuleRegistration {
    /// 构造描述符的函数
    pub descriptor: fn() -> ModuleDescriptor,
}

/// 声明一个动态模块
///
/// 在模块 crate（`cdylib`）的根部使用，导出加载器约定的注册符号。
/// 对应 C 时代的 `BBS_MODULE_INFO` 宏。
///
/// # 示例
///
/// ```rust,ignore
/// use lbbs_core::{lbbs_module, ModuleFlags};
///
/// lbbs_module!(ChanServ::default, "mod_chanserv", "ChanServ for IRC");
/// // 或带标志：
/// lbbs_module!(
///     IrcServer::default,
///     "net_irc",
///     "RFC1459 IRC Server",
///     ModuleFlags::global()
/// );
/// ```
#[macro_export]
macro_rules! lbbs_module {
    ($entry:expr, $name:expr, $desc:expr) => {
        $crate::lbbs_module!($entry, $name, $desc, $crate::module::ModuleFlags::standard());
    };
    ($entry:expr, $name:expr, $desc:expr, $flags:expr) => {
        #[doc(hidden)]
        fn __lbbs_module_descriptor() -> $crate::module::ModuleDescriptor {
            $crate::module::ModuleDescriptor::new($name, $desc, ::std::sync::Arc::new($entry()))
                .with_flags($flags)
        }

        #[no_mangle]
        pub static LBBS_MODULE_REGISTRATION: $crate::module::ModuleRegistration =
            $crate::module::ModuleRegistration {
                descriptor: __lbbs_module_descriptor,
            };
    };
}
