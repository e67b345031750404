//! 动态库后端
//!
//! 负责按目录约定把规范名解析为共享对象路径、打开共享对象、
//! 解析注册符号取得描述符，以及在卸载时执行关闭。
//!
//! 符号可见性：描述符的 `global_symbols` 标志置位时，后端把
//! 共享对象提升为全局符号可见，使其导出对之后加载的模块可用；
//! 否则符号只对模块自身可见。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, warn};

use super::descriptor::{ModuleDescriptor, ModuleRegistration, REGISTRATION_SYMBOL};
use crate::utils::{CoreError, Result};

/// 模块的共享对象后备
///
/// 记录是后备的唯一所有者。描述符里的入口点代码位于共享对象内，
/// 后备必须在描述符的所有克隆之后释放。
pub enum ModuleBacking {
    /// 无后备（静态模块，或尚未打开）
    None,
    /// 已打开的共享对象
    Shared(SharedObject),
}

impl ModuleBacking {
    /// 是否存在共享对象后备
    pub fn is_shared(&self) -> bool {
        matches!(self, ModuleBacking::Shared(_))
    }
}

impl std::fmt::Debug for ModuleBacking {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleBacking::None => write!(f, "ModuleBacking::None"),
            ModuleBacking::Shared(obj) => f
                .debug_struct("ModuleBacking::Shared")
                .field("path", &obj.path)
                .finish(),
        }
    }
}

/// 已打开的共享对象
pub struct SharedObject {
    library: Library,
    path: PathBuf,
}

impl SharedObject {
    /// 共享对象的磁盘路径
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// 动态库后端
///
/// 路径约定：`<模块目录>/<规范名>.<平台扩展名>`。
#[derive(Debug, Clone)]
pub struct DynamicLoader {
    modules_dir: PathBuf,
}

impl DynamicLoader {
    /// 创建后端
    pub fn new(modules_dir: impl Into<PathBuf>) -> Self {
        Self {
            modules_dir: modules_dir.into(),
        }
    }

    /// 配置的模块目录
    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    /// 规范名到共享对象路径
    pub fn path_for(&self, canon: &str) -> PathBuf {
        self.modules_dir
            .join(format!("{}.{}", canon, std::env::consts::DLL_EXTENSION))
    }

    /// 打开共享对象并解析描述符
    ///
    /// 打开触发共享对象初始化；随后按约定符号解析
    /// [`ModuleRegistration`] 并调用其描述符构造函数。调用方负责
    /// 把返回的描述符交给注册表注册，这一步先于 `load` 入口点。
    ///
    /// # Errors
    ///
    /// - `BackingNotFound` - 路径上没有文件
    /// - `BackingMalformed` - 不是可加载的共享对象
    /// - `SymbolMissing` - 缺少注册符号
    /// - `ModuleLoadFailed` - 描述符构造函数 panic
    pub fn open(&self, canon: &str) -> Result<(ModuleBacking, ModuleDescriptor)> {
        let path = self.path_for(canon);
        if !path.exists() {
            return Err(CoreError::BackingNotFound(path.display().to_string()));
        }

        debug!(module = canon, path = %path.display(), "打开共享对象");

        // 安全性：路径来自受控的模块目录；共享对象初始化代码
        // 在此处执行，与 dlopen 的语义一致。
        let library = unsafe { Library::new(&path) }.map_err(|e| CoreError::BackingMalformed {
            path: path.display().to_string(),
            cause: e.to_string(),
        })?;

        let descriptor = Self::resolve_descriptor(&library, &path)?;

        // 描述符名字必须与请求的规范名一致，否则记录对不上号
        if descriptor.name != canon {
            return Err(CoreError::RegisterFailed {
                module: canon.to_string(),
                reason: format!("共享对象自称 '{}'", descriptor.name),
            });
        }

        let library = if descriptor.flags.global_symbols {
            Self::promote_global(library, &path)?
        } else {
            library
        };

        Ok((
            ModuleBacking::Shared(SharedObject { library, path }),
            descriptor,
        ))
    }

    /// 解析注册符号并构造描述符
    fn resolve_descriptor(library: &Library, path: &Path) -> Result<ModuleDescriptor> {
        // 安全性：符号由 lbbs_module! 宏导出，类型固定为
        // ModuleRegistration 静态值。
        let registration = unsafe {
            library
                .get::<*const ModuleRegistration>(REGISTRATION_SYMBOL)
                .map_err(|_| CoreError::SymbolMissing {
                    path: path.display().to_string(),
                })?
        };

        let descriptor_fn = unsafe { (**registration).descriptor };
        catch_unwind(AssertUnwindSafe(descriptor_fn)).map_err(|_| CoreError::ModuleLoadFailed {
            module: path.display().to_string(),
            cause: "描述符构造函数 panic".to_string(),
        })
    }

    /// 把共享对象提升为全局符号可见（RTLD_GLOBAL）
    #[cfg(unix)]
    fn promote_global(local: Library, path: &Path) -> Result<Library> {
        use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_NOW};

        debug!(path = %path.display(), "提升为全局符号可见");

        // 安全性：对同一路径的二次 dlopen 只增加引用计数并提升
        // 可见性，不会重复执行初始化。
        let global = unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }.map_err(
            |e| CoreError::BackingMalformed {
                path: path.display().to_string(),
                cause: e.to_string(),
            },
        )?;

        // 局部可见的第一把句柄不再需要
        drop(local);
        Ok(Library::from(global))
    }

    #[cfg(not(unix))]
    fn promote_global(local: Library, path: &Path) -> Result<Library> {
        // 本平台没有全局符号可见性的概念，标志按无操作处理
        warn!(path = %path.display(), "平台不支持全局符号可见性");
        Ok(local)
    }

    /// 关闭共享对象
    ///
    /// 执行共享对象的析构并释放后备。调用方保证此时描述符
    /// （及其入口点的所有克隆）已被丢弃。
    pub fn close(&self, canon: &str, backing: ModuleBacking) {
        match backing {
            ModuleBacking::None => {}
            ModuleBacking::Shared(obj) => {
                debug!(module = canon, path = %obj.path.display(), "关闭共享对象");
                if let Err(e) = obj.library.close() {
                    warn!(module = canon, error = %e, "共享对象关闭失败");
                }
            }
        }
    }
}
