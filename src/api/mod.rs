//! 公共 API 接口
//!
//! 提供给二进制入口和嵌入方使用的统一接口。

pub mod sdk;

pub use sdk::{BbsCore, CommandOutcome, CoreState};
