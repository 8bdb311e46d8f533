//! # DM Common
//!
//! 这个 crate 提供了依赖管理运行时各层共享的基础类型。
//!
//! ## 核心内容
//!
//! - [`errors`] - 错误分类（配置期错误、装饰器协议错误、回调错误等）
//! - [`properties`] - 服务属性及常用属性键
//! - [`metadata`] - 组件 ID、ID 序列、服务引用
//! - [`lifecycle`] - 组件与依赖的声明状态
//!
//! ## 设计原则
//!
//! - 只有配置期错误和装饰器协议错误会同步抛给调用方
//! - 异步回调中产生的错误一律记录日志后吞掉

pub mod errors;
pub mod lifecycle;
pub mod metadata;
pub mod properties;

pub use errors::*;
pub use lifecycle::*;
pub use metadata::*;
pub use properties::*;
