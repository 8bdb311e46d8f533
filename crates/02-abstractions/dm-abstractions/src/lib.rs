//! # DM Abstractions
//!
//! 依赖管理的契约层，定义组件运行时与其协作者之间的接口。
//!
//! ## 核心接口
//!
//! - [`Dependency`] / [`DependencyService`] - 依赖与其所属组件之间的双向契约
//! - [`ServiceRegistry`] / [`ServiceRegistration`] - 服务注册表门面
//! - [`Lifecycle`] / [`Callbacks`] - 组件生命周期回调
//! - [`InjectionTable`] / [`Injectable`] - 显式的自动注入表
//! - [`ConfigurationAdmin`] - 配置管理契约

pub mod configuration;
pub mod context;
pub mod dependency;
pub mod injection;
pub mod lifecycle;
pub mod registry;

pub use configuration::*;
pub use context::*;
pub use dependency::*;
pub use injection::*;
pub use lifecycle::*;
pub use registry::*;
