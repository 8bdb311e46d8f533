//! # DM Implementation
//!
//! 依赖管理运行时：组件状态机、串行执行器、依赖实现和装饰器。
//!
//! ## 主要组件
//!
//! - [`SerialExecutor`] - 无专用线程的串行执行器
//! - [`State`] / [`Phase`] - 组件状态快照和生命周期阶段
//! - [`Component`] - 组件状态机
//! - [`DependencyManager`] - 组件的创建、启停和依赖工厂
//! - [`ServiceDependency`] / [`ConfigurationDependency`] / [`ToggleDependency`] - 依赖实现
//! - [`FilterService`] - 切面、适配器和工厂配置适配器
//! - [`InMemoryServiceRegistry`] - 内存服务注册表

mod callback;

pub mod component;
pub mod decorator;
pub mod dependencies;
pub mod executor;
pub mod manager;
pub mod registry;
pub mod state;
pub mod transition;

pub use component::{Component, ComponentImpl, Implementation};
pub use decorator::{ComponentCreator, DecoratorKind, FilterService, KeyedFanOut, UpdateCallback};
pub use dependencies::*;
pub use executor::{SerialExecutor, Task};
pub use manager::{DependencyManager, ManagedComponent};
pub use registry::InMemoryServiceRegistry;
pub use state::{Phase, State};
pub use transition::{transition_actions, TransitionAction};

#[cfg(test)]
mod tests;
