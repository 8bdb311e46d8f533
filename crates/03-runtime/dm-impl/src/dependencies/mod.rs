//! 依赖实现

mod configuration;
mod service;
mod toggle;

pub use configuration::{ConfigurationDependency, ConfigurationDependencyBuilder, UpdatedCallback};
pub use service::{
    ServiceCallback, ServiceDependency, ServiceDependencyBuilder, ServiceFilter, SwapCallback,
};
pub use toggle::{ToggleDependency, ToggleDependencyBuilder};

use dm_abstractions::Dependency;
use std::sync::Arc;

/// 依赖按 `Arc` 指针判等
pub(crate) fn same_dependency(a: &Arc<dyn Dependency>, b: &Arc<dyn Dependency>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
