//! 开关依赖
//!
//! 可用性由程序直接设置，用于按应用条件控制组件。只有被组件跟踪时才报告可用，
//! 与服务依赖在跟踪前不可用的行为保持一致。

use dm_abstractions::{Dependency, DependencyService};
use dm_common::DependencyError;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::debug;

struct Inner {
    available: bool,
    owner: Option<Weak<dyn DependencyService>>,
}

/// 开关依赖
pub struct ToggleDependency {
    name: String,
    required: bool,
    instance_bound: bool,
    inner: Mutex<Inner>,
}

impl ToggleDependency {
    pub fn builder() -> ToggleDependencyBuilder {
        ToggleDependencyBuilder::default()
    }

    /// 切换可用性
    ///
    /// 已启动且状态发生变化时通知所属组件。
    pub fn set_available(&self, available: bool) {
        let owner = {
            let mut inner = self.inner.lock();
            if inner.available == available {
                return;
            }
            inner.available = available;
            inner.owner.as_ref().and_then(Weak::upgrade)
        };

        debug!("开关依赖 {} 切换为 {}", self.name, available);
        if let Some(owner) = owner {
            if available {
                owner.dependency_available(self);
            } else {
                owner.dependency_unavailable(self);
            }
        }
    }

    /// 开关当前的取值，与是否被跟踪无关
    pub fn is_enabled(&self) -> bool {
        self.inner.lock().available
    }

    /// 是否正在被某个组件跟踪
    pub fn is_started(&self) -> bool {
        self.inner.lock().owner.is_some()
    }
}

impl Dependency for ToggleDependency {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> &'static str {
        "toggle"
    }

    fn is_required(&self) -> bool {
        self.required
    }

    fn is_available(&self) -> bool {
        let inner = self.inner.lock();
        inner.available && inner.owner.is_some()
    }

    fn is_instance_bound(&self) -> bool {
        self.instance_bound
    }

    fn start(&self, service: Arc<dyn DependencyService>) -> Result<(), DependencyError> {
        let enabled = {
            let mut inner = self.inner.lock();
            inner.owner = Some(Arc::downgrade(&service));
            inner.available
        };
        if enabled {
            service.dependency_available(self);
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), DependencyError> {
        let (owner, enabled) = {
            let mut inner = self.inner.lock();
            (inner.owner.take().and_then(|w| w.upgrade()), inner.available)
        };
        if let (Some(owner), true) = (owner, enabled) {
            owner.dependency_unavailable(self);
        }
        Ok(())
    }

    fn create_copy(&self) -> Arc<dyn Dependency> {
        Arc::new(Self {
            name: self.name.clone(),
            required: self.required,
            instance_bound: self.instance_bound,
            inner: Mutex::new(Inner {
                available: self.is_enabled(),
                owner: None,
            }),
        })
    }
}

/// 开关依赖构建器
#[derive(Debug, Clone)]
pub struct ToggleDependencyBuilder {
    name: String,
    required: bool,
    available: bool,
    instance_bound: bool,
}

impl Default for ToggleDependencyBuilder {
    fn default() -> Self {
        Self {
            name: "toggle".to_string(),
            required: true,
            available: false,
            instance_bound: false,
        }
    }
}

impl ToggleDependencyBuilder {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    pub fn with_instance_bound(mut self, instance_bound: bool) -> Self {
        self.instance_bound = instance_bound;
        self
    }

    pub fn build(self) -> Arc<ToggleDependency> {
        Arc::new(ToggleDependency {
            name: self.name,
            required: self.required,
            instance_bound: self.instance_bound,
            inner: Mutex::new(Inner {
                available: self.available,
                owner: None,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let toggle = ToggleDependency::builder().build();
        assert!(toggle.is_required());
        assert!(!toggle.is_available());
        assert!(!toggle.is_instance_bound());
        assert_eq!(toggle.kind(), "toggle");
    }

    #[test]
    fn test_set_available_without_owner() {
        let toggle = ToggleDependency::builder().with_name("gate").build();
        toggle.set_available(true);
        assert!(toggle.is_enabled());
        assert!(!toggle.is_started());
        assert!(!toggle.is_available());

        let copy = toggle.create_copy();
        assert!(!copy.is_available());
        assert_eq!(copy.name(), "gate");
    }
}
