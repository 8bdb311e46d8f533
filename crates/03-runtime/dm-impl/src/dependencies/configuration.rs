//! 配置依赖
//!
//! 以 managed service 的身份向配置管理服务登记一个 PID，
//! 存在配置时可用，并把配置交给实例的 updated 回调。

use crate::callback::panic_message;
use dm_abstractions::{
    ConfigurationAdmin, Dependency, DependencyService, Instance, ManagedService,
};
use dm_common::{properties, CallbackResult, ConfigError, DependencyError, Properties};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// updated 回调，配置被删除时参数为 `None`
pub type UpdatedCallback =
    Arc<dyn Fn(&Instance, Option<&Properties>) -> CallbackResult + Send + Sync>;

#[derive(Default)]
struct Inner {
    owner: Option<Weak<dyn DependencyService>>,
    admin: Option<Arc<dyn ConfigurationAdmin>>,
    managed: Option<Arc<dyn ManagedService>>,
    settings: Option<Properties>,
}

/// 配置依赖，总是必需的
pub struct ConfigurationDependency {
    pid: String,
    propagate: bool,
    updated: Option<UpdatedCallback>,
    inner: Mutex<Inner>,
    self_ref: Weak<ConfigurationDependency>,
}

impl ConfigurationDependency {
    pub fn builder(pid: impl Into<String>) -> ConfigurationDependencyBuilder {
        ConfigurationDependencyBuilder {
            pid: pid.into(),
            propagate: false,
            updated: None,
        }
    }

    fn create(pid: String, propagate: bool, updated: Option<UpdatedCallback>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<ConfigurationDependency>| Self {
            pid,
            propagate,
            updated,
            inner: Mutex::new(Inner::default()),
            self_ref: weak.clone(),
        })
    }

    pub fn pid(&self) -> &str {
        &self.pid
    }

    /// 当前配置
    pub fn settings(&self) -> Option<Properties> {
        self.inner.lock().settings.clone()
    }

    fn invoke_updated(
        &self,
        owner: &dyn DependencyService,
        settings: Option<&Properties>,
    ) -> Result<(), ConfigError> {
        let Some(updated) = &self.updated else {
            return Ok(());
        };
        for instance in owner.callback_instances() {
            let outcome = catch_unwind(AssertUnwindSafe(|| updated(&instance, settings)));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(payload) => panic_message(payload.as_ref()),
            };
            warn!("组件 {} 拒绝配置 {}: {}", owner.name(), self.pid, message);
            return Err(ConfigError::InvalidProperties { message });
        }
        Ok(())
    }

    /// 配置管理服务推送的新配置
    fn configuration_updated(&self, settings: Option<&Properties>) -> Result<(), ConfigError> {
        let (owner, previous) = {
            let inner = self.inner.lock();
            (
                inner.owner.as_ref().and_then(Weak::upgrade),
                inner.settings.clone(),
            )
        };
        if settings.is_none() && previous.is_none() {
            return Ok(());
        }
        let Some(owner) = owner else {
            return Ok(());
        };

        if owner.is_instantiated() {
            self.invoke_updated(owner.as_ref(), settings)?;
        }
        self.inner.lock().settings = settings.cloned();
        debug!("配置 {} 已更新，组件 {}", self.pid, owner.name());

        match (previous.is_some(), settings.is_some()) {
            (false, true) => owner.dependency_available(self),
            (true, true) => owner.dependency_changed(self),
            (true, false) => owner.dependency_unavailable(self),
            (false, false) => {}
        }
        Ok(())
    }
}

impl Dependency for ConfigurationDependency {
    fn name(&self) -> String {
        self.pid.clone()
    }

    fn kind(&self) -> &'static str {
        "configuration"
    }

    fn is_required(&self) -> bool {
        true
    }

    fn is_available(&self) -> bool {
        self.inner.lock().settings.is_some()
    }

    fn is_propagated(&self) -> bool {
        self.propagate
    }

    fn properties(&self) -> Properties {
        self.inner
            .lock()
            .settings
            .as_ref()
            .map(properties::public_properties)
            .unwrap_or_default()
    }

    fn start(&self, service: Arc<dyn DependencyService>) -> Result<(), DependencyError> {
        let context = service.bundle_context();
        let admin = context
            .configuration_admin()
            .cloned()
            .ok_or_else(|| DependencyError::StartFailed {
                dependency: self.name(),
                message: "bundle 上下文中没有配置管理服务".to_string(),
            })?;

        let managed: Arc<dyn ManagedService> = Arc::new(ManagedTarget {
            dependency: self.self_ref.clone(),
        });
        {
            let mut inner = self.inner.lock();
            inner.owner = Some(Arc::downgrade(&service));
            inner.admin = Some(Arc::clone(&admin));
            inner.managed = Some(Arc::clone(&managed));
        }
        admin.add_managed_service(&self.pid, managed)?;
        Ok(())
    }

    fn stop(&self) -> Result<(), DependencyError> {
        let (admin, managed) = {
            let mut inner = self.inner.lock();
            let taken = (inner.admin.take(), inner.managed.take());
            *inner = Inner::default();
            taken
        };
        if let (Some(admin), Some(managed)) = (admin, managed) {
            admin.remove_managed_service(&self.pid, &managed);
        }
        Ok(())
    }

    fn invoke_added(&self, service: &dyn DependencyService) {
        let settings = self.settings();
        if let Some(settings) = settings {
            // 失败已经记录，实例照常激活
            let _ = self.invoke_updated(service, Some(&settings));
        }
    }

    fn create_copy(&self) -> Arc<dyn Dependency> {
        Self::create(self.pid.clone(), self.propagate, self.updated.clone())
    }
}

struct ManagedTarget {
    dependency: Weak<ConfigurationDependency>,
}

impl ManagedService for ManagedTarget {
    fn updated(&self, properties: Option<&Properties>) -> Result<(), ConfigError> {
        match self.dependency.upgrade() {
            Some(dependency) => dependency.configuration_updated(properties),
            None => Ok(()),
        }
    }
}

/// 配置依赖构建器
pub struct ConfigurationDependencyBuilder {
    pid: String,
    propagate: bool,
    updated: Option<UpdatedCallback>,
}

impl ConfigurationDependencyBuilder {
    /// 把公开的配置项传播到组件的服务属性上
    pub fn with_propagate(mut self, propagate: bool) -> Self {
        self.propagate = propagate;
        self
    }

    pub fn on_updated<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Instance, Option<&Properties>) -> CallbackResult + Send + Sync + 'static,
    {
        self.updated = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Arc<ConfigurationDependency> {
        ConfigurationDependency::create(self.pid, self.propagate, self.updated)
    }
}
