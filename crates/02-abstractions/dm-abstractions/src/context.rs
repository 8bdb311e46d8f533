//! Bundle 上下文

use crate::configuration::ConfigurationAdmin;
use crate::registry::{ServiceObject, ServiceRegistration, ServiceRegistry};
use dm_common::{Properties, RegistryError, ServiceReference};
use std::fmt;
use std::sync::Arc;

struct ContextInner {
    bundle_id: u64,
    symbolic_name: String,
    registry: Arc<dyn ServiceRegistry>,
    configuration_admin: Option<Arc<dyn ConfigurationAdmin>>,
}

/// Bundle 上下文
///
/// 组件访问服务注册表和配置管理的入口，克隆开销很小。
#[derive(Clone)]
pub struct BundleContext {
    inner: Arc<ContextInner>,
}

impl BundleContext {
    /// 创建新的上下文
    pub fn new(
        bundle_id: u64,
        symbolic_name: impl Into<String>,
        registry: Arc<dyn ServiceRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                bundle_id,
                symbolic_name: symbolic_name.into(),
                registry,
                configuration_admin: None,
            }),
        }
    }

    /// 附加配置管理服务
    pub fn with_configuration_admin(self, admin: Arc<dyn ConfigurationAdmin>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                bundle_id: self.inner.bundle_id,
                symbolic_name: self.inner.symbolic_name.clone(),
                registry: Arc::clone(&self.inner.registry),
                configuration_admin: Some(admin),
            }),
        }
    }

    pub fn bundle_id(&self) -> u64 {
        self.inner.bundle_id
    }

    pub fn symbolic_name(&self) -> &str {
        &self.inner.symbolic_name
    }

    pub fn registry(&self) -> &Arc<dyn ServiceRegistry> {
        &self.inner.registry
    }

    pub fn configuration_admin(&self) -> Option<&Arc<dyn ConfigurationAdmin>> {
        self.inner.configuration_admin.as_ref()
    }

    /// 以本 bundle 的身份注册服务
    pub fn register_service(
        &self,
        interfaces: &[String],
        service: ServiceObject,
        properties: Properties,
    ) -> Result<Arc<dyn ServiceRegistration>, RegistryError> {
        self.inner
            .registry
            .register_service(self.inner.bundle_id, interfaces, service, properties)
    }

    /// 查询服务引用
    pub fn get_service_references(&self, interface: &str) -> Vec<ServiceReference> {
        self.inner.registry.get_service_references(interface)
    }

    /// 获取服务对象
    pub fn get_service(&self, reference: &ServiceReference) -> Option<ServiceObject> {
        self.inner.registry.get_service(reference)
    }
}

impl fmt::Debug for BundleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleContext")
            .field("bundle_id", &self.inner.bundle_id)
            .field("symbolic_name", &self.inner.symbolic_name)
            .field("configuration_admin", &self.inner.configuration_admin.is_some())
            .finish()
    }
}
