//! 服务注册表门面

use dm_common::{Properties, RegistryError, ServiceReference};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// 注册表中的服务对象
pub type ServiceObject = Arc<dyn Any + Send + Sync>;

/// 监听器句柄
pub type ListenerId = u64;

/// 服务事件
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    /// 服务已注册
    Registered(ServiceReference),
    /// 服务属性已修改
    Modified {
        reference: ServiceReference,
        previous: Properties,
    },
    /// 服务即将注销
    Unregistering(ServiceReference),
}

impl ServiceEvent {
    /// 事件所关联的服务引用
    pub fn reference(&self) -> &ServiceReference {
        match self {
            Self::Registered(reference) => reference,
            Self::Modified { reference, .. } => reference,
            Self::Unregistering(reference) => reference,
        }
    }
}

/// 服务事件监听器
pub trait ServiceListener: Send + Sync {
    /// 处理服务事件，在触发事件的线程上同步调用
    fn service_changed(&self, event: &ServiceEvent);
}

/// 服务注册句柄
pub trait ServiceRegistration: Send + Sync {
    /// 当前的服务引用
    fn reference(&self) -> Result<ServiceReference, RegistryError>;

    /// 替换服务属性
    fn set_properties(&self, properties: Properties) -> Result<(), RegistryError>;

    /// 注销服务
    fn unregister(&self) -> Result<(), RegistryError>;
}

/// 服务注册表
pub trait ServiceRegistry: Send + Sync {
    /// 注册服务
    fn register_service(
        &self,
        bundle_id: u64,
        interfaces: &[String],
        service: ServiceObject,
        properties: Properties,
    ) -> Result<Arc<dyn ServiceRegistration>, RegistryError>;

    /// 查询提供指定接口的服务，按排名降序、ID 升序排列
    fn get_service_references(&self, interface: &str) -> Vec<ServiceReference>;

    /// 获取服务对象
    fn get_service(&self, reference: &ServiceReference) -> Option<ServiceObject>;

    /// 添加监听器
    fn add_service_listener(&self, listener: Arc<dyn ServiceListener>) -> ListenerId;

    /// 移除监听器
    fn remove_service_listener(&self, id: ListenerId) -> bool;
}

/// 可为空的注册句柄
///
/// 注入到组件实例中，未注册时为空句柄，对空句柄的操作都是空操作。
#[derive(Clone, Default)]
pub struct RegistrationRef(Option<Arc<dyn ServiceRegistration>>);

impl RegistrationRef {
    /// 包装一个注册句柄
    pub fn new(registration: Arc<dyn ServiceRegistration>) -> Self {
        Self(Some(registration))
    }

    /// 空句柄
    pub fn null() -> Self {
        Self(None)
    }

    /// 是否为空句柄
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// 当前的服务引用
    pub fn reference(&self) -> Option<ServiceReference> {
        self.0.as_ref().and_then(|r| r.reference().ok())
    }

    /// 修改服务属性
    pub fn set_properties(&self, properties: Properties) -> Result<(), RegistryError> {
        match &self.0 {
            Some(registration) => registration.set_properties(properties),
            None => Ok(()),
        }
    }

    /// 注销服务
    pub fn unregister(&self) -> Result<(), RegistryError> {
        match &self.0 {
            Some(registration) => registration.unregister(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for RegistrationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reference() {
            Some(reference) => write!(f, "RegistrationRef({})", reference),
            None => f.write_str("RegistrationRef(null)"),
        }
    }
}
