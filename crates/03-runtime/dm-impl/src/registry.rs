//! 内存服务注册表
//!
//! 事件在触发操作的线程上同步分发，分发时不持有注册表内部的任何锁。

use dashmap::DashMap;
use dm_abstractions::{
    ListenerId, ServiceEvent, ServiceListener, ServiceObject, ServiceRegistration, ServiceRegistry,
};
use dm_common::{
    properties, IdSequence, Properties, RegistryError, RegistryResult, ServiceId, ServiceReference,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// 已注册的服务
struct ServiceEntry {
    /// 当前引用
    reference: ServiceReference,
    /// 服务对象
    object: ServiceObject,
}

struct RegistryInner {
    /// 服务 ID 序列
    service_ids: IdSequence,
    /// 监听器 ID 序列
    listener_ids: IdSequence,
    /// 已注册的服务
    services: DashMap<ServiceId, ServiceEntry>,
    /// 服务事件监听器
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ServiceListener>)>>,
}

impl RegistryInner {
    fn fire(&self, event: ServiceEvent) {
        let listeners: Vec<Arc<dyn ServiceListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener.service_changed(&event);
        }
    }

    fn reference(&self, id: ServiceId) -> RegistryResult<ServiceReference> {
        self.services
            .get(&id)
            .map(|entry| entry.reference.clone())
            .ok_or(RegistryError::Unregistered { service_id: id })
    }
}

/// 内存服务注册表
///
/// 克隆后共享同一份注册数据。
#[derive(Clone)]
pub struct InMemoryServiceRegistry {
    inner: Arc<RegistryInner>,
}

impl InMemoryServiceRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                service_ids: IdSequence::new(),
                listener_ids: IdSequence::new(),
                services: DashMap::new(),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// 已注册的服务数量
    pub fn service_count(&self) -> usize {
        self.inner.services.len()
    }

    /// 监听器数量
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// 所有服务引用，按 ID 排序
    pub fn all_references(&self) -> Vec<ServiceReference> {
        let mut references: Vec<ServiceReference> = self
            .inner
            .services
            .iter()
            .map(|entry| entry.reference.clone())
            .collect();
        references.sort_by_key(|r| r.id);
        references
    }
}

impl Default for InMemoryServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry for InMemoryServiceRegistry {
    fn register_service(
        &self,
        bundle_id: u64,
        interfaces: &[String],
        service: ServiceObject,
        mut props: Properties,
    ) -> Result<Arc<dyn ServiceRegistration>, RegistryError> {
        if interfaces.is_empty() {
            return Err(RegistryError::InvalidRegistration {
                message: "至少需要一个服务接口".to_string(),
            });
        }

        let id = self.inner.service_ids.next();
        props.insert(properties::SERVICE_ID.to_string(), id.into());
        props.insert(
            properties::OBJECT_CLASS.to_string(),
            serde_json::Value::from(interfaces.to_vec()),
        );
        let reference = ServiceReference {
            id,
            bundle_id,
            interfaces: interfaces.into(),
            properties: props,
        };

        self.inner.services.insert(
            id,
            ServiceEntry {
                reference: reference.clone(),
                object: service,
            },
        );
        info!("注册服务: {}", reference);
        self.inner.fire(ServiceEvent::Registered(reference));

        Ok(Arc::new(Registration {
            id,
            registry: Arc::downgrade(&self.inner),
            unregistered: AtomicBool::new(false),
        }))
    }

    fn get_service_references(&self, interface: &str) -> Vec<ServiceReference> {
        let mut references: Vec<ServiceReference> = self
            .inner
            .services
            .iter()
            .filter(|entry| entry.reference.provides(interface))
            .map(|entry| entry.reference.clone())
            .collect();
        references.sort_by(ServiceReference::priority_cmp);
        references
    }

    fn get_service(&self, reference: &ServiceReference) -> Option<ServiceObject> {
        self.inner
            .services
            .get(&reference.id)
            .map(|entry| Arc::clone(&entry.object))
    }

    fn add_service_listener(&self, listener: Arc<dyn ServiceListener>) -> ListenerId {
        let id = self.inner.listener_ids.next();
        self.inner.listeners.write().push((id, listener));
        id
    }

    fn remove_service_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }
}

/// 注册句柄
struct Registration {
    id: ServiceId,
    registry: Weak<RegistryInner>,
    unregistered: AtomicBool,
}

impl Registration {
    fn registry(&self) -> RegistryResult<Arc<RegistryInner>> {
        if self.unregistered.load(Ordering::SeqCst) {
            return Err(RegistryError::Unregistered {
                service_id: self.id,
            });
        }
        self.registry.upgrade().ok_or(RegistryError::Unregistered {
            service_id: self.id,
        })
    }
}

impl ServiceRegistration for Registration {
    fn reference(&self) -> RegistryResult<ServiceReference> {
        self.registry()?.reference(self.id)
    }

    fn set_properties(&self, mut props: Properties) -> RegistryResult<()> {
        let registry = self.registry()?;
        let (reference, previous) = {
            let mut entry = registry
                .services
                .get_mut(&self.id)
                .ok_or(RegistryError::Unregistered {
                    service_id: self.id,
                })?;
            props.insert(properties::SERVICE_ID.to_string(), self.id.into());
            props.insert(
                properties::OBJECT_CLASS.to_string(),
                serde_json::Value::from(entry.reference.interfaces.to_vec()),
            );
            let previous = std::mem::replace(&mut entry.reference.properties, props);
            (entry.reference.clone(), previous)
        };
        debug!("服务属性已更新: {}", reference);
        registry.fire(ServiceEvent::Modified {
            reference,
            previous,
        });
        Ok(())
    }

    fn unregister(&self) -> RegistryResult<()> {
        let registry = self.registry()?;
        if self.unregistered.swap(true, Ordering::SeqCst) {
            return Err(RegistryError::Unregistered {
                service_id: self.id,
            });
        }
        let reference = registry.reference(self.id)?;
        registry.fire(ServiceEvent::Unregistering(reference.clone()));
        registry.services.remove(&self.id);
        info!("注销服务: {}", reference);
        Ok(())
    }
}
