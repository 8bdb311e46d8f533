//! 测试夹具：内存注册表、同步配置管理服务和几个记录事件的组件实现

use crate::manager::DependencyManager;
use crate::registry::InMemoryServiceRegistry;
use dm_abstractions::{
    BundleContext, ComponentContext, ComponentStateListener, ConfigurationAdmin, InjectionTable,
    Injectable, Lifecycle, ManagedService, ManagedServiceFactory, ServiceRegistration,
    ServiceRegistry,
};
use dm_common::{CallbackResult, ConfigError, Properties};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub(crate) type Events = Arc<Mutex<Vec<String>>>;

pub(crate) fn events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

/// 取出并清空已记录的事件
pub(crate) fn take(events: &Events) -> Vec<String> {
    std::mem::take(&mut *events.lock())
}

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub(crate) struct Fixture {
    pub(crate) manager: DependencyManager,
    pub(crate) registry: InMemoryServiceRegistry,
    pub(crate) admin: Arc<FakeConfigurationAdmin>,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        init_tracing();
        let registry = InMemoryServiceRegistry::new();
        let admin = Arc::new(FakeConfigurationAdmin::default());
        let context = BundleContext::new(1, "dm-test", Arc::new(registry.clone()))
            .with_configuration_admin(admin.clone());
        Self {
            manager: DependencyManager::new(context),
            registry,
            admin,
        }
    }

    /// 以另一个 bundle 的身份注册服务
    pub(crate) fn register<T>(&self, interface: &str, service: T, props: Properties) -> Arc<dyn ServiceRegistration>
    where
        T: Send + Sync + 'static,
    {
        self.registry
            .register_service(7, &[interface.to_string()], Arc::new(service), props)
            .expect("注册服务应该成功")
    }

    /// 某个接口当前优先级最高的服务引用
    pub(crate) fn best(&self, interface: &str) -> Option<dm_common::ServiceReference> {
        self.registry
            .get_service_references(interface)
            .into_iter()
            .next()
    }
}

/// 同步分发的配置管理服务
#[derive(Default)]
pub(crate) struct FakeConfigurationAdmin {
    /// pid -> (工厂 PID, 配置)
    configs: Mutex<BTreeMap<String, (Option<String>, Properties)>>,
    services: Mutex<Vec<(String, Arc<dyn ManagedService>)>>,
    factories: Mutex<Vec<(String, Arc<dyn ManagedServiceFactory>)>>,
    generated: AtomicU64,
}

impl FakeConfigurationAdmin {
    fn services_for(&self, pid: &str) -> Vec<Arc<dyn ManagedService>> {
        self.services
            .lock()
            .iter()
            .filter(|(p, _)| p == pid)
            .map(|(_, s)| Arc::clone(s))
            .collect()
    }

    fn factories_for(&self, factory_pid: &str) -> Vec<Arc<dyn ManagedServiceFactory>> {
        self.factories
            .lock()
            .iter()
            .filter(|(p, _)| p == factory_pid)
            .map(|(_, f)| Arc::clone(f))
            .collect()
    }

    fn store_factory(&self, factory_pid: &str, pid: String, props: Properties) -> Result<String, ConfigError> {
        self.configs
            .lock()
            .insert(pid.clone(), (Some(factory_pid.to_string()), props.clone()));
        for factory in self.factories_for(factory_pid) {
            factory.updated(&pid, &props)?;
        }
        Ok(pid)
    }
}

impl ConfigurationAdmin for FakeConfigurationAdmin {
    fn update(&self, pid: &str, properties: Properties) -> Result<(), ConfigError> {
        self.configs
            .lock()
            .insert(pid.to_string(), (None, properties.clone()));
        for service in self.services_for(pid) {
            service.updated(Some(&properties))?;
        }
        Ok(())
    }

    fn create_factory_configuration(&self, factory_pid: &str, properties: Properties) -> Result<String, ConfigError> {
        let n = self.generated.fetch_add(1, Ordering::SeqCst);
        self.store_factory(factory_pid, format!("{factory_pid}.{n}"), properties)
    }

    fn update_factory_configuration(
        &self,
        factory_pid: &str,
        name: &str,
        properties: Properties,
    ) -> Result<String, ConfigError> {
        self.store_factory(factory_pid, format!("{factory_pid}.{name}"), properties)
    }

    fn delete(&self, pid: &str) -> Result<(), ConfigError> {
        let (factory_pid, _) = self
            .configs
            .lock()
            .remove(pid)
            .ok_or_else(|| ConfigError::NotFound { pid: pid.to_string() })?;
        match factory_pid {
            Some(factory_pid) => {
                for factory in self.factories_for(&factory_pid) {
                    factory.deleted(pid);
                }
            }
            None => {
                for service in self.services_for(pid) {
                    service.updated(None)?;
                }
            }
        }
        Ok(())
    }

    fn get(&self, pid: &str) -> Option<Properties> {
        self.configs.lock().get(pid).map(|(_, props)| props.clone())
    }

    fn list(&self) -> Vec<String> {
        self.configs.lock().keys().cloned().collect()
    }

    fn add_managed_service(&self, pid: &str, service: Arc<dyn ManagedService>) -> Result<(), ConfigError> {
        self.services
            .lock()
            .push((pid.to_string(), Arc::clone(&service)));
        let current = self
            .configs
            .lock()
            .get(pid)
            .filter(|(factory, _)| factory.is_none())
            .map(|(_, props)| props.clone());
        match current {
            Some(props) => service.updated(Some(&props)),
            None => Ok(()),
        }
    }

    fn remove_managed_service(&self, pid: &str, service: &Arc<dyn ManagedService>) -> bool {
        let mut services = self.services.lock();
        let before = services.len();
        services.retain(|(p, s)| !(p == pid && Arc::ptr_eq(s, service)));
        services.len() != before
    }

    fn add_managed_service_factory(
        &self,
        factory_pid: &str,
        factory: Arc<dyn ManagedServiceFactory>,
    ) -> Result<(), ConfigError> {
        self.factories
            .lock()
            .push((factory_pid.to_string(), Arc::clone(&factory)));
        let existing: Vec<(String, Properties)> = self
            .configs
            .lock()
            .iter()
            .filter(|(_, (owner, _))| owner.as_deref() == Some(factory_pid))
            .map(|(pid, (_, props))| (pid.clone(), props.clone()))
            .collect();
        for (pid, props) in existing {
            factory.updated(&pid, &props)?;
        }
        Ok(())
    }

    fn remove_managed_service_factory(&self, factory_pid: &str, factory: &Arc<dyn ManagedServiceFactory>) -> bool {
        let mut factories = self.factories.lock();
        let before = factories.len();
        factories.retain(|(p, f)| !(p == factory_pid && Arc::ptr_eq(f, factory)));
        factories.len() != before
    }
}

/// 日志服务
pub(crate) struct LogService {
    pub(crate) name: String,
}

impl LogService {
    pub(crate) fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

/// 记录生命周期回调的消费者
pub(crate) struct Consumer {
    pub(crate) events: Events,
    pub(crate) log: RwLock<Option<Arc<LogService>>>,
    pub(crate) context: RwLock<Option<Arc<BundleContext>>>,
}

impl Consumer {
    pub(crate) fn new(events: Events) -> Self {
        Self {
            events,
            log: RwLock::new(None),
            context: RwLock::new(None),
        }
    }

    pub(crate) fn log_name(&self) -> Option<String> {
        self.log.read().as_ref().map(|log| log.name.clone())
    }

    fn record(&self, event: &str) -> CallbackResult {
        self.events.lock().push(event.to_string());
        Ok(())
    }
}

impl Lifecycle for Consumer {
    fn init(&self, _ctx: &dyn ComponentContext) -> CallbackResult {
        self.record("init")
    }

    fn start(&self, _ctx: &dyn ComponentContext) -> CallbackResult {
        self.record("start")
    }

    fn stop(&self, _ctx: &dyn ComponentContext) -> CallbackResult {
        self.record("stop")
    }

    fn destroy(&self, _ctx: &dyn ComponentContext) -> CallbackResult {
        self.record("destroy")
    }
}

impl Injectable for Consumer {
    fn injection_table() -> InjectionTable<Self> {
        InjectionTable::new()
            .inject::<LogService, _>(|c: &Consumer, v| *c.log.write() = v)
            .inject::<BundleContext, _>(|c: &Consumer, v| *c.context.write() = v)
    }
}

/// 记录状态变化的监听器
pub(crate) struct ListenerRecorder {
    pub(crate) events: Events,
}

impl ComponentStateListener for ListenerRecorder {
    fn starting(&self, component: &dyn ComponentContext) {
        self.events.lock().push(format!("starting {}", component.name()));
    }

    fn started(&self, component: &dyn ComponentContext) {
        self.events.lock().push(format!("started {}", component.name()));
    }

    fn stopping(&self, component: &dyn ComponentContext) {
        self.events.lock().push(format!("stopping {}", component.name()));
    }

    fn stopped(&self, component: &dyn ComponentContext) {
        self.events.lock().push(format!("stopped {}", component.name()));
    }
}
