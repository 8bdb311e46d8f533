//! 装饰服务门面
//!
//! [`FilterService`] 对外表现为一个普通组件，内部组件的实例是装饰器本身。
//! 组件配置先写入模板，装饰器为每个键创建组件时从模板复制。

use super::keyed::KeyedFanOut;
use crate::component::{Component, ComponentConfig};
use crate::manager::{DependencyManager, ManagedComponent, WeakManager};
use dm_abstractions::{
    BundleContext, Callbacks, ComponentContext, ComponentDeclaration, ComponentStateListener,
    Dependency, Injectable, Instance, Lifecycle, ManagedServiceFactory, ServiceObject,
};
use dm_common::{
    BoxError, CallbackError, CallbackResult, ComponentError, ComponentId, ComponentResult,
    DecoratorResult, Properties, ServiceId, ServiceReference, TypeKey,
};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 装饰器种类
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoratorKind {
    /// 切面：为接口的每个原始服务注册一个更高排名的代理
    Aspect { interface: String, ranking: i64 },
    /// 适配器：为被适配接口的每个服务提供新的接口
    Adapter { adaptee: String },
    /// 工厂配置适配器：每个工厂配置一个组件
    FactoryConfiguration { factory_pid: String, propagate: bool },
}

impl fmt::Display for DecoratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aspect { interface, ranking } => write!(f, "aspect({interface}, {ranking})"),
            Self::Adapter { adaptee } => write!(f, "adapter({adaptee})"),
            Self::FactoryConfiguration { factory_pid, .. } => {
                write!(f, "factory-configuration({factory_pid})")
            }
        }
    }
}

/// 被跟踪服务的参数
#[derive(Clone)]
pub(crate) struct ServiceParams {
    pub(crate) reference: ServiceReference,
    pub(crate) service: ServiceObject,
}

pub(crate) enum FanOut {
    Service(KeyedFanOut<ServiceId, ServiceParams>),
    Configuration(KeyedFanOut<String, Properties>),
}

/// 装饰器和创建策略共享的状态
pub(crate) struct DecoratorShared {
    pub(crate) manager: WeakManager,
    /// 从未启动的模板组件，只用来保存配置和状态监听器
    pub(crate) template: Component,
    /// 用户添加到门面上的依赖
    pub(crate) dependencies: RwLock<Vec<Arc<dyn Dependency>>>,
}

impl DecoratorShared {
    pub(crate) fn new(manager: &DependencyManager) -> Arc<Self> {
        Arc::new(Self {
            manager: manager.downgrade(),
            template: Component::new(ComponentId(0), manager.context().clone(), manager.downgrade()),
            dependencies: RwLock::new(Vec::new()),
        })
    }

    /// 按模板创建一个新组件
    pub(crate) fn build_component(&self) -> ComponentResult<Component> {
        let manager = self.manager.upgrade().ok_or_else(|| ComponentError::Released {
            component: self.template.name(),
        })?;
        let component = manager.create_component();
        component.apply_config(self.template_config())?;
        for listener in self.template.state_listeners() {
            component.add_state_listener(listener);
        }
        Ok(component)
    }

    pub(crate) fn template_config(&self) -> ComponentConfig {
        self.template.config_snapshot()
    }

    pub(crate) fn dependencies(&self) -> Vec<Arc<dyn Dependency>> {
        self.dependencies.read().clone()
    }
}

/// 内部组件的实例
pub(crate) struct Decorator {
    kind: DecoratorKind,
    fan_out: FanOut,
    factory_target: Mutex<Option<Arc<dyn ManagedServiceFactory>>>,
}

impl Decorator {
    pub(crate) fn new(kind: DecoratorKind, fan_out: FanOut) -> Arc<Self> {
        Arc::new(Self {
            kind,
            fan_out,
            factory_target: Mutex::new(None),
        })
    }

    /// 从回调实例中取出装饰器
    pub(crate) fn of(instance: &Instance) -> Result<Arc<Self>, CallbackError> {
        instance.downcast::<Self>().ok_or_else(|| {
            CallbackError::msg(
                "decorator",
                format!("实例不是装饰器: {}", instance.type_name()),
            )
        })
    }

    pub(crate) fn service_added(&self, reference: &ServiceReference, service: &ServiceObject) -> DecoratorResult<()> {
        if let FanOut::Service(fan_out) = &self.fan_out {
            fan_out.added(
                reference.id,
                ServiceParams {
                    reference: reference.clone(),
                    service: Arc::clone(service),
                },
            )?;
        }
        Ok(())
    }

    pub(crate) fn service_changed(&self, reference: &ServiceReference, service: &ServiceObject) -> DecoratorResult<()> {
        if let FanOut::Service(fan_out) = &self.fan_out {
            fan_out.updated(
                reference.id,
                ServiceParams {
                    reference: reference.clone(),
                    service: Arc::clone(service),
                },
            )?;
        }
        Ok(())
    }

    pub(crate) fn service_removed(&self, reference: &ServiceReference) -> DecoratorResult<()> {
        if let FanOut::Service(fan_out) = &self.fan_out {
            fan_out.removed(&reference.id)?;
        }
        Ok(())
    }

    pub(crate) fn configuration_updated(&self, pid: &str, settings: &Properties) -> DecoratorResult<()> {
        if let FanOut::Configuration(fan_out) = &self.fan_out {
            fan_out.updated(pid.to_string(), settings.clone())?;
        }
        Ok(())
    }

    pub(crate) fn configuration_deleted(&self, pid: &str) -> DecoratorResult<()> {
        if let FanOut::Configuration(fan_out) = &self.fan_out {
            fan_out.removed(&pid.to_string())?;
        }
        Ok(())
    }

    fn components(&self) -> Vec<Component> {
        match &self.fan_out {
            FanOut::Service(fan_out) => fan_out.components(),
            FanOut::Configuration(fan_out) => fan_out.components(),
        }
    }

    fn set_service_properties(&self, props: &Properties) {
        match &self.fan_out {
            FanOut::Service(fan_out) => fan_out.set_service_properties(props),
            FanOut::Configuration(fan_out) => fan_out.set_service_properties(props),
        }
    }

    fn add_state_listener(&self, listener: Arc<dyn ComponentStateListener>) {
        match &self.fan_out {
            FanOut::Service(fan_out) => fan_out.add_state_listener(listener),
            FanOut::Configuration(fan_out) => fan_out.add_state_listener(listener),
        }
    }

    fn remove_state_listener(&self, listener: &Arc<dyn ComponentStateListener>) {
        match &self.fan_out {
            FanOut::Service(fan_out) => fan_out.remove_state_listener(listener),
            FanOut::Configuration(fan_out) => fan_out.remove_state_listener(listener),
        }
    }

    fn add_dependency(&self, dependency: &Arc<dyn Dependency>) {
        match &self.fan_out {
            FanOut::Service(fan_out) => fan_out.add_dependency(dependency),
            FanOut::Configuration(fan_out) => fan_out.add_dependency(dependency),
        }
    }

    fn remove_dependency(&self, dependency: &Arc<dyn Dependency>) {
        match &self.fan_out {
            FanOut::Service(fan_out) => fan_out.remove_dependency(dependency),
            FanOut::Configuration(fan_out) => fan_out.remove_dependency(dependency),
        }
    }

    fn stop_all(&self) {
        match &self.fan_out {
            FanOut::Service(fan_out) => fan_out.stop_all(),
            FanOut::Configuration(fan_out) => fan_out.stop_all(),
        }
    }
}

impl Lifecycle for Decorator {
    fn start(&self, ctx: &dyn ComponentContext) -> CallbackResult {
        let DecoratorKind::FactoryConfiguration { factory_pid, .. } = &self.kind else {
            return Ok(());
        };
        let Some(decorator) = ctx.instance().and_then(|i| i.downcast::<Self>()) else {
            return Err(CallbackError::msg("start", "装饰器实例不可用"));
        };
        let context = ctx.bundle_context();
        let admin = context
            .configuration_admin()
            .ok_or_else(|| CallbackError::msg("start", "bundle 上下文中没有配置管理服务"))?;

        let target: Arc<dyn ManagedServiceFactory> = Arc::new(FactoryTarget {
            factory_pid: factory_pid.clone(),
            decorator: Arc::downgrade(&decorator),
        });
        *self.factory_target.lock() = Some(Arc::clone(&target));
        admin
            .add_managed_service_factory(factory_pid, target)
            .map_err(|e| CallbackError::new("start", e))?;
        info!("工厂配置适配器已登记: {}", factory_pid);
        Ok(())
    }

    fn stop(&self, ctx: &dyn ComponentContext) -> CallbackResult {
        let target = self.factory_target.lock().take();
        if let (Some(target), DecoratorKind::FactoryConfiguration { factory_pid, .. }) =
            (target, &self.kind)
        {
            if let Some(admin) = ctx.bundle_context().configuration_admin() {
                admin.remove_managed_service_factory(factory_pid, &target);
            }
        }
        self.stop_all();
        Ok(())
    }
}

impl Injectable for Decorator {}

/// 以受管服务工厂身份接收工厂配置
struct FactoryTarget {
    factory_pid: String,
    decorator: std::sync::Weak<Decorator>,
}

impl ManagedServiceFactory for FactoryTarget {
    fn name(&self) -> String {
        self.factory_pid.clone()
    }

    fn updated(&self, pid: &str, properties: &Properties) -> Result<(), dm_common::ConfigError> {
        let Some(decorator) = self.decorator.upgrade() else {
            return Ok(());
        };
        decorator
            .configuration_updated(pid, properties)
            .map_err(|e| dm_common::ConfigError::InvalidProperties {
                message: e.to_string(),
            })
    }

    fn deleted(&self, pid: &str) {
        if let Some(decorator) = self.decorator.upgrade() {
            if let Err(e) = decorator.configuration_deleted(pid) {
                warn!("删除工厂配置 {} 失败: {}", pid, e);
            }
        }
    }
}

/// 装饰服务门面
pub struct FilterService {
    component: Component,
    shared: Arc<DecoratorShared>,
    decorator: Arc<Decorator>,
}

impl FilterService {
    /// 组装内部组件，`tracker` 为跟踪被装饰服务的内部依赖
    pub(crate) fn new(
        manager: &DependencyManager,
        shared: Arc<DecoratorShared>,
        decorator: Arc<Decorator>,
        tracker: Option<Arc<dyn Dependency>>,
    ) -> Self {
        let component = manager.create_component();
        let instance = Instance::new(Arc::clone(&decorator));
        component.configure_unchecked(|config| {
            config.implementation = crate::component::Implementation::Instance(instance);
            config.callbacks = Callbacks::lifecycle();
        });
        if let Some(tracker) = tracker {
            if let Err(e) = component.add(tracker) {
                warn!("装饰器 {} 添加内部依赖失败: {}", decorator.kind, e);
            }
        }
        debug!("创建装饰服务: {} ({})", decorator.kind, component.id());
        Self {
            component,
            shared,
            decorator,
        }
    }

    /// 装饰器种类
    pub fn kind(&self) -> &DecoratorKind {
        &self.decorator.kind
    }

    /// 内部组件
    pub fn component(&self) -> &Component {
        &self.component
    }

    /// 装饰器创建的组件，按 ID 排序
    pub fn components(&self) -> Vec<Component> {
        self.decorator.components()
    }

    /// 用户添加的依赖
    pub fn dependencies(&self) -> Vec<Arc<dyn Dependency>> {
        self.shared.dependencies()
    }

    fn ensure_inactive(&self) -> ComponentResult<()> {
        if !self.component.is_started() {
            Ok(())
        } else {
            Err(ComponentError::active(self.decorator.kind.to_string()))
        }
    }

    pub fn set_interfaces<I, S>(&self, interfaces: I, properties: Properties) -> ComponentResult<&Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_inactive()?;
        self.shared.template.set_interfaces(interfaces, properties)?;
        Ok(self)
    }

    pub fn set_interface(&self, interface: &str, properties: Properties) -> ComponentResult<&Self> {
        self.set_interfaces([interface], properties)
    }

    pub fn set_implementation<T>(&self) -> ComponentResult<&Self>
    where
        T: Injectable + Default,
    {
        self.ensure_inactive()?;
        self.shared.template.set_implementation::<T>()?;
        Ok(self)
    }

    pub fn set_implementation_with<T, F>(&self, create: F) -> ComponentResult<&Self>
    where
        T: Injectable,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.ensure_inactive()?;
        self.shared.template.set_implementation_with(create)?;
        Ok(self)
    }

    pub fn set_constructor<F>(&self, constructor: F) -> ComponentResult<&Self>
    where
        F: Fn() -> Result<Instance, BoxError> + Send + Sync + 'static,
    {
        self.ensure_inactive()?;
        self.shared.template.set_constructor(constructor)?;
        Ok(self)
    }

    pub fn set_factory<F>(&self, factory: F) -> ComponentResult<&Self>
    where
        F: Fn(&dyn ComponentContext) -> Result<Instance, BoxError> + Send + Sync + 'static,
    {
        self.ensure_inactive()?;
        self.shared.template.set_factory(factory)?;
        Ok(self)
    }

    pub fn set_composition<F>(&self, composition: F) -> ComponentResult<&Self>
    where
        F: Fn(&Instance) -> Vec<Instance> + Send + Sync + 'static,
    {
        self.ensure_inactive()?;
        self.shared.template.set_composition(composition)?;
        Ok(self)
    }

    pub fn set_callbacks(&self, callbacks: Callbacks) -> ComponentResult<&Self> {
        self.ensure_inactive()?;
        self.shared.template.set_callbacks(callbacks)?;
        Ok(self)
    }

    pub fn set_callback_instance(&self, instance: Instance) -> ComponentResult<&Self> {
        self.ensure_inactive()?;
        self.shared.template.set_callback_instance(instance)?;
        Ok(self)
    }

    pub fn set_export<T, S, F>(&self, export: F) -> ComponentResult<&Self>
    where
        T: Any + Send + Sync,
        S: Any + Send + Sync,
        F: Fn(Arc<T>) -> S + Send + Sync + 'static,
    {
        self.ensure_inactive()?;
        self.shared.template.set_export(export)?;
        Ok(self)
    }

    pub fn set_auto_config(&self, key: TypeKey, enabled: bool) -> ComponentResult<&Self> {
        self.ensure_inactive()?;
        self.shared.template.set_auto_config(key, enabled);
        Ok(self)
    }

    pub fn set_auto_config_named(&self, key: TypeKey, name: impl Into<String>) -> ComponentResult<&Self> {
        self.ensure_inactive()?;
        self.shared.template.set_auto_config_named(key, name);
        Ok(self)
    }

    /// 修改服务属性并发布到所有已创建的组件
    pub fn set_service_properties(&self, properties: Properties) -> &Self {
        self.shared.template.set_service_properties(properties.clone());
        self.decorator.set_service_properties(&properties);
        self
    }

    pub fn service_properties(&self) -> Properties {
        self.shared.template.service_properties()
    }

    /// 添加依赖
    ///
    /// 依赖加在内部组件上，新组件创建时复制一份；
    /// 可选依赖还会立即复制到所有已创建的组件上。
    pub fn add(&self, dependency: Arc<dyn Dependency>) -> ComponentResult<&Self> {
        self.component.add(Arc::clone(&dependency))?;
        self.shared.dependencies.write().push(Arc::clone(&dependency));
        if !dependency.is_required() {
            self.decorator.add_dependency(&dependency);
        }
        Ok(self)
    }

    /// 移除依赖
    pub fn remove(&self, dependency: &Arc<dyn Dependency>) -> &Self {
        self.component.remove(dependency);
        self.shared
            .dependencies
            .write()
            .retain(|d| !crate::dependencies::same_dependency(d, dependency));
        if !dependency.is_required() {
            self.decorator.remove_dependency(dependency);
        }
        self
    }

    /// 添加状态监听器，同时作用于已创建和将要创建的组件
    pub fn add_state_listener(&self, listener: Arc<dyn ComponentStateListener>) -> &Self {
        self.shared.template.add_state_listener(Arc::clone(&listener));
        self.decorator.add_state_listener(listener);
        self
    }

    pub fn remove_state_listener(&self, listener: &Arc<dyn ComponentStateListener>) -> &Self {
        self.shared.template.remove_state_listener(listener);
        self.decorator.remove_state_listener(listener);
        self
    }

    pub fn start(&self) {
        self.component.start();
    }

    pub fn stop(&self) {
        self.component.stop();
    }

    pub fn bundle_context(&self) -> &BundleContext {
        self.component.bundle_context()
    }
}

impl Clone for FilterService {
    fn clone(&self) -> Self {
        Self {
            component: self.component.clone(),
            shared: Arc::clone(&self.shared),
            decorator: Arc::clone(&self.decorator),
        }
    }
}

impl ManagedComponent for FilterService {
    fn id(&self) -> ComponentId {
        self.component.id()
    }

    fn start(&self) {
        self.component.start();
    }

    fn stop(&self) {
        self.component.stop();
    }

    fn declaration(&self) -> ComponentDeclaration {
        let mut declaration = self.component.declaration();
        declaration.name = self.decorator.kind.to_string();
        declaration
    }
}

impl fmt::Debug for FilterService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterService")
            .field("kind", &self.decorator.kind)
            .field("component", &self.component.id())
            .field("created", &self.decorator.components().len())
            .finish()
    }
}
