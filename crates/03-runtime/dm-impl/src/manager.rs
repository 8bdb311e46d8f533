//! 依赖管理器
//!
//! 持有 bundle 上下文、组件 ID 序列和受管组件列表，
//! 同时是依赖和装饰器的工厂入口。

use crate::component::Component;
use crate::decorator::{self, FilterService, UpdateCallback};
use crate::dependencies::{
    ConfigurationDependency, ConfigurationDependencyBuilder, ServiceDependency,
    ServiceDependencyBuilder, ToggleDependency, ToggleDependencyBuilder,
};
use dm_abstractions::{BundleContext, ComponentDeclaration, Instance};
use dm_common::{ComponentId, IdSequence, Properties, ServiceReference};
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// 可以交给依赖管理器启停的组件
pub trait ManagedComponent: Send + Sync {
    /// 组件 ID
    fn id(&self) -> ComponentId;

    /// 启动
    fn start(&self);

    /// 停止
    fn stop(&self);

    /// 诊断视图
    fn declaration(&self) -> ComponentDeclaration;
}

impl ManagedComponent for Component {
    fn id(&self) -> ComponentId {
        (**self).id()
    }

    fn start(&self) {
        (**self).start();
    }

    fn stop(&self) {
        (**self).stop();
    }

    fn declaration(&self) -> ComponentDeclaration {
        (**self).declaration()
    }
}

struct ManagerInner {
    /// bundle 上下文
    context: BundleContext,
    /// 组件 ID 序列
    ids: IdSequence,
    /// 受管组件，按加入顺序
    components: RwLock<Vec<Arc<dyn ManagedComponent>>>,
}

/// 依赖管理器
///
/// 克隆后指向同一个管理器。
#[derive(Clone)]
pub struct DependencyManager {
    inner: Arc<ManagerInner>,
}

/// 管理器的弱引用，组件通过它回到所属管理器
#[derive(Clone, Default)]
pub(crate) struct WeakManager(Weak<ManagerInner>);

impl WeakManager {
    pub(crate) fn upgrade(&self) -> Option<DependencyManager> {
        self.0.upgrade().map(|inner| DependencyManager { inner })
    }
}

impl DependencyManager {
    /// 创建新的依赖管理器
    pub fn new(context: BundleContext) -> Self {
        info!(
            "创建依赖管理器: {} (bundle {})",
            context.symbolic_name(),
            context.bundle_id()
        );
        Self {
            inner: Arc::new(ManagerInner {
                context,
                ids: IdSequence::new(),
                components: RwLock::new(Vec::new()),
            }),
        }
    }

    /// bundle 上下文
    pub fn context(&self) -> &BundleContext {
        &self.inner.context
    }

    pub(crate) fn downgrade(&self) -> WeakManager {
        WeakManager(Arc::downgrade(&self.inner))
    }

    pub(crate) fn next_id(&self) -> ComponentId {
        self.inner.ids.next_component_id()
    }

    /// 创建一个尚未加入管理器的组件
    pub fn create_component(&self) -> Component {
        Component::new(self.next_id(), self.inner.context.clone(), self.downgrade())
    }

    /// 加入并启动组件
    pub fn add<C>(&self, component: C)
    where
        C: ManagedComponent + 'static,
    {
        let component: Arc<dyn ManagedComponent> = Arc::new(component);
        info!("注册组件: {}", component.id());
        self.inner.components.write().push(Arc::clone(&component));
        component.start();
    }

    /// 停止并移除组件，返回是否找到
    pub fn remove(&self, id: ComponentId) -> bool {
        let removed = {
            let mut components = self.inner.components.write();
            components
                .iter()
                .position(|c| c.id() == id)
                .map(|position| components.remove(position))
        };
        match removed {
            Some(component) => {
                info!("移除组件: {}", id);
                component.stop();
                true
            }
            None => {
                debug!("组件不在管理器中: {}", id);
                false
            }
        }
    }

    /// 受管组件
    pub fn components(&self) -> Vec<Arc<dyn ManagedComponent>> {
        self.inner.components.read().clone()
    }

    /// 受管组件数量
    pub fn len(&self) -> usize {
        self.inner.components.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 所有组件的诊断视图，按 `(bundle, id)` 排序
    pub fn declarations(&self) -> Vec<ComponentDeclaration> {
        let mut declarations: Vec<ComponentDeclaration> =
            self.components().iter().map(|c| c.declaration()).collect();
        declarations.sort_by_key(|d| (d.bundle_id, d.id));
        declarations
    }

    /// 按加入的逆序停止并移除所有组件
    pub fn clear(&self) {
        let components = std::mem::take(&mut *self.inner.components.write());
        info!("清空依赖管理器，共 {} 个组件", components.len());
        for component in components.iter().rev() {
            component.stop();
        }
    }

    // ----- 依赖工厂 -----

    /// 服务依赖构建器
    pub fn create_service_dependency(&self, interface: impl Into<String>) -> ServiceDependencyBuilder {
        ServiceDependency::builder(interface)
    }

    /// 配置依赖构建器
    pub fn create_configuration_dependency(
        &self,
        pid: impl Into<String>,
    ) -> ConfigurationDependencyBuilder {
        ConfigurationDependency::builder(pid)
    }

    /// 开关依赖构建器
    pub fn create_toggle_dependency(&self) -> ToggleDependencyBuilder {
        ToggleDependency::builder()
    }

    // ----- 装饰器工厂 -----

    /// 切面服务
    ///
    /// 为 `interface` 的每个原始服务创建一个排名为 `ranking` 的切面组件，
    /// 原始服务注入到切面实例中类型为 `V` 的字段。
    pub fn create_aspect_service<V>(&self, interface: impl Into<String>, ranking: i64) -> FilterService
    where
        V: Any + Send + Sync,
    {
        decorator::aspect_service::<V>(self, interface.into(), ranking)
    }

    /// 适配器服务
    ///
    /// 为 `adaptee` 接口中满足 `filter` 的每个服务创建一个适配器组件，
    /// 被适配的服务注入到适配器实例中类型为 `V` 的字段。
    pub fn create_adapter_service<V, F>(&self, adaptee: impl Into<String>, filter: F) -> FilterService
    where
        V: Any + Send + Sync,
        F: Fn(&ServiceReference) -> bool + Send + Sync + 'static,
    {
        decorator::adapter_service::<V>(self, adaptee.into(), Arc::new(filter))
    }

    /// 工厂配置适配器服务
    ///
    /// 每个工厂配置对应一个组件，配置更新时在调用线程上执行 `update`。
    pub fn create_factory_configuration_adapter_service<F>(
        &self,
        factory_pid: impl Into<String>,
        update: F,
        propagate: bool,
    ) -> FilterService
    where
        F: Fn(&Instance, &Properties) -> dm_common::CallbackResult + Send + Sync + 'static,
    {
        let update: UpdateCallback = Arc::new(update);
        decorator::factory_configuration_adapter_service(self, factory_pid.into(), update, propagate)
    }
}

impl fmt::Debug for DependencyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyManager")
            .field("bundle", &self.inner.context.symbolic_name())
            .field("components", &self.len())
            .finish()
    }
}
