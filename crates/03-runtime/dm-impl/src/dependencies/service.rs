//! 服务依赖
//!
//! 跟踪注册表中某个接口的服务。注册表事件可能来自任意线程，
//! 依赖用自己的串行执行器把它们和组件发起的 added/removed 调用排成一队。

use crate::callback::invoke_guarded;
use crate::executor::SerialExecutor;
use dm_abstractions::{
    Dependency, DependencyService, Instance, ListenerId, ServiceEvent, ServiceListener,
    ServiceObject, ServiceRegistry,
};
use dm_common::{
    properties, CallbackResult, DependencyError, Properties, ServiceId, ServiceReference, TypeKey,
};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// 服务过滤条件
pub type ServiceFilter = Arc<dyn Fn(&ServiceReference) -> bool + Send + Sync>;

/// added / changed / removed 回调
pub type ServiceCallback =
    Arc<dyn Fn(&Instance, &ServiceReference, &ServiceObject) -> CallbackResult + Send + Sync>;

/// swapped 回调：`(实例, 旧引用, 旧服务, 新引用, 新服务)`
pub type SwapCallback = Arc<
    dyn Fn(&Instance, &ServiceReference, &ServiceObject, &ServiceReference, &ServiceObject) -> CallbackResult
        + Send
        + Sync,
>;

#[derive(Clone)]
struct Settings {
    interface: String,
    filter: Option<ServiceFilter>,
    service_id: Option<ServiceId>,
    required: bool,
    instance_bound: bool,
    auto_config: Option<(TypeKey, Option<String>)>,
    propagate: bool,
    added: Option<ServiceCallback>,
    changed: Option<ServiceCallback>,
    removed: Option<ServiceCallback>,
    swapped: Option<SwapCallback>,
}

impl Settings {
    fn matches(&self, reference: &ServiceReference) -> bool {
        reference.provides(&self.interface)
            && self.service_id.map_or(true, |id| id == reference.id)
            && self.filter.as_ref().map_or(true, |filter| filter(reference))
    }
}

#[derive(Clone)]
struct Tracked {
    reference: ServiceReference,
    service: ServiceObject,
}

#[derive(Default)]
struct Tracking {
    owner: Option<Weak<dyn DependencyService>>,
    registry: Option<Arc<dyn ServiceRegistry>>,
    listener: Option<ListenerId>,
    started: bool,
    available: bool,
    /// 按优先级排序
    tracked: Vec<Tracked>,
    /// 已经调用过 added 的服务
    invoked: Vec<Tracked>,
}

impl Tracking {
    fn owner(&self) -> Option<Arc<dyn DependencyService>> {
        self.owner.as_ref().and_then(Weak::upgrade)
    }

    fn is_tracked(&self, id: ServiceId) -> bool {
        self.tracked.iter().any(|t| t.reference.id == id)
    }
}

enum TrackerEvent {
    Open(Arc<dyn DependencyService>),
    Added(Tracked),
    Modified(Tracked),
    Removed(ServiceReference),
    InvokeAdded,
    InvokeRemoved,
    Close,
}

/// 服务依赖
pub struct ServiceDependency {
    settings: Settings,
    tracking: Mutex<Tracking>,
    serial: SerialExecutor<TrackerEvent>,
    self_ref: Weak<ServiceDependency>,
}

impl ServiceDependency {
    /// 创建依赖构建器
    pub fn builder(interface: impl Into<String>) -> ServiceDependencyBuilder {
        ServiceDependencyBuilder::new(interface)
    }

    fn from_settings(settings: Settings) -> Arc<Self> {
        let name = format!("service-dependency-{}", settings.interface);
        Arc::new_cyclic(|weak: &Weak<ServiceDependency>| {
            let target = weak.clone();
            Self {
                settings,
                tracking: Mutex::new(Tracking::default()),
                serial: SerialExecutor::new(name, move |event| {
                    if let Some(dependency) = target.upgrade() {
                        dependency.handle(event);
                    }
                }),
                self_ref: weak.clone(),
            }
        })
    }

    /// 跟踪的接口
    pub fn interface(&self) -> &str {
        &self.settings.interface
    }

    /// 当前跟踪的服务引用，按优先级排序
    pub fn tracked_references(&self) -> Vec<ServiceReference> {
        self.tracking
            .lock()
            .tracked
            .iter()
            .map(|t| t.reference.clone())
            .collect()
    }

    /// 优先级最高的服务
    pub fn service(&self) -> Option<(ServiceReference, ServiceObject)> {
        self.tracking
            .lock()
            .tracked
            .first()
            .map(|t| (t.reference.clone(), Arc::clone(&t.service)))
    }

    fn handle(&self, event: TrackerEvent) {
        match event {
            TrackerEvent::Open(owner) => self.open(owner),
            TrackerEvent::Added(item) => self.on_added(item),
            TrackerEvent::Modified(item) => self.on_modified(item),
            TrackerEvent::Removed(reference) => self.on_removed(&reference),
            TrackerEvent::InvokeAdded => {
                let (owner, tracked) = {
                    let tracking = self.tracking.lock();
                    (tracking.owner(), tracking.tracked.clone())
                };
                if let Some(owner) = owner {
                    for item in &tracked {
                        self.invoke_added_one(owner.as_ref(), item);
                    }
                }
            }
            TrackerEvent::InvokeRemoved => {
                let (owner, invoked) = {
                    let tracking = self.tracking.lock();
                    (tracking.owner(), tracking.invoked.clone())
                };
                if let Some(owner) = owner {
                    for item in &invoked {
                        self.invoke_removed_one(owner.as_ref(), &item.reference);
                    }
                }
            }
            TrackerEvent::Close => self.close(),
        }
    }

    fn open(&self, owner: Arc<dyn DependencyService>) {
        let registry = Arc::clone(owner.bundle_context().registry());
        {
            let mut tracking = self.tracking.lock();
            if tracking.started {
                return;
            }
            tracking.started = true;
            tracking.owner = Some(Arc::downgrade(&owner));
            tracking.registry = Some(Arc::clone(&registry));
        }

        let listener = Arc::new(TrackerListener {
            dependency: self.self_ref.clone(),
        });
        let id = registry.add_service_listener(listener);
        self.tracking.lock().listener = Some(id);
        debug!("组件 {} 开始跟踪服务 {}", owner.name(), self.name());

        for reference in registry.get_service_references(&self.settings.interface) {
            if !self.settings.matches(&reference) {
                continue;
            }
            if let Some(service) = registry.get_service(&reference) {
                self.on_added(Tracked { reference, service });
            }
        }
    }

    fn close(&self) {
        let (registry, listener, tracked) = {
            let mut tracking = self.tracking.lock();
            if !tracking.started {
                return;
            }
            (
                tracking.registry.clone(),
                tracking.listener.take(),
                tracking.tracked.clone(),
            )
        };

        if let (Some(registry), Some(id)) = (registry, listener) {
            registry.remove_service_listener(id);
        }
        for item in tracked.iter().rev() {
            self.on_removed(&item.reference);
        }

        let mut tracking = self.tracking.lock();
        *tracking = Tracking::default();
        debug!("停止跟踪服务 {}", self.name());
    }

    fn on_added(&self, item: Tracked) {
        let (owner, became_available, displaced) = {
            let mut tracking = self.tracking.lock();
            if !tracking.started || tracking.is_tracked(item.reference.id) {
                return;
            }
            let previous_best = tracking.tracked.first().cloned();
            tracking.tracked.push(item.clone());
            tracking
                .tracked
                .sort_by(|a, b| a.reference.priority_cmp(&b.reference));
            let is_best = tracking
                .tracked
                .first()
                .map_or(false, |t| t.reference.id == item.reference.id);
            let became_available = !tracking.available;
            tracking.available = true;
            (
                tracking.owner(),
                became_available,
                previous_best.filter(|_| is_best),
            )
        };
        let Some(owner) = owner else {
            return;
        };
        trace!("服务依赖 {} 新增服务 {}", self.name(), item.reference);

        if became_available {
            if self.settings.required && self.settings.instance_bound && owner.is_instantiated() {
                self.invoke_added_one(owner.as_ref(), &item);
            }
            owner.dependency_available(self);
            if !self.settings.required {
                self.invoke_added_one(owner.as_ref(), &item);
            }
        } else {
            owner.dependency_changed(self);
            if owner.is_instantiated() {
                match (self.settings.swapped.as_ref(), displaced) {
                    (Some(swap), Some(previous)) => {
                        self.invoke_swapped(owner.as_ref(), swap, &previous, &item)
                    }
                    _ => self.invoke_added_one(owner.as_ref(), &item),
                }
            }
        }
    }

    fn on_modified(&self, item: Tracked) {
        let matches = self.settings.matches(&item.reference);
        let tracked = self.tracking.lock().is_tracked(item.reference.id);

        match (tracked, matches) {
            (false, true) => self.on_added(item),
            (true, false) => self.on_removed(&item.reference),
            (false, false) => {}
            (true, true) => {
                let owner = {
                    let mut guard = self.tracking.lock();
                    let tracking = &mut *guard;
                    for entry in tracking
                        .tracked
                        .iter_mut()
                        .chain(tracking.invoked.iter_mut())
                        .filter(|t| t.reference.id == item.reference.id)
                    {
                        *entry = item.clone();
                    }
                    tracking
                        .tracked
                        .sort_by(|a, b| a.reference.priority_cmp(&b.reference));
                    tracking.owner()
                };
                let Some(owner) = owner else {
                    return;
                };
                owner.dependency_changed(self);
                if owner.is_instantiated() {
                    self.invoke_changed(owner.as_ref(), &item);
                }
            }
        }
    }

    fn on_removed(&self, reference: &ServiceReference) {
        let (owner, became_unavailable, removed, successor) = {
            let mut tracking = self.tracking.lock();
            let Some(position) = tracking
                .tracked
                .iter()
                .position(|t| t.reference.id == reference.id)
            else {
                return;
            };
            let removed = tracking.tracked.remove(position);
            let became_unavailable = tracking.tracked.is_empty();
            if became_unavailable {
                tracking.available = false;
            }
            let successor = if position == 0 {
                tracking.tracked.first().cloned()
            } else {
                None
            };
            (tracking.owner(), became_unavailable, removed, successor)
        };
        let Some(owner) = owner else {
            return;
        };
        trace!("服务依赖 {} 移除服务 {}", self.name(), removed.reference);

        if became_unavailable {
            owner.dependency_unavailable(self);
            if !self.settings.required
                || (self.settings.instance_bound && owner.is_instantiated())
            {
                self.invoke_removed_one(owner.as_ref(), &removed.reference);
            }
        } else {
            owner.dependency_changed(self);
            if owner.is_instantiated() {
                match (self.settings.swapped.as_ref(), successor) {
                    (Some(swap), Some(next)) => {
                        self.invoke_swapped(owner.as_ref(), swap, &removed, &next)
                    }
                    _ => self.invoke_removed_one(owner.as_ref(), &removed.reference),
                }
            }
        }
    }

    fn invoke_added_one(&self, owner: &dyn DependencyService, item: &Tracked) {
        let instances = owner.callback_instances();
        if instances.is_empty() {
            return;
        }
        {
            let mut tracking = self.tracking.lock();
            if tracking
                .invoked
                .iter()
                .any(|t| t.reference.id == item.reference.id)
            {
                return;
            }
            tracking.invoked.push(item.clone());
        }
        if let Some(added) = &self.settings.added {
            let name = owner.name();
            for instance in &instances {
                invoke_guarded(&name, "added", || added(instance, &item.reference, &item.service));
            }
        }
    }

    fn invoke_changed(&self, owner: &dyn DependencyService, item: &Tracked) {
        let invoked = self
            .tracking
            .lock()
            .invoked
            .iter()
            .any(|t| t.reference.id == item.reference.id);
        if !invoked {
            return;
        }
        if let Some(changed) = &self.settings.changed {
            let name = owner.name();
            for instance in &owner.callback_instances() {
                invoke_guarded(&name, "changed", || {
                    changed(instance, &item.reference, &item.service)
                });
            }
        }
    }

    fn invoke_removed_one(&self, owner: &dyn DependencyService, reference: &ServiceReference) {
        let item = {
            let mut tracking = self.tracking.lock();
            let Some(position) = tracking
                .invoked
                .iter()
                .position(|t| t.reference.id == reference.id)
            else {
                return;
            };
            tracking.invoked.remove(position)
        };
        if let Some(removed) = &self.settings.removed {
            let name = owner.name();
            for instance in &owner.callback_instances() {
                invoke_guarded(&name, "removed", || {
                    removed(instance, &item.reference, &item.service)
                });
            }
        }
    }

    fn invoke_swapped(
        &self,
        owner: &dyn DependencyService,
        swap: &SwapCallback,
        previous: &Tracked,
        current: &Tracked,
    ) {
        {
            let mut tracking = self.tracking.lock();
            tracking.invoked.retain(|t| {
                t.reference.id != previous.reference.id && t.reference.id != current.reference.id
            });
            tracking.invoked.push(current.clone());
        }
        let name = owner.name();
        for instance in &owner.callback_instances() {
            invoke_guarded(&name, "swapped", || {
                swap(
                    instance,
                    &previous.reference,
                    &previous.service,
                    &current.reference,
                    &current.service,
                )
            });
        }
    }
}

impl Dependency for ServiceDependency {
    fn name(&self) -> String {
        match self.settings.service_id {
            Some(id) => format!("{} (service.id={})", self.settings.interface, id),
            None => self.settings.interface.clone(),
        }
    }

    fn kind(&self) -> &'static str {
        "service"
    }

    fn is_required(&self) -> bool {
        self.settings.required
    }

    fn is_available(&self) -> bool {
        self.tracking.lock().available
    }

    fn is_instance_bound(&self) -> bool {
        self.settings.instance_bound
    }

    fn is_auto_config(&self) -> bool {
        self.settings.auto_config.is_some()
    }

    fn auto_config_type(&self) -> Option<TypeKey> {
        self.settings.auto_config.as_ref().map(|(key, _)| *key)
    }

    fn auto_config_instance(&self) -> Option<ServiceObject> {
        self.tracking
            .lock()
            .tracked
            .first()
            .map(|t| Arc::clone(&t.service))
    }

    fn auto_config_name(&self) -> Option<String> {
        self.settings
            .auto_config
            .as_ref()
            .and_then(|(_, name)| name.clone())
    }

    fn is_propagated(&self) -> bool {
        self.settings.propagate
    }

    fn properties(&self) -> Properties {
        self.tracking
            .lock()
            .tracked
            .first()
            .map(|t| properties::transferable_properties(&t.reference.properties))
            .unwrap_or_default()
    }

    fn start(&self, service: Arc<dyn DependencyService>) -> Result<(), DependencyError> {
        self.serial.execute_now(TrackerEvent::Open(service));
        Ok(())
    }

    fn stop(&self) -> Result<(), DependencyError> {
        self.serial.execute_now(TrackerEvent::Close);
        Ok(())
    }

    fn invoke_added(&self, _service: &dyn DependencyService) {
        self.serial.execute_now(TrackerEvent::InvokeAdded);
    }

    fn invoke_removed(&self, _service: &dyn DependencyService) {
        self.serial.execute_now(TrackerEvent::InvokeRemoved);
    }

    fn create_copy(&self) -> Arc<dyn Dependency> {
        Self::from_settings(self.settings.clone())
    }
}

impl fmt::Debug for ServiceDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDependency")
            .field("interface", &self.settings.interface)
            .field("service_id", &self.settings.service_id)
            .field("required", &self.settings.required)
            .field("available", &self.is_available())
            .finish()
    }
}

/// 注册表监听器，只持有依赖的弱引用
struct TrackerListener {
    dependency: Weak<ServiceDependency>,
}

impl ServiceListener for TrackerListener {
    fn service_changed(&self, event: &ServiceEvent) {
        let Some(dependency) = self.dependency.upgrade() else {
            return;
        };
        let reference = event.reference();
        if !reference.provides(&dependency.settings.interface) {
            return;
        }

        let registry = dependency.tracking.lock().registry.clone();
        let lookup = |reference: &ServiceReference| {
            registry
                .as_ref()
                .and_then(|registry| registry.get_service(reference))
                .map(|service| Tracked {
                    reference: reference.clone(),
                    service,
                })
        };

        let tracker_event = match event {
            ServiceEvent::Registered(reference) => {
                if !dependency.settings.matches(reference) {
                    return;
                }
                match lookup(reference) {
                    Some(item) => TrackerEvent::Added(item),
                    None => return,
                }
            }
            ServiceEvent::Modified { reference, .. } => match lookup(reference) {
                Some(item) => TrackerEvent::Modified(item),
                None => return,
            },
            ServiceEvent::Unregistering(reference) => TrackerEvent::Removed(reference.clone()),
        };
        dependency.serial.execute_now(tracker_event);
    }
}

/// 服务依赖构建器
pub struct ServiceDependencyBuilder {
    settings: Settings,
}

impl ServiceDependencyBuilder {
    fn new(interface: impl Into<String>) -> Self {
        Self {
            settings: Settings {
                interface: interface.into(),
                filter: None,
                service_id: None,
                required: false,
                instance_bound: false,
                auto_config: None,
                propagate: false,
                added: None,
                changed: None,
                removed: None,
                swapped: None,
            },
        }
    }

    /// 设为必需依赖
    pub fn with_required(mut self, required: bool) -> Self {
        self.settings.required = required;
        self
    }

    /// 按服务属性过滤
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&ServiceReference) -> bool + Send + Sync + 'static,
    {
        self.settings.filter = Some(Arc::new(filter));
        self
    }

    /// 只跟踪指定 ID 的服务
    pub fn with_service_id(mut self, id: ServiceId) -> Self {
        self.settings.service_id = Some(id);
        self
    }

    /// 在 init 回调中添加的依赖需要设置
    pub fn with_instance_bound(mut self, instance_bound: bool) -> Self {
        self.settings.instance_bound = instance_bound;
        self
    }

    /// 把优先级最高的服务注入到类型为 `V` 的字段
    pub fn with_auto_config<V: Any + Send + Sync>(mut self) -> Self {
        self.settings.auto_config = Some((TypeKey::of::<V>(), None));
        self
    }

    /// 只注入到指定名称的字段
    pub fn with_auto_config_named<V: Any + Send + Sync>(mut self, name: impl Into<String>) -> Self {
        self.settings.auto_config = Some((TypeKey::of::<V>(), Some(name.into())));
        self
    }

    /// 把服务属性传播到组件的服务属性上
    pub fn with_propagate(mut self, propagate: bool) -> Self {
        self.settings.propagate = propagate;
        self
    }

    pub fn on_added<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Instance, &ServiceReference, &ServiceObject) -> CallbackResult + Send + Sync + 'static,
    {
        self.settings.added = Some(Arc::new(callback));
        self
    }

    pub fn on_changed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Instance, &ServiceReference, &ServiceObject) -> CallbackResult + Send + Sync + 'static,
    {
        self.settings.changed = Some(Arc::new(callback));
        self
    }

    pub fn on_removed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Instance, &ServiceReference, &ServiceObject) -> CallbackResult + Send + Sync + 'static,
    {
        self.settings.removed = Some(Arc::new(callback));
        self
    }

    /// 优先级最高的服务被替换时调用，代替一对 added/removed
    pub fn on_swapped<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Instance, &ServiceReference, &ServiceObject, &ServiceReference, &ServiceObject) -> CallbackResult
            + Send
            + Sync
            + 'static,
    {
        self.settings.swapped = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Arc<ServiceDependency> {
        ServiceDependency::from_settings(self.settings)
    }
}
