//! 组件状态机
//!
//! 依赖在任意线程上回调组件，组件把重算请求投递到自己的 [`SerialExecutor`]。
//! 执行器上按实际的启动、实例和注册标志重算 [`State`]，比较新旧阶段后把迁移动作
//! 排到队尾。还有迁移动作没执行时重算请求会排到它们后面，
//! 所以每次重算看到的输入都已经反映了之前所有迁移动作的结果。

use crate::callback::{invoke_guarded, notify_guarded, panic_message};
use crate::dependencies::same_dependency;
use crate::executor::{SerialExecutor, Task};
use crate::manager::{DependencyManager, WeakManager};
use crate::state::{Phase, State};
use crate::transition::{transition_actions, TransitionAction};
use dm_abstractions::{
    BundleContext, Callbacks, ComponentContext, ComponentDeclaration, ComponentStateListener,
    Dependency, DependencyDeclaration, DependencyService, Hook, Injectable, Instance,
    RegistrationRef, ServiceObject, ServiceRegistration,
};
use dm_common::{
    properties, BoxError, ComponentError, ComponentId, ComponentResult, ComponentState,
    Properties, TypeKey,
};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace, warn};

/// 实例构造函数
pub type Constructor = Arc<dyn Fn() -> Result<Instance, BoxError> + Send + Sync>;

/// 实例工厂，可以访问组件上下文
pub type Factory =
    Arc<dyn Fn(&dyn ComponentContext) -> Result<Instance, BoxError> + Send + Sync>;

/// 组合实例提供者
pub type Composition = Arc<dyn Fn(&Instance) -> Vec<Instance> + Send + Sync>;

/// 注册到服务注册表中的对象视图
pub type Export = Arc<dyn Fn(&Instance) -> Option<ServiceObject> + Send + Sync>;

/// 组件实现
#[derive(Clone)]
pub enum Implementation {
    /// 未设置
    Unset,
    /// 每次激活时调用构造函数
    Constructor {
        type_name: &'static str,
        constructor: Constructor,
    },
    /// 每次激活时调用工厂
    Factory(Factory),
    /// 固定实例
    Instance(Instance),
}

impl Implementation {
    fn type_name(&self) -> Option<&'static str> {
        match self {
            Self::Unset | Self::Factory(_) => None,
            Self::Constructor { type_name, .. } => Some(*type_name),
            Self::Instance(instance) => Some(instance.type_name()),
        }
    }
}

impl fmt::Debug for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("Unset"),
            Self::Constructor { type_name, .. } => write!(f, "Constructor({})", type_name),
            Self::Factory(_) => f.write_str("Factory"),
            Self::Instance(instance) => write!(f, "Instance({})", instance.type_name()),
        }
    }
}

/// 自动注入开关
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AutoConfig {
    pub(crate) enabled: bool,
    pub(crate) name: Option<String>,
}

/// 组件的静态配置
#[derive(Clone)]
pub(crate) struct ComponentConfig {
    pub(crate) interfaces: Vec<String>,
    pub(crate) service_properties: Properties,
    pub(crate) implementation: Implementation,
    pub(crate) callbacks: Callbacks,
    pub(crate) callback_instance: Option<Instance>,
    pub(crate) composition: Option<Composition>,
    pub(crate) export: Option<Export>,
    pub(crate) auto_config: HashMap<TypeKey, AutoConfig>,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        let enabled = AutoConfig {
            enabled: true,
            name: None,
        };
        let auto_config = [
            TypeKey::of::<BundleContext>(),
            TypeKey::of::<RegistrationRef>(),
            TypeKey::of::<DependencyManager>(),
            TypeKey::of::<Component>(),
        ]
        .into_iter()
        .map(|key| (key, enabled.clone()))
        .collect();

        Self {
            interfaces: Vec::new(),
            service_properties: Properties::new(),
            implementation: Implementation::Unset,
            callbacks: Callbacks::lifecycle(),
            callback_instance: None,
            composition: None,
            export: None,
            auto_config,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Init,
    Start,
    Stop,
    Destroy,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Destroy => "destroy",
        }
    }

    fn hook(self, callbacks: &Callbacks) -> Option<Hook> {
        match self {
            Self::Init => callbacks.init.clone(),
            Self::Start => callbacks.start.clone(),
            Self::Stop => callbacks.stop.clone(),
            Self::Destroy => callbacks.destroy.clone(),
        }
    }
}

/// 组件执行器上的工作项
pub(crate) enum ComponentCommand {
    /// 重算状态并投递迁移动作
    Settle,
    /// 迁移动作及其作用的快照
    Transition {
        action: TransitionAction,
        state: Arc<State>,
    },
    /// 需要与迁移串行执行的任务
    Run(Task),
}

struct Dependencies {
    list: Vec<Arc<dyn Dependency>>,
    state: Arc<State>,
}

/// 组件实现
pub struct ComponentImpl {
    id: ComponentId,
    self_ref: Weak<ComponentImpl>,
    context: BundleContext,
    manager: WeakManager,
    config: RwLock<ComponentConfig>,
    dependencies: Mutex<Dependencies>,
    is_started: Mutex<bool>,
    is_instantiated: AtomicBool,
    is_bound: AtomicBool,
    /// 已投递但尚未开始执行的迁移动作数
    pending_transitions: AtomicUsize,
    instance: RwLock<Option<Instance>>,
    registration: Mutex<Option<Arc<dyn ServiceRegistration>>>,
    listeners: RwLock<Vec<Arc<dyn ComponentStateListener>>>,
    executor: SerialExecutor<ComponentCommand>,
    inject_lock: Mutex<()>,
}

impl ComponentImpl {
    pub(crate) fn new(id: ComponentId, context: BundleContext, manager: WeakManager) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<ComponentImpl>| {
            let target = weak.clone();
            let executor = SerialExecutor::new(format!("component-{}", id.0), move |command| {
                if let Some(component) = target.upgrade() {
                    component.handle(command);
                }
            });

            Self {
                id,
                self_ref: weak.clone(),
                context,
                manager,
                config: RwLock::new(ComponentConfig::default()),
                dependencies: Mutex::new(Dependencies {
                    list: Vec::new(),
                    state: Arc::new(State::initial()),
                }),
                is_started: Mutex::new(false),
                is_instantiated: AtomicBool::new(false),
                is_bound: AtomicBool::new(false),
                pending_transitions: AtomicUsize::new(0),
                instance: RwLock::new(None),
                registration: Mutex::new(None),
                listeners: RwLock::new(Vec::new()),
                executor,
                inject_lock: Mutex::new(()),
            }
        })
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn bundle_context(&self) -> &BundleContext {
        &self.context
    }

    /// 所属的依赖管理器
    pub fn dependency_manager(&self) -> Option<DependencyManager> {
        self.manager.upgrade()
    }

    /// 最近一次落定的状态快照
    pub fn state(&self) -> Arc<State> {
        Arc::clone(&self.dependencies.lock().state)
    }

    /// 当前阶段
    pub fn phase(&self) -> Phase {
        self.state().phase()
    }

    /// 是否已调用 [`Self::start`] 且尚未停止
    pub fn is_started(&self) -> bool {
        *self.is_started.lock()
    }

    /// 依赖列表的副本
    pub fn dependencies(&self) -> Vec<Arc<dyn Dependency>> {
        self.dependencies.lock().list.clone()
    }

    /// 当前的服务实例
    pub fn instance(&self) -> Option<Instance> {
        self.instance.read().clone()
    }

    /// 服务是否已注册到注册表
    pub fn is_service_registered(&self) -> bool {
        self.registration.lock().is_some()
    }

    /// 组件名称：提供的接口，未提供接口时为实现类型名
    pub fn name(&self) -> String {
        let config = self.config.read();
        if config.interfaces.is_empty() {
            drop(config);
            self.class_name()
        } else {
            config.interfaces.join(", ")
        }
    }

    /// 实现类型名
    pub fn class_name(&self) -> String {
        if let Some(instance) = self.instance.read().as_ref() {
            return instance.type_name().to_string();
        }
        self.config
            .read()
            .implementation
            .type_name()
            .unwrap_or("ComponentImpl")
            .to_string()
    }

    /// 提供的服务接口
    pub fn services(&self) -> Vec<String> {
        self.config.read().interfaces.clone()
    }

    /// 配置的服务属性
    pub fn service_properties(&self) -> Properties {
        self.config.read().service_properties.clone()
    }

    /// 自动注入是否启用
    pub fn auto_config(&self, key: &TypeKey) -> bool {
        self.config
            .read()
            .auto_config
            .get(key)
            .map(|a| a.enabled)
            .unwrap_or(false)
    }

    /// 自动注入的字段名
    pub fn auto_config_instance(&self, key: &TypeKey) -> Option<String> {
        self.config
            .read()
            .auto_config
            .get(key)
            .and_then(|a| a.name.clone())
    }

    /// 声明状态：必需依赖全部满足即视为已注册
    pub fn declaration_state(&self) -> ComponentState {
        if self.state().is_all_required_available() {
            ComponentState::Registered
        } else {
            ComponentState::Unregistered
        }
    }

    pub fn dependency_declarations(&self) -> Vec<DependencyDeclaration> {
        self.dependencies().iter().map(|d| d.declaration()).collect()
    }

    /// 诊断视图
    pub fn declaration(&self) -> ComponentDeclaration {
        ComponentDeclaration {
            id: self.id,
            bundle_id: self.context.bundle_id(),
            name: self.name(),
            class_name: self.class_name(),
            state: self.declaration_state(),
            services: self.services(),
            dependencies: self.dependency_declarations(),
        }
    }

    fn ensure_not_active(&self) -> ComponentResult<()> {
        if !self.is_started() {
            Ok(())
        } else {
            Err(ComponentError::active(self.name()))
        }
    }

    // ----- 配置 -----

    /// 设置提供的服务接口和服务属性
    pub fn set_interfaces<I, S>(&self, interfaces: I, properties: Properties) -> ComponentResult<&Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_not_active()?;
        let mut config = self.config.write();
        config.interfaces = interfaces.into_iter().map(Into::into).collect();
        config.service_properties = properties;
        Ok(self)
    }

    /// 设置单个服务接口
    pub fn set_interface(&self, interface: &str, properties: Properties) -> ComponentResult<&Self> {
        self.set_interfaces([interface], properties)
    }

    /// 使用 `Default` 构造实现
    pub fn set_implementation<T>(&self) -> ComponentResult<&Self>
    where
        T: Injectable + Default,
    {
        self.set_implementation_with(T::default)
    }

    /// 使用闭包构造实现
    pub fn set_implementation_with<T, F>(&self, create: F) -> ComponentResult<&Self>
    where
        T: Injectable,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.ensure_not_active()?;
        self.config.write().implementation = Implementation::Constructor {
            type_name: std::any::type_name::<T>(),
            constructor: Arc::new(move || Ok(Instance::new(Arc::new(create())))),
        };
        Ok(self)
    }

    /// 使用可失败的构造函数
    pub fn set_constructor<F>(&self, constructor: F) -> ComponentResult<&Self>
    where
        F: Fn() -> Result<Instance, BoxError> + Send + Sync + 'static,
    {
        self.ensure_not_active()?;
        self.config.write().implementation = Implementation::Constructor {
            type_name: "constructor",
            constructor: Arc::new(constructor),
        };
        Ok(self)
    }

    /// 使用工厂创建实例
    pub fn set_factory<F>(&self, factory: F) -> ComponentResult<&Self>
    where
        F: Fn(&dyn ComponentContext) -> Result<Instance, BoxError> + Send + Sync + 'static,
    {
        self.ensure_not_active()?;
        self.config.write().implementation = Implementation::Factory(Arc::new(factory));
        Ok(self)
    }

    /// 使用固定实例
    pub fn set_instance(&self, instance: Instance) -> ComponentResult<&Self> {
        self.ensure_not_active()?;
        self.config.write().implementation = Implementation::Instance(instance);
        Ok(self)
    }

    /// 设置组合实例提供者
    pub fn set_composition<F>(&self, composition: F) -> ComponentResult<&Self>
    where
        F: Fn(&Instance) -> Vec<Instance> + Send + Sync + 'static,
    {
        self.ensure_not_active()?;
        self.config.write().composition = Some(Arc::new(composition));
        Ok(self)
    }

    /// 设置生命周期回调表
    pub fn set_callbacks(&self, callbacks: Callbacks) -> ComponentResult<&Self> {
        self.ensure_not_active()?;
        self.config.write().callbacks = callbacks;
        Ok(self)
    }

    /// 在指定实例上调用生命周期回调
    pub fn set_callback_instance(&self, instance: Instance) -> ComponentResult<&Self> {
        self.ensure_not_active()?;
        self.config.write().callback_instance = Some(instance);
        Ok(self)
    }

    /// 指定注册到注册表中的对象
    ///
    /// 默认注册实现对象本身，消费者按实现类型注入。
    pub fn set_export<T, S, F>(&self, export: F) -> ComponentResult<&Self>
    where
        T: Any + Send + Sync,
        S: Any + Send + Sync,
        F: Fn(Arc<T>) -> S + Send + Sync + 'static,
    {
        self.ensure_not_active()?;
        self.config.write().export = Some(Arc::new(move |instance: &Instance| {
            instance
                .downcast::<T>()
                .map(|object| Arc::new(export(object)) as ServiceObject)
        }));
        Ok(self)
    }

    /// 启用或关闭某个类型的自动注入
    pub fn set_auto_config(&self, key: TypeKey, enabled: bool) -> &Self {
        self.config.write().auto_config.insert(
            key,
            AutoConfig {
                enabled,
                name: None,
            },
        );
        self
    }

    /// 只向指定名称的字段注入
    pub fn set_auto_config_named(&self, key: TypeKey, name: impl Into<String>) -> &Self {
        self.config.write().auto_config.insert(
            key,
            AutoConfig {
                enabled: true,
                name: Some(name.into()),
            },
        );
        self
    }

    /// 修改服务属性，已注册时立即重新发布
    pub fn set_service_properties(&self, properties: Properties) -> &Self {
        self.config.write().service_properties = properties;
        let registration = self.registration.lock().clone();
        if let Some(registration) = registration {
            if let Err(e) = registration.set_properties(self.calculate_service_properties()) {
                warn!("组件 {} 更新服务属性失败: {}", self.name(), e);
            }
        }
        self
    }

    pub(crate) fn config_snapshot(&self) -> ComponentConfig {
        self.config.read().clone()
    }

    pub(crate) fn apply_config(&self, config: ComponentConfig) -> ComponentResult<&Self> {
        self.ensure_not_active()?;
        *self.config.write() = config;
        Ok(self)
    }

    /// 构建内部组件时使用，调用方保证组件尚未启动
    pub(crate) fn configure_unchecked<F>(&self, f: F)
    where
        F: FnOnce(&mut ComponentConfig),
    {
        f(&mut self.config.write());
    }

    // ----- 依赖 -----

    /// 添加依赖
    pub fn add(&self, dependency: Arc<dyn Dependency>) -> ComponentResult<&Self> {
        self.add_all(vec![dependency])
    }

    /// 批量添加依赖
    ///
    /// 组件已启动时，必需依赖立即开始跟踪，可选依赖只在已绑定时开始跟踪。
    pub fn add_all(&self, dependencies: Vec<Arc<dyn Dependency>>) -> ComponentResult<&Self> {
        let old = {
            let mut deps = self.dependencies.lock();
            deps.list.extend(dependencies.iter().cloned());
            Arc::clone(&deps.state)
        };

        // 启动请求尚未落定时，由随后的重算统一开始跟踪
        if !old.is_inactive() && self.is_started() {
            for dependency in &dependencies {
                if dependency.is_required() || old.is_bound() {
                    let service = self
                        .as_dependency_service()
                        .ok_or_else(|| ComponentError::Released {
                            component: self.name(),
                        })?;
                    dependency.start(service)?;
                }
            }
        }

        self.request_settle();
        Ok(self)
    }

    /// 移除依赖
    pub fn remove(&self, dependency: &Arc<dyn Dependency>) -> &Self {
        let old = {
            let mut deps = self.dependencies.lock();
            deps.list.retain(|d| !same_dependency(d, dependency));
            Arc::clone(&deps.state)
        };

        let waiting = old.is_waiting_for_required() || old.is_waiting_for_required_instantiated();
        if old.is_all_required_available() || (waiting && dependency.is_required()) {
            if let Err(e) = dependency.stop() {
                warn!("组件 {} 停止依赖 {} 失败: {}", self.name(), dependency.name(), e);
            }
        }

        self.request_settle();
        self
    }

    // ----- 启停 -----

    /// 启动组件，重复调用无效
    pub fn start(&self) {
        let needs_starting = {
            let mut started = self.is_started.lock();
            !std::mem::replace(&mut *started, true)
        };
        if needs_starting {
            debug!("启动组件: {} ({})", self.name(), self.id);
            self.request_settle();
        }
    }

    /// 停止组件，重复调用无效
    pub fn stop(&self) {
        let needs_stopping = {
            let mut started = self.is_started.lock();
            std::mem::replace(&mut *started, false)
        };
        if needs_stopping {
            debug!("停止组件: {} ({})", self.name(), self.id);
            self.request_settle();
        }
    }

    // ----- 状态监听 -----

    /// 添加状态监听器，组件已注册时立即收到 starting 和 started
    pub fn add_state_listener(&self, listener: Arc<dyn ComponentStateListener>) -> &Self {
        self.listeners.write().push(Arc::clone(&listener));

        let target = self.self_ref.clone();
        self.executor.execute_now(ComponentCommand::Run(Box::new(move || {
            if let Some(component) = target.upgrade() {
                if component.is_bound.load(Ordering::SeqCst) {
                    let name = component.name();
                    notify_guarded(&name, "starting", || listener.starting(&*component));
                    notify_guarded(&name, "started", || listener.started(&*component));
                }
            }
        })));
        self
    }

    /// 移除状态监听器
    pub fn remove_state_listener(&self, listener: &Arc<dyn ComponentStateListener>) -> &Self {
        self.listeners
            .write()
            .retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
        self
    }

    /// 移除全部状态监听器
    pub fn remove_state_listeners(&self) -> &Self {
        self.listeners.write().clear();
        self
    }

    pub(crate) fn state_listeners(&self) -> Vec<Arc<dyn ComponentStateListener>> {
        self.listeners.read().clone()
    }

    // ----- 实例 -----

    /// 同步创建实例并注入框架对象
    ///
    /// 已有实例时直接返回它。
    pub fn instantiate_component(&self) -> Option<Instance> {
        debug!("同步创建组件实例: {}", self.name());
        self.init_service();
        self.instance()
    }

    /// 组合实例，未设置组合时只有服务实例本身
    pub fn composition_instances(&self) -> Vec<Instance> {
        let Some(instance) = self.instance() else {
            return Vec::new();
        };
        let composition = self.config.read().composition.clone();
        match composition {
            None => vec![instance],
            Some(composition) => {
                match catch_unwind(AssertUnwindSafe(|| composition(&instance))) {
                    Ok(instances) => instances,
                    Err(payload) => {
                        error!(
                            "组件 {} 获取组合实例失败: {}",
                            self.name(),
                            panic_message(payload.as_ref())
                        );
                        vec![instance]
                    }
                }
            }
        }
    }

    fn callback_targets(&self) -> Vec<Instance> {
        let callback_instance = self.config.read().callback_instance.clone();
        match callback_instance {
            Some(instance) => vec![instance],
            None => self.composition_instances(),
        }
    }

    // ----- 状态计算 -----

    fn as_dependency_service(&self) -> Option<Arc<dyn DependencyService>> {
        self.self_ref
            .upgrade()
            .map(|component| component as Arc<dyn DependencyService>)
    }

    /// 按当前输入计算状态，不替换已落定的快照
    fn preview(&self) -> State {
        let started = self.is_started();
        let list = self.dependencies.lock().list.clone();
        State::new(
            list,
            started,
            self.is_instantiated.load(Ordering::SeqCst),
            self.is_bound.load(Ordering::SeqCst),
        )
    }

    /// 请求在执行器上重算状态
    ///
    /// 当前线程就是执行者时只入队，由正在进行的排空负责执行。
    fn request_settle(&self) {
        self.executor.execute_with(ComponentCommand::Settle);
    }

    /// 在执行器上用实际输入重算状态，把新旧阶段之间的迁移动作排到队尾
    fn settle(&self) {
        if self.pending_transitions.load(Ordering::SeqCst) > 0 {
            self.executor.enqueue(ComponentCommand::Settle);
            return;
        }

        let started = self.is_started();
        let (old, new) = {
            let mut deps = self.dependencies.lock();
            let old = Arc::clone(&deps.state);
            let new = Arc::new(State::new(
                deps.list.clone(),
                started,
                self.is_instantiated.load(Ordering::SeqCst),
                self.is_bound.load(Ordering::SeqCst),
            ));
            deps.state = Arc::clone(&new);
            (old, new)
        };

        if old.phase() == new.phase() {
            return;
        }
        debug!(
            "组件 {} ({}) 状态变化: {} -> {}",
            self.name(),
            self.id,
            old.phase(),
            new.phase()
        );
        if old.is_tracking_optional() && new.is_waiting_for_required_instantiated() {
            trace!("组件 {} 等待实例绑定的依赖，实例保留", self.id);
        }

        for action in transition_actions(old.phase(), new.phase()) {
            let state = if action.acts_on_previous_state() { &old } else { &new };
            self.pending_transitions.fetch_add(1, Ordering::SeqCst);
            self.executor.enqueue(ComponentCommand::Transition {
                action: *action,
                state: Arc::clone(state),
            });
        }
    }

    fn handle(&self, command: ComponentCommand) {
        match command {
            ComponentCommand::Settle => self.settle(),
            ComponentCommand::Transition { action, state } => {
                self.pending_transitions.fetch_sub(1, Ordering::SeqCst);
                self.perform(action, &state);
            }
            ComponentCommand::Run(task) => task(),
        }
    }

    fn perform(&self, action: TransitionAction, state: &State) {
        trace!("组件 {} 执行动作: {}", self.id, action);
        match action {
            TransitionAction::Activate => self.activate_service(state),
            TransitionAction::Bind => self.bind_service(state),
            TransitionAction::Unbind => self.unbind_service(state),
            TransitionAction::Deactivate => self.deactivate_service(state),
            TransitionAction::StartTrackingRequired => self.start_tracking(state, true),
            TransitionAction::StopTrackingRequired => self.stop_tracking(state, true),
        }
    }

    // ----- 迁移动作 -----

    fn activate_service(&self, state: &State) {
        self.init_service();
        self.configure_services(state);
        self.is_instantiated.store(true, Ordering::SeqCst);
        self.invoke(Stage::Init);
        // 实例已创建，init 回调也可能添加了新的依赖
        self.request_settle();
    }

    fn bind_service(&self, state: &State) {
        self.configure_extra_dependencies(state);
        self.notify_listeners("starting", |l, c| l.starting(c));
        self.invoke(Stage::Start);
        self.start_tracking(state, false);
        self.register_service();
        self.notify_listeners("started", |l, c| l.started(c));
        info!("组件已绑定: {} ({})", self.name(), self.id);
    }

    fn unbind_service(&self, state: &State) {
        self.notify_listeners("stopping", |l, c| l.stopping(c));
        self.unregister_service();
        self.stop_tracking(state, false);
        self.invoke(Stage::Stop);
        self.notify_listeners("stopped", |l, c| l.stopped(c));
        info!("组件已解绑: {} ({})", self.name(), self.id);
    }

    fn deactivate_service(&self, state: &State) {
        self.is_instantiated.store(false, Ordering::SeqCst);
        self.invoke(Stage::Destroy);
        for dependency in state.dependencies().iter().filter(|d| d.is_required()) {
            dependency.invoke_removed(self);
        }
        *self.instance.write() = None;
    }

    fn start_tracking(&self, state: &State, required: bool) {
        let Some(service) = self.as_dependency_service() else {
            return;
        };
        for dependency in state
            .dependencies()
            .iter()
            .filter(|d| d.is_required() == required)
        {
            if let Err(e) = dependency.start(Arc::clone(&service)) {
                warn!("组件 {} 启动依赖 {} 失败: {}", self.name(), dependency.name(), e);
            }
        }
    }

    fn stop_tracking(&self, state: &State, required: bool) {
        for dependency in state
            .dependencies()
            .iter()
            .filter(|d| d.is_required() == required)
        {
            if let Err(e) = dependency.stop() {
                warn!("组件 {} 停止依赖 {} 失败: {}", self.name(), dependency.name(), e);
            }
        }
    }

    // ----- 实例与注入 -----

    fn init_service(&self) {
        if self.instance.read().is_some() {
            return;
        }

        let implementation = self.config.read().implementation.clone();
        let created = match implementation {
            Implementation::Unset => {
                error!("组件 {} 未设置实现", self.id);
                None
            }
            Implementation::Constructor {
                type_name,
                constructor,
            } => self.create_instance(type_name, || constructor()),
            Implementation::Factory(factory) => {
                self.create_instance("factory", || factory(self))
            }
            Implementation::Instance(instance) => Some(instance),
        };

        let Some(instance) = created else {
            return;
        };
        *self.instance.write() = Some(instance);

        self.auto_configure(TypeKey::of::<BundleContext>(), Arc::new(self.context.clone()));
        self.auto_configure(
            TypeKey::of::<RegistrationRef>(),
            Arc::new(RegistrationRef::null()),
        );
        if let Some(manager) = self.manager.upgrade() {
            self.auto_configure(TypeKey::of::<DependencyManager>(), Arc::new(manager));
        }
        if let Some(component) = self.self_ref.upgrade() {
            self.auto_configure(TypeKey::of::<Component>(), Arc::new(Component(component)));
        }
    }

    fn create_instance<F>(&self, what: &str, create: F) -> Option<Instance>
    where
        F: FnOnce() -> Result<Instance, BoxError>,
    {
        match catch_unwind(AssertUnwindSafe(create)) {
            Ok(Ok(instance)) => Some(instance),
            Ok(Err(e)) => {
                error!("组件 {} 创建实例失败 ({}): {}", self.id, what, e);
                None
            }
            Err(payload) => {
                error!(
                    "组件 {} 创建实例时发生 panic ({}): {}",
                    self.id,
                    what,
                    panic_message(payload.as_ref())
                );
                None
            }
        }
    }

    fn auto_configure(&self, key: TypeKey, value: ServiceObject) {
        let setting = self.config.read().auto_config.get(&key).cloned();
        if let Some(AutoConfig { enabled: true, name }) = setting {
            self.configure_implementation(&key, Some(value), name.as_deref());
        }
    }

    /// 在注入锁内向所有组合实例写入值
    fn configure_implementation(&self, key: &TypeKey, value: Option<ServiceObject>, name: Option<&str>) {
        let instances = self.composition_instances();
        let _guard = self.inject_lock.lock();
        for instance in &instances {
            let hits = instance.inject(key, name, value.clone());
            trace!("向 {} 注入 {}: {} 个字段", instance.type_name(), key, hits);
        }
    }

    fn inject_dependency(&self, dependency: &dyn Dependency) {
        if let Some(key) = dependency.auto_config_type() {
            let name = dependency.auto_config_name();
            self.configure_implementation(&key, dependency.auto_config_instance(), name.as_deref());
        }
    }

    fn configure_services(&self, state: &State) {
        for dependency in state.dependencies() {
            if dependency.is_auto_config() {
                self.inject_dependency(dependency.as_ref());
            }
            if dependency.is_required() {
                dependency.invoke_added(self);
            }
        }
    }

    fn configure_extra_dependencies(&self, state: &State) {
        for dependency in state.dependencies() {
            if dependency.is_auto_config() && dependency.is_instance_bound() {
                self.inject_dependency(dependency.as_ref());
            }
        }
    }

    fn update_instance(&self, dependency: &dyn Dependency) {
        if dependency.is_auto_config() {
            self.inject_dependency(dependency);
        }
        if dependency.is_propagated() {
            let registration = self.registration.lock().clone();
            if let Some(registration) = registration {
                if let Err(e) = registration.set_properties(self.calculate_service_properties()) {
                    warn!("组件 {} 传播依赖属性失败: {}", self.name(), e);
                }
            }
        }
    }

    fn invoke(&self, stage: Stage) {
        let Some(hook) = stage.hook(&self.config.read().callbacks) else {
            return;
        };
        let owner = self.name();
        for target in self.callback_targets() {
            invoke_guarded(&owner, stage.name(), || hook(&target, self));
        }
    }

    fn notify_listeners<F>(&self, what: &str, f: F)
    where
        F: Fn(&dyn ComponentStateListener, &dyn ComponentContext),
    {
        let listeners = self.state_listeners();
        if listeners.is_empty() {
            return;
        }
        let owner = self.name();
        for listener in listeners {
            notify_guarded(&owner, what, || f(listener.as_ref(), self));
        }
    }

    // ----- 服务注册 -----

    /// 配置的服务属性叠加上可用且传播的依赖属性
    fn calculate_service_properties(&self) -> Properties {
        let mut result = self.service_properties();
        for dependency in self.dependencies() {
            if dependency.is_propagated() && dependency.is_available() {
                properties::overlay(&mut result, &dependency.properties());
            }
        }
        result
    }

    fn register_service(&self) {
        let (interfaces, export) = {
            let config = self.config.read();
            (config.interfaces.clone(), config.export.clone())
        };

        if !interfaces.is_empty() {
            match self.instance() {
                None => warn!("组件 {} 没有服务实例，跳过注册", self.id),
                Some(instance) => {
                    let object = match export {
                        Some(export) => export(&instance),
                        None => Some(Arc::clone(instance.object()).into_any_arc()),
                    };
                    match object {
                        None => warn!("组件 {} 的导出对象类型不匹配，跳过注册", self.id),
                        Some(object) => {
                            let properties = self.calculate_service_properties();
                            match self.context.register_service(&interfaces, object, properties) {
                                Ok(registration) => {
                                    *self.registration.lock() = Some(Arc::clone(&registration));
                                    self.auto_configure(
                                        TypeKey::of::<RegistrationRef>(),
                                        Arc::new(RegistrationRef::new(registration)),
                                    );
                                }
                                Err(e) => error!("组件 {} 注册服务失败: {}", self.name(), e),
                            }
                        }
                    }
                }
            }
        }
        self.is_bound.store(true, Ordering::SeqCst);
    }

    fn unregister_service(&self) {
        self.is_bound.store(false, Ordering::SeqCst);
        let registration = self.registration.lock().take();
        if let Some(registration) = registration {
            if let Err(e) = registration.unregister() {
                warn!("组件 {} 注销服务失败: {}", self.name(), e);
            }
            self.auto_configure(
                TypeKey::of::<RegistrationRef>(),
                Arc::new(RegistrationRef::null()),
            );
        }
    }
}

impl DependencyService for ComponentImpl {
    fn dependency_available(&self, dependency: &dyn Dependency) {
        let current = self.preview();
        if current.is_all_required_available() || current.is_waiting_for_required_instantiated() {
            self.update_instance(dependency);
        }
        self.request_settle();
    }

    fn dependency_changed(&self, dependency: &dyn Dependency) {
        if self.state().is_all_required_available() {
            self.update_instance(dependency);
        }
    }

    fn dependency_unavailable(&self, dependency: &dyn Dependency) {
        if self.preview().is_all_required_available() {
            self.update_instance(dependency);
        }
        self.request_settle();
    }

    fn component_id(&self) -> ComponentId {
        self.id
    }

    fn name(&self) -> String {
        ComponentImpl::name(self)
    }

    fn bundle_context(&self) -> BundleContext {
        self.context.clone()
    }

    fn instance(&self) -> Option<Instance> {
        self.instance.read().clone()
    }

    fn callback_instances(&self) -> Vec<Instance> {
        self.callback_targets()
    }

    fn is_instantiated(&self) -> bool {
        self.is_instantiated.load(Ordering::SeqCst)
    }

    fn is_registered(&self) -> bool {
        self.is_bound.load(Ordering::SeqCst)
    }
}

impl ComponentContext for ComponentImpl {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn name(&self) -> String {
        ComponentImpl::name(self)
    }

    fn bundle_context(&self) -> BundleContext {
        self.context.clone()
    }

    fn service_properties(&self) -> Properties {
        ComponentImpl::service_properties(self)
    }

    fn set_service_properties(&self, properties: Properties) {
        ComponentImpl::set_service_properties(self, properties);
    }

    fn add_dependency(&self, dependency: Arc<dyn Dependency>) -> Result<(), ComponentError> {
        self.add(dependency).map(|_| ())
    }

    fn remove_dependency(&self, dependency: &Arc<dyn Dependency>) -> Result<(), ComponentError> {
        self.remove(dependency);
        Ok(())
    }

    fn instance(&self) -> Option<Instance> {
        self.instance.read().clone()
    }
}

impl fmt::Debug for ComponentImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentImpl")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("phase", &self.phase())
            .finish()
    }
}

/// 组件句柄
///
/// 克隆开销很小，相等性比较的是同一个组件。
#[derive(Clone)]
pub struct Component(Arc<ComponentImpl>);

impl Component {
    pub(crate) fn new(id: ComponentId, context: BundleContext, manager: WeakManager) -> Self {
        Self(ComponentImpl::new(id, context, manager))
    }

    /// 是否为同一个组件
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// 作为依赖回调目标
    pub fn as_dependency_service(&self) -> Arc<dyn DependencyService> {
        Arc::clone(&self.0) as Arc<dyn DependencyService>
    }
}

impl Deref for Component {
    type Target = ComponentImpl;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Component {}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.context.bundle_id(), self.id).cmp(&(other.context.bundle_id(), other.id))
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.name())
    }
}
