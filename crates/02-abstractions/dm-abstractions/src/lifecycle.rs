//! 组件生命周期契约

use crate::context::BundleContext;
use crate::dependency::Dependency;
use crate::injection::{AsAny, Instance};
use dm_common::{CallbackResult, ComponentError, ComponentId, Properties};
use std::fmt;
use std::sync::Arc;

/// 组件上下文
///
/// 回调执行时传给实现对象，用于查询和调整所属组件。
pub trait ComponentContext: Send + Sync {
    /// 组件 ID
    fn id(&self) -> ComponentId;

    /// 组件名称
    fn name(&self) -> String;

    /// 所属 bundle 上下文
    fn bundle_context(&self) -> BundleContext;

    /// 当前的服务属性
    fn service_properties(&self) -> Properties;

    /// 修改服务属性，已注册时立即重新发布
    fn set_service_properties(&self, properties: Properties);

    /// 添加依赖
    fn add_dependency(&self, dependency: Arc<dyn Dependency>) -> Result<(), ComponentError>;

    /// 移除依赖
    fn remove_dependency(&self, dependency: &Arc<dyn Dependency>) -> Result<(), ComponentError>;

    /// 当前的服务实例
    fn instance(&self) -> Option<Instance>;
}

/// 组件生命周期回调
///
/// 四个回调都有空的默认实现。
pub trait Lifecycle: AsAny {
    /// 实例创建并完成注入后调用
    fn init(&self, _ctx: &dyn ComponentContext) -> CallbackResult {
        Ok(())
    }

    /// 服务注册前调用
    fn start(&self, _ctx: &dyn ComponentContext) -> CallbackResult {
        Ok(())
    }

    /// 服务注销后调用
    fn stop(&self, _ctx: &dyn ComponentContext) -> CallbackResult {
        Ok(())
    }

    /// 实例丢弃前调用
    fn destroy(&self, _ctx: &dyn ComponentContext) -> CallbackResult {
        Ok(())
    }
}

/// 回调钩子
pub type Hook = Arc<dyn Fn(&Instance, &dyn ComponentContext) -> CallbackResult + Send + Sync>;

/// 生命周期回调表
///
/// 每个阶段一个可选钩子，为空时跳过该阶段。
#[derive(Clone)]
pub struct Callbacks {
    pub init: Option<Hook>,
    pub start: Option<Hook>,
    pub stop: Option<Hook>,
    pub destroy: Option<Hook>,
}

impl Callbacks {
    /// 委托给 [`Lifecycle`] 的默认回调表
    pub fn lifecycle() -> Self {
        Self {
            init: Some(Arc::new(|i: &Instance, ctx: &dyn ComponentContext| {
                i.object().init(ctx)
            })),
            start: Some(Arc::new(|i: &Instance, ctx: &dyn ComponentContext| {
                i.object().start(ctx)
            })),
            stop: Some(Arc::new(|i: &Instance, ctx: &dyn ComponentContext| {
                i.object().stop(ctx)
            })),
            destroy: Some(Arc::new(|i: &Instance, ctx: &dyn ComponentContext| {
                i.object().destroy(ctx)
            })),
        }
    }

    /// 不调用任何回调
    pub fn none() -> Self {
        Self {
            init: None,
            start: None,
            stop: None,
            destroy: None,
        }
    }

    /// 设置 init 钩子
    pub fn on_init<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Instance, &dyn ComponentContext) -> CallbackResult + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(hook));
        self
    }

    /// 设置 start 钩子
    pub fn on_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Instance, &dyn ComponentContext) -> CallbackResult + Send + Sync + 'static,
    {
        self.start = Some(Arc::new(hook));
        self
    }

    /// 设置 stop 钩子
    pub fn on_stop<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Instance, &dyn ComponentContext) -> CallbackResult + Send + Sync + 'static,
    {
        self.stop = Some(Arc::new(hook));
        self
    }

    /// 设置 destroy 钩子
    pub fn on_destroy<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Instance, &dyn ComponentContext) -> CallbackResult + Send + Sync + 'static,
    {
        self.destroy = Some(Arc::new(hook));
        self
    }
}

impl Default for Callbacks {
    fn default() -> Self {
        Self::lifecycle()
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("init", &self.init.is_some())
            .field("start", &self.start.is_some())
            .field("stop", &self.stop.is_some())
            .field("destroy", &self.destroy.is_some())
            .finish()
    }
}

/// 组件状态监听器
///
/// `starting`/`started` 围绕服务注册，`stopping`/`stopped` 围绕服务注销。
pub trait ComponentStateListener: Send + Sync {
    fn starting(&self, _component: &dyn ComponentContext) {}

    fn started(&self, _component: &dyn ComponentContext) {}

    fn stopping(&self, _component: &dyn ComponentContext) {}

    fn stopped(&self, _component: &dyn ComponentContext) {}
}
