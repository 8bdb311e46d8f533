//! 依赖契约
//!
//! [`Dependency`] 由具体的依赖实现提供，[`DependencyService`] 由组件实现提供。
//! 依赖在自己的跟踪线程上通过 `dependency_available` / `dependency_changed` /
//! `dependency_unavailable` 回调所属组件。

use crate::context::BundleContext;
use crate::injection::Instance;
use crate::registry::ServiceObject;
use dm_common::{ComponentId, ComponentState, DependencyError, DependencyState, Properties, TypeKey};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 依赖
pub trait Dependency: Send + Sync {
    /// 依赖名称，用于日志和诊断
    fn name(&self) -> String;

    /// 依赖类型，例如 `service`、`configuration`
    fn kind(&self) -> &'static str;

    /// 是否必需
    fn is_required(&self) -> bool;

    /// 当前是否可用
    fn is_available(&self) -> bool;

    /// 是否与实例绑定
    ///
    /// 实例绑定的依赖在 init 回调中添加，缺失时组件保留实例等待它。
    fn is_instance_bound(&self) -> bool {
        false
    }

    /// 是否自动注入
    fn is_auto_config(&self) -> bool {
        false
    }

    /// 自动注入的类型键
    fn auto_config_type(&self) -> Option<TypeKey> {
        None
    }

    /// 自动注入的值
    fn auto_config_instance(&self) -> Option<ServiceObject> {
        None
    }

    /// 自动注入的字段名
    fn auto_config_name(&self) -> Option<String> {
        None
    }

    /// 是否把属性传播到组件的服务属性
    fn is_propagated(&self) -> bool {
        false
    }

    /// 传播的属性
    fn properties(&self) -> Properties {
        Properties::new()
    }

    /// 开始跟踪
    fn start(&self, service: Arc<dyn DependencyService>) -> Result<(), DependencyError>;

    /// 停止跟踪
    fn stop(&self) -> Result<(), DependencyError>;

    /// 组件配置实例时调用 added 回调
    fn invoke_added(&self, _service: &dyn DependencyService) {}

    /// 组件销毁实例时调用 removed 回调
    fn invoke_removed(&self, _service: &dyn DependencyService) {}

    /// 创建一个尚未启动的副本
    fn create_copy(&self) -> Arc<dyn Dependency>;

    /// 诊断视图
    fn declaration(&self) -> DependencyDeclaration {
        DependencyDeclaration {
            name: self.name(),
            kind: self.kind().to_string(),
            state: DependencyState::of(self.is_available(), self.is_required()),
        }
    }
}

/// 依赖的诊断视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDeclaration {
    pub name: String,
    pub kind: String,
    pub state: DependencyState,
}

/// 组件的诊断视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDeclaration {
    pub id: ComponentId,
    pub bundle_id: u64,
    pub name: String,
    pub class_name: String,
    pub state: ComponentState,
    pub services: Vec<String>,
    pub dependencies: Vec<DependencyDeclaration>,
}

impl ComponentDeclaration {
    /// 不可用的必需依赖
    pub fn missing_required(&self) -> impl Iterator<Item = &DependencyDeclaration> {
        self.dependencies
            .iter()
            .filter(|d| d.state == DependencyState::RequiredUnavailable)
    }
}

/// 依赖所属的组件
pub trait DependencyService: Send + Sync {
    /// 依赖变为可用
    fn dependency_available(&self, dependency: &dyn Dependency);

    /// 可用依赖的内容发生变化
    fn dependency_changed(&self, dependency: &dyn Dependency);

    /// 依赖变为不可用
    fn dependency_unavailable(&self, dependency: &dyn Dependency);

    /// 组件 ID
    fn component_id(&self) -> ComponentId;

    /// 组件名称
    fn name(&self) -> String;

    /// 所属 bundle 上下文
    fn bundle_context(&self) -> BundleContext;

    /// 当前的服务实例
    fn instance(&self) -> Option<Instance>;

    /// 回调目标实例
    ///
    /// 设置了回调实例时只包含它，否则为组合实例（默认只有服务实例本身）。
    fn callback_instances(&self) -> Vec<Instance>;

    /// 是否已创建实例
    fn is_instantiated(&self) -> bool;

    /// 服务是否已注册
    fn is_registered(&self) -> bool;
}
