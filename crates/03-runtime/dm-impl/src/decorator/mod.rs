//! 装饰器
//!
//! 一个逻辑服务对应多个具体组件：切面、适配器和工厂配置适配器
//! 都由 [`FilterService`] 包装的内部组件驱动，按键扇出到 [`KeyedFanOut`]。

mod adapters;
mod filter_service;
mod keyed;

pub use filter_service::{DecoratorKind, FilterService};
pub use keyed::{ComponentCreator, KeyedFanOut};

pub(crate) use adapters::{adapter_service, aspect_service, factory_configuration_adapter_service};

use dm_abstractions::Instance;
use dm_common::{CallbackResult, Properties};
use std::sync::Arc;

/// 工厂配置更新回调：`(实例, 配置)`
pub type UpdateCallback = Arc<dyn Fn(&Instance, &Properties) -> CallbackResult + Send + Sync>;
