//! 切面、适配器和工厂配置适配器的组件创建策略

use super::filter_service::{Decorator, DecoratorKind, DecoratorShared, FanOut, FilterService, ServiceParams};
use super::keyed::{ComponentCreator, KeyedFanOut};
use super::UpdateCallback;
use crate::component::Component;
use crate::dependencies::{ServiceDependency, ServiceFilter};
use crate::manager::DependencyManager;
use dm_abstractions::{Dependency, Instance};
use dm_common::{
    properties, CallbackError, ComponentError, ComponentResult, Properties, ServiceId,
    ServiceReference,
};
use serde_json::json;
use std::any::Any;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::debug;

/// 为每个原始服务创建切面组件
struct AspectCreator<V> {
    shared: Arc<DecoratorShared>,
    interface: String,
    ranking: i64,
    _marker: PhantomData<fn() -> V>,
}

impl<V> ComponentCreator<ServiceId, ServiceParams> for AspectCreator<V>
where
    V: Any + Send + Sync,
{
    fn create(&self, key: &ServiceId, params: &ServiceParams) -> ComponentResult<Component> {
        let component = self.shared.build_component()?;
        let props = self.service_properties(key, params, &component.service_properties());
        component.set_interface(&self.interface, props)?;
        let original: Arc<dyn Dependency> = ServiceDependency::builder(self.interface.clone())
            .with_service_id(*key)
            .with_required(true)
            .with_auto_config::<V>()
            .build();
        component.add(original)?;
        debug!("为服务 {} 创建切面组件 {}", key, component.id());
        Ok(component)
    }

    fn update(&self, key: &ServiceId, params: &ServiceParams, component: &Component) -> ComponentResult<()> {
        let base = self.shared.template.service_properties();
        component.set_service_properties(self.service_properties(key, params, &base));
        Ok(())
    }

    fn service_properties(&self, key: &ServiceId, params: &ServiceParams, base: &Properties) -> Properties {
        let mut props = properties::transferable_properties(&params.reference.properties);
        properties::overlay(&mut props, base);
        props.insert(properties::SERVICE_RANKING.to_string(), json!(self.ranking));
        props.insert(properties::ASPECT_MARKER.to_string(), json!(key));
        props
    }

    fn dependencies(&self) -> Vec<Arc<dyn Dependency>> {
        self.shared.dependencies()
    }
}

/// 为每个被适配的服务创建适配器组件
struct AdapterCreator<V> {
    shared: Arc<DecoratorShared>,
    adaptee: String,
    _marker: PhantomData<fn() -> V>,
}

impl<V> ComponentCreator<ServiceId, ServiceParams> for AdapterCreator<V>
where
    V: Any + Send + Sync,
{
    fn create(&self, key: &ServiceId, params: &ServiceParams) -> ComponentResult<Component> {
        let component = self.shared.build_component()?;
        component.set_service_properties(self.service_properties(
            key,
            params,
            &component.service_properties(),
        ));
        let adaptee: Arc<dyn Dependency> = ServiceDependency::builder(self.adaptee.clone())
            .with_service_id(*key)
            .with_required(true)
            .with_auto_config::<V>()
            .build();
        component.add(adaptee)?;
        debug!("为服务 {} 创建适配器组件 {}", key, component.id());
        Ok(component)
    }

    fn update(&self, key: &ServiceId, params: &ServiceParams, component: &Component) -> ComponentResult<()> {
        let base = self.shared.template.service_properties();
        component.set_service_properties(self.service_properties(key, params, &base));
        Ok(())
    }

    fn service_properties(&self, _key: &ServiceId, params: &ServiceParams, base: &Properties) -> Properties {
        let mut props = properties::transferable_properties(&params.reference.properties);
        properties::overlay(&mut props, base);
        props
    }

    fn dependencies(&self) -> Vec<Arc<dyn Dependency>> {
        self.shared.dependencies()
    }
}

/// 每个工厂配置创建一个组件
struct FactoryCreator {
    shared: Arc<DecoratorShared>,
    update: UpdateCallback,
    propagate: bool,
}

impl FactoryCreator {
    fn invoke_update(&self, pid: &str, instance: &Instance, settings: &Properties) -> ComponentResult<()> {
        let outcome = catch_unwind(AssertUnwindSafe(|| (self.update)(instance, settings)));
        let failure = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e,
            Err(payload) => CallbackError::msg(
                "updated",
                crate::callback::panic_message(payload.as_ref()),
            ),
        };
        Err(ComponentError::InstantiationFailed {
            component: pid.to_string(),
            source: Box::new(failure),
        })
    }
}

impl ComponentCreator<String, Properties> for FactoryCreator {
    fn create(&self, pid: &String, settings: &Properties) -> ComponentResult<Component> {
        let component = self.shared.build_component()?;
        let instance = component.instantiate_component().ok_or_else(|| {
            ComponentError::InstantiationFailed {
                component: pid.clone(),
                source: "无法创建组件实例".into(),
            }
        })?;
        self.invoke_update(pid, &instance, settings)?;
        let base = component.service_properties();
        component.set_service_properties(self.service_properties(pid, settings, &base));
        debug!("为配置 {} 创建组件 {}", pid, component.id());
        Ok(component)
    }

    fn update(&self, pid: &String, settings: &Properties, component: &Component) -> ComponentResult<()> {
        // 必需依赖缺失时实例已被丢弃，没有可通知的实例
        match component.instance() {
            Some(instance) => self.invoke_update(pid, &instance, settings)?,
            None => debug!("配置 {} 的组件 {} 当前没有实例，跳过 updated 回调", pid, component.id()),
        }
        if self.propagate && !component.services().is_empty() {
            let base = self.shared.template.service_properties();
            component.set_service_properties(self.service_properties(pid, settings, &base));
        }
        Ok(())
    }

    fn service_properties(&self, _pid: &String, settings: &Properties, base: &Properties) -> Properties {
        let mut props = base.clone();
        if self.propagate {
            properties::overlay(&mut props, &properties::public_properties(settings));
        }
        props
    }

    fn dependencies(&self) -> Vec<Arc<dyn Dependency>> {
        self.shared.dependencies()
    }
}

/// 跟踪被装饰服务的内部依赖，事件转交给装饰器
fn decorated_services(interface: &str, filter: Option<ServiceFilter>) -> Arc<dyn Dependency> {
    let builder = ServiceDependency::builder(interface)
        .with_required(false)
        .on_added(|instance, reference, service| {
            Decorator::of(instance)?
                .service_added(reference, service)
                .map_err(|e| CallbackError::new("added", e))
        })
        .on_changed(|instance, reference, service| {
            Decorator::of(instance)?
                .service_changed(reference, service)
                .map_err(|e| CallbackError::new("changed", e))
        })
        .on_removed(|instance, reference, _service| {
            Decorator::of(instance)?
                .service_removed(reference)
                .map_err(|e| CallbackError::new("removed", e))
        });
    let builder = match filter {
        Some(filter) => builder.with_filter(move |reference: &ServiceReference| filter(reference)),
        None => builder,
    };
    builder.build()
}

pub(crate) fn aspect_service<V>(manager: &DependencyManager, interface: String, ranking: i64) -> FilterService
where
    V: Any + Send + Sync,
{
    let shared = DecoratorShared::new(manager);
    let creator = AspectCreator::<V> {
        shared: Arc::clone(&shared),
        interface: interface.clone(),
        ranking,
        _marker: PhantomData,
    };
    let decorator = Decorator::new(
        DecoratorKind::Aspect {
            interface: interface.clone(),
            ranking,
        },
        FanOut::Service(KeyedFanOut::new(manager.downgrade(), Box::new(creator))),
    );
    let originals: ServiceFilter = Arc::new(|reference: &ServiceReference| {
        reference.property(properties::ASPECT_MARKER).is_none()
    });
    let tracker = decorated_services(&interface, Some(originals));
    FilterService::new(manager, shared, decorator, Some(tracker))
}

pub(crate) fn adapter_service<V>(manager: &DependencyManager, adaptee: String, filter: ServiceFilter) -> FilterService
where
    V: Any + Send + Sync,
{
    let shared = DecoratorShared::new(manager);
    let creator = AdapterCreator::<V> {
        shared: Arc::clone(&shared),
        adaptee: adaptee.clone(),
        _marker: PhantomData,
    };
    let decorator = Decorator::new(
        DecoratorKind::Adapter {
            adaptee: adaptee.clone(),
        },
        FanOut::Service(KeyedFanOut::new(manager.downgrade(), Box::new(creator))),
    );
    let tracker = decorated_services(&adaptee, Some(filter));
    FilterService::new(manager, shared, decorator, Some(tracker))
}

pub(crate) fn factory_configuration_adapter_service(
    manager: &DependencyManager,
    factory_pid: String,
    update: UpdateCallback,
    propagate: bool,
) -> FilterService {
    let shared = DecoratorShared::new(manager);
    let creator = FactoryCreator {
        shared: Arc::clone(&shared),
        update,
        propagate,
    };
    let decorator = Decorator::new(
        DecoratorKind::FactoryConfiguration {
            factory_pid,
            propagate,
        },
        FanOut::Configuration(KeyedFanOut::new(manager.downgrade(), Box::new(creator))),
    );
    FilterService::new(manager, shared, decorator, None)
}
