//! 跨 crate 的组件生命周期集成测试：服务依赖、可选依赖和切面
use dm_abstractions::{
    ComponentContext, Dependency, InjectionTable, Injectable, Lifecycle, ServiceRegistry,
};
use dm_common::{properties, CallbackResult, Properties};
use dm_composition::DmRuntime;
use dm_impl::Phase;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::sync::Arc;

type Events = Arc<Mutex<Vec<String>>>;

fn take(events: &Events) -> Vec<String> {
    std::mem::take(&mut *events.lock())
}

/// 日志服务
struct LogService {
    name: String,
}

/// 依赖日志服务的报表组件
struct Reporter {
    events: Events,
    log: RwLock<Option<Arc<LogService>>>,
}

impl Reporter {
    fn new(events: Events) -> Self {
        Self {
            events,
            log: RwLock::new(None),
        }
    }

    fn log_name(&self) -> Option<String> {
        self.log.read().as_ref().map(|log| log.name.clone())
    }
}

impl Lifecycle for Reporter {
    fn init(&self, _ctx: &dyn ComponentContext) -> CallbackResult {
        self.events.lock().push("init".to_string());
        Ok(())
    }

    fn start(&self, _ctx: &dyn ComponentContext) -> CallbackResult {
        self.events.lock().push("start".to_string());
        Ok(())
    }

    fn stop(&self, _ctx: &dyn ComponentContext) -> CallbackResult {
        self.events.lock().push("stop".to_string());
        Ok(())
    }

    fn destroy(&self, _ctx: &dyn ComponentContext) -> CallbackResult {
        self.events.lock().push("destroy".to_string());
        Ok(())
    }
}

impl Injectable for Reporter {
    fn injection_table() -> InjectionTable<Self> {
        InjectionTable::new().inject::<LogService, _>(|r: &Reporter, v| *r.log.write() = v)
    }
}

/// 给日志名称加前缀的切面
#[derive(Default)]
struct AuditAspect {
    original: RwLock<Option<Arc<LogService>>>,
}

impl Lifecycle for AuditAspect {}

impl Injectable for AuditAspect {
    fn injection_table() -> InjectionTable<Self> {
        InjectionTable::new().inject::<LogService, _>(|a: &AuditAspect, v| *a.original.write() = v)
    }
}

fn build_runtime() -> anyhow::Result<DmRuntime> {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
    Ok(DmRuntime::builder().bundle(1, "reporting").build()?)
}

fn register_log(runtime: &DmRuntime, name: &str, props: Properties) -> anyhow::Result<Arc<dyn dm_abstractions::ServiceRegistration>> {
    let registration = runtime.registry().register_service(
        7,
        &["LogService".to_string()],
        Arc::new(LogService {
            name: name.to_string(),
        }),
        props,
    )?;
    Ok(registration)
}

/// 测试必需服务依赖驱动组件经过 Inactive、WaitingForRequired、Bound 再回到 WaitingForRequired
#[tokio::test]
async fn test_required_service_scenario() -> anyhow::Result<()> {
    let runtime = build_runtime()?;
    runtime.start().await?;
    let manager = runtime.manager();

    let log = Events::default();
    let recorded = log.clone();
    let component = manager.create_component();
    component
        .set_interface("Reporter", Default::default())?
        .set_implementation_with(move || Reporter::new(recorded.clone()))?
        .add(
            manager
                .create_service_dependency("LogService")
                .with_required(true)
                .with_auto_config::<LogService>()
                .build(),
        )?;
    assert_eq!(component.phase(), Phase::Inactive);

    manager.add(component.clone());
    assert_eq!(component.phase(), Phase::WaitingForRequired);
    assert!(take(&log).is_empty());
    assert!(runtime.registry().get_service_references("Reporter").is_empty());

    let registration = register_log(&runtime, "primary", Properties::new())?;
    assert_eq!(component.phase(), Phase::Bound);
    assert_eq!(take(&log), vec!["init", "start"]);
    let reporter = component
        .instance()
        .and_then(|i| i.downcast::<Reporter>())
        .ok_or_else(|| anyhow::anyhow!("组件实例不可用"))?;
    assert_eq!(reporter.log_name().as_deref(), Some("primary"));
    assert_eq!(runtime.registry().get_service_references("Reporter").len(), 1);

    registration.unregister()?;
    assert_eq!(component.phase(), Phase::WaitingForRequired);
    assert_eq!(take(&log), vec!["stop", "destroy"]);
    assert!(runtime.registry().get_service_references("Reporter").is_empty());

    runtime.stop().await?;
    Ok(())
}

/// 测试组件绑定后添加的可选依赖立即调用 added 回调
#[tokio::test]
async fn test_optional_dependency_added_while_bound() -> anyhow::Result<()> {
    let runtime = build_runtime()?;
    runtime.start().await?;
    let manager = runtime.manager();

    let log = Events::default();
    let recorded = log.clone();
    let component = manager.create_component();
    component.set_implementation_with(move || Reporter::new(recorded.clone()))?;
    manager.add(component.clone());
    assert_eq!(take(&log), vec!["init", "start"]);

    let _registration = register_log(&runtime, "primary", Properties::new())?;
    let added = log.clone();
    let dependency: Arc<dyn Dependency> = manager
        .create_service_dependency("LogService")
        .with_auto_config::<LogService>()
        .on_added(move |_, reference, _| {
            added.lock().push(format!("added {}", reference.id));
            Ok(())
        })
        .build();
    component.add(dependency)?;

    let events = take(&log);
    assert_eq!(events.len(), 1);
    assert!(events[0].starts_with("added "));
    assert_eq!(component.phase(), Phase::Bound);
    let reporter = component
        .instance()
        .and_then(|i| i.downcast::<Reporter>())
        .ok_or_else(|| anyhow::anyhow!("组件实例不可用"))?;
    assert_eq!(reporter.log_name().as_deref(), Some("primary"));

    runtime.stop().await?;
    Ok(())
}

/// 测试消费者绑定到排名更高的切面，切面转发到原始服务
#[tokio::test]
async fn test_consumer_binds_to_aspect() -> anyhow::Result<()> {
    let runtime = build_runtime()?;
    runtime.start().await?;
    let manager = runtime.manager();

    let original = register_log(&runtime, "primary", properties::properties([("level", json!("warn"))]))?;
    let aspect = manager.create_aspect_service::<LogService>("LogService", 10);
    aspect
        .set_implementation::<AuditAspect>()?
        .set_export(|aspect: Arc<AuditAspect>| LogService {
            name: format!(
                "audited:{}",
                aspect
                    .original
                    .read()
                    .as_ref()
                    .map(|log| log.name.clone())
                    .unwrap_or_default()
            ),
        })?;
    manager.add(aspect.clone());
    assert_eq!(aspect.components().len(), 1);

    let log = Events::default();
    let recorded = log.clone();
    let consumer = manager.create_component();
    consumer
        .set_implementation_with(move || Reporter::new(recorded.clone()))?
        .add(
            manager
                .create_service_dependency("LogService")
                .with_required(true)
                .with_auto_config::<LogService>()
                .build(),
        )?;
    manager.add(consumer.clone());
    assert_eq!(consumer.phase(), Phase::Bound);
    let reporter = consumer
        .instance()
        .and_then(|i| i.downcast::<Reporter>())
        .ok_or_else(|| anyhow::anyhow!("组件实例不可用"))?;
    assert_eq!(reporter.log_name().as_deref(), Some("audited:primary"));

    let best = runtime
        .registry()
        .get_service_references("LogService")
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("没有 LogService"))?;
    assert_eq!(best.ranking(), 10);
    assert_eq!(best.property("level"), Some(&json!("warn")));

    original.unregister()?;
    assert!(aspect.components().is_empty());
    assert_eq!(consumer.phase(), Phase::WaitingForRequired);
    assert_eq!(take(&log), vec!["init", "start", "stop", "destroy"]);

    runtime.stop().await?;
    Ok(())
}
