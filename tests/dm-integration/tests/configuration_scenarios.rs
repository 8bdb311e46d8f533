//! 配置管理服务与依赖管理运行时的集成测试
use dm_abstractions::{ComponentContext, ConfigurationAdmin, Injectable, Lifecycle, ServiceRegistry};
use dm_common::{properties, CallbackError, CallbackResult, Properties};
use dm_composition::DmRuntime;
use dm_impl::FilterService;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

type Events = Arc<Mutex<Vec<String>>>;

fn take(events: &Events) -> Vec<String> {
    std::mem::take(&mut *events.lock())
}

/// 工作线程池
struct Worker {
    events: Events,
}

impl Lifecycle for Worker {
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

impl Injectable for Worker {}

fn worker_pool(runtime: &DmRuntime, log: &Events) -> anyhow::Result<FilterService> {
    let updates = log.clone();
    let adapter = runtime.manager().create_factory_configuration_adapter_service(
        "worker.pool",
        move |_, settings: &Properties| {
            let size = settings
                .get("size")
                .and_then(serde_json::Value::as_u64)
                .ok_or_else(|| CallbackError::msg("updated", "缺少 size"))?;
            updates.lock().push(format!("size={size}"));
            Ok(())
        },
        true,
    );
    let recorded = log.clone();
    adapter
        .set_interface("Worker", Default::default())?
        .set_implementation_with(move || Worker {
            events: recorded.clone(),
        })?;
    Ok(adapter)
}

fn worker_size(runtime: &DmRuntime) -> Option<serde_json::Value> {
    runtime
        .registry()
        .get_service_references("Worker")
        .into_iter()
        .next()
        .and_then(|reference| reference.property("size").cloned())
}

/// 测试工厂配置更新两次只调用 update，不会重建组件
#[tokio::test]
async fn test_factory_configuration_updated_twice() -> anyhow::Result<()> {
    let runtime = DmRuntime::builder().bundle(3, "workers").build()?;
    runtime.start().await?;
    let log = Events::default();
    let adapter = worker_pool(&runtime, &log)?;
    runtime.manager().add(adapter.clone());

    let admin = runtime.configuration_admin();
    let pid = admin.update_factory_configuration(
        "worker.pool",
        "a",
        properties::properties([("size", json!(2))]),
    )?;
    runtime.settle().await?;
    assert_eq!(take(&log), vec!["size=2", "init", "start"]);
    let first = adapter.components();
    assert_eq!(first.len(), 1);
    assert_eq!(worker_size(&runtime), Some(json!(2)));

    admin.update(&pid, properties::properties([("size", json!(3))]))?;
    admin.update(&pid, properties::properties([("size", json!(4))]))?;
    runtime.settle().await?;
    assert_eq!(take(&log), vec!["size=3", "size=4"]);
    let second = adapter.components();
    assert_eq!(second.len(), 1);
    assert!(second[0].ptr_eq(&first[0]));
    assert_eq!(worker_size(&runtime), Some(json!(4)));

    admin.delete(&pid)?;
    runtime.settle().await?;
    assert_eq!(take(&log), vec!["stop", "destroy"]);
    assert!(adapter.components().is_empty());
    assert_eq!(worker_size(&runtime), None);

    runtime.stop().await?;
    Ok(())
}

/// 测试被 update 拒绝的工厂配置不会创建组件，且产生交付失败事件
#[tokio::test]
async fn test_rejected_factory_configuration_reports_failure() -> anyhow::Result<()> {
    let runtime = DmRuntime::builder().build()?;
    runtime.start().await?;
    let log = Events::default();
    let adapter = worker_pool(&runtime, &log)?;
    runtime.manager().add(adapter.clone());

    let mut events = runtime.configuration_admin().subscribe();
    runtime.configuration_admin().update_factory_configuration(
        "worker.pool",
        "broken",
        properties::properties([("threads", json!(8))]),
    )?;
    runtime.settle().await?;

    assert!(adapter.components().is_empty());
    assert!(take(&log).is_empty());
    let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|event| event.event_type)
        .collect();
    assert_eq!(
        kinds,
        vec![
            config_admin::ConfigurationEventType::Updated,
            config_admin::ConfigurationEventType::DeliveryFailed,
        ]
    );

    runtime.stop().await?;
    Ok(())
}

/// 测试配置目录中的工厂配置在启动时创建组件，停止时全部清理
#[tokio::test]
async fn test_configuration_directory_creates_factory_components() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("worker.pool-a.toml"), "size = 1\n")?;
    std::fs::write(dir.path().join("worker.pool-b.json"), r#"{ "size": 2 }"#)?;

    let runtime = DmRuntime::builder().config_directory(dir.path()).build()?;
    runtime.start().await?;
    let log = Events::default();
    let adapter = worker_pool(&runtime, &log)?;
    runtime.manager().add(adapter.clone());
    runtime.settle().await?;

    assert_eq!(adapter.components().len(), 2);
    assert_eq!(runtime.registry().get_service_references("Worker").len(), 2);
    let report = runtime.diagnostics();
    assert_eq!(report.summary.configurations, 2);
    assert_eq!(report.summary.services, 2);

    runtime.stop().await?;
    assert!(adapter.components().is_empty());
    assert!(runtime.registry().get_service_references("Worker").is_empty());
    Ok(())
}

/// 测试热重载：修改文件更新已有组件，删除文件移除组件
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hot_reload_factory_configuration() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("worker.pool-a.toml");
    std::fs::write(&file, "size = 1\n")?;

    let runtime = DmRuntime::builder()
        .config_directory(dir.path())
        .enable_hot_reload(true)
        .build()?;
    runtime.start().await?;
    let log = Events::default();
    let adapter = worker_pool(&runtime, &log)?;
    runtime.manager().add(adapter.clone());
    runtime.settle().await?;
    assert_eq!(worker_size(&runtime), Some(json!(1)));

    std::fs::write(&file, "size = 5\n")?;
    assert!(wait_until(|| worker_size(&runtime) == Some(json!(5))).await);
    assert_eq!(adapter.components().len(), 1);

    std::fs::remove_file(&file)?;
    assert!(wait_until(|| adapter.components().is_empty()).await);

    runtime.stop().await?;
    Ok(())
}

async fn wait_until<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
