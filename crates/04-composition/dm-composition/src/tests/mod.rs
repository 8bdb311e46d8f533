
use dm_abstractions::{ComponentContext, Injectable, Lifecycle};
use dm_common::{CallbackError, CallbackResult};
use dm_impl::{Component, DependencyManager};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub(crate) type Events = Arc<Mutex<Vec<String>>>;

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// 记录生命周期回调的 HTTP 服务
pub(crate) struct HttpServer {
    events: Events,
}

impl Lifecycle for HttpServer {
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

impl Injectable for HttpServer {}

/// 依赖 `app.http` 配置的 HTTP 服务组件
pub(crate) fn http_server(manager: &DependencyManager) -> (Component, Events) {
    let events: Events = Arc::default();
    let updates = events.clone();
    let dependency = manager
        .create_configuration_dependency("app.http")
        .on_updated(move |_, settings| {
            let Some(settings) = settings else {
                updates.lock().push("deleted".to_string());
                return Ok(());
            };
            let port = settings
                .get("port")
                .and_then(serde_json::Value::as_u64)
                .ok_or_else(|| CallbackError::msg("updated", "缺少 port"))?;
            updates.lock().push(format!("port={port}"));
            Ok(())
        })
        .build();

    let recorded = events.clone();
    let component = manager.create_component();
    component
        .set_interface("HttpServer", Default::default())
        .unwrap()
        .set_implementation_with(move || HttpServer {
            events: recorded.clone(),
        })
        .unwrap()
        .add(dependency)
        .unwrap();
    (component, events)
}

pub(crate) async fn wait_until<F>(condition: F) -> bool
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
