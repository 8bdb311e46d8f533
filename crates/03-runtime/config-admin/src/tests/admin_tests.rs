//! 配置管理服务测试

use super::{init_tracing, PanickingService, RecordingFactory, RecordingService};
use crate::{ConfigurationEventType, InMemoryConfigurationAdmin};
use dm_abstractions::{ConfigurationAdmin, ManagedService, ManagedServiceFactory};
use dm_common::{properties, ConfigError};
use serde_json::json;
use std::sync::Arc;

fn started() -> InMemoryConfigurationAdmin {
    init_tracing();
    let admin = InMemoryConfigurationAdmin::new();
    admin.start().unwrap();
    admin
}

/// 测试单例配置按顺序交付，并附带 service.pid
#[tokio::test]
async fn test_singleton_delivery_in_order() {
    let admin = started();
    let service = Arc::new(RecordingService::default());
    admin
        .add_managed_service("app.http", service.clone() as Arc<dyn ManagedService>)
        .unwrap();

    admin
        .update("app.http", properties::properties([("port", json!(8080))]))
        .unwrap();
    admin
        .update("app.http", properties::properties([("port", json!(9090))]))
        .unwrap();
    admin.delete("app.http").unwrap();
    admin.flush().await.unwrap();

    let received = service.received.lock().clone();
    assert_eq!(received.len(), 3);
    let first = received[0].as_ref().unwrap();
    assert_eq!(first["port"], json!(8080));
    assert_eq!(first[properties::SERVICE_PID], json!("app.http"));
    assert_eq!(received[1].as_ref().unwrap()["port"], json!(9090));
    assert!(received[2].is_none());
    assert!(admin.get("app.http").is_none());
}

/// 测试新登记的受管服务收到当前配置
#[tokio::test]
async fn test_late_service_receives_current_configuration() {
    let admin = started();
    admin
        .update("app.db", properties::properties([("url", json!("sqlite::memory:"))]))
        .unwrap();

    let service = Arc::new(RecordingService::default());
    let target: Arc<dyn ManagedService> = service.clone();
    admin.add_managed_service("app.db", Arc::clone(&target)).unwrap();
    admin.flush().await.unwrap();
    assert_eq!(service.received.lock().len(), 1);

    let duplicate = admin.add_managed_service("app.db", Arc::clone(&target));
    assert!(matches!(duplicate, Err(ConfigError::AlreadyRegistered { .. })));

    assert!(admin.remove_managed_service("app.db", &target));
    admin
        .update("app.db", properties::properties([("url", json!("postgres://"))]))
        .unwrap();
    admin.flush().await.unwrap();
    assert_eq!(service.received.lock().len(), 1);
}

/// 测试停止期间的变更在重新启动后交付
#[tokio::test]
async fn test_deliveries_queue_while_stopped() {
    let admin = InMemoryConfigurationAdmin::new();
    assert!(admin.flush().await.is_err());

    let service = Arc::new(RecordingService::default());
    admin
        .add_managed_service("queued", service.clone() as Arc<dyn ManagedService>)
        .unwrap();
    admin
        .update("queued", properties::properties([("n", json!(1))]))
        .unwrap();
    assert!(service.received.lock().is_empty());

    admin.start().unwrap();
    admin.flush().await.unwrap();
    assert_eq!(service.received.lock().len(), 1);

    admin.stop().await.unwrap();
    assert!(!admin.is_running());
    admin
        .update("queued", properties::properties([("n", json!(2))]))
        .unwrap();
    admin.start().unwrap();
    admin.flush().await.unwrap();
    assert_eq!(service.received.lock().len(), 2);
    admin.stop().await.unwrap();
}

/// 测试工厂配置的创建、更新、删除和迟到的工厂
#[tokio::test]
async fn test_factory_configurations() {
    let admin = started();
    let early = Arc::new(RecordingFactory::default());
    admin
        .add_managed_service_factory("worker.pool", early.clone() as Arc<dyn ManagedServiceFactory>)
        .unwrap();

    let named = admin
        .update_factory_configuration("worker.pool", "a", properties::properties([("size", json!(2))]))
        .unwrap();
    assert_eq!(named, "worker.pool.a");
    let generated = admin
        .create_factory_configuration("worker.pool", properties::properties([("size", json!(4))]))
        .unwrap();
    assert!(generated.starts_with("worker.pool."));
    admin
        .update(&named, properties::properties([("size", json!(3))]))
        .unwrap();
    admin.flush().await.unwrap();

    assert_eq!(
        early.events.lock().clone(),
        vec![
            "updated worker.pool.a size=2".to_string(),
            format!("updated {generated} size=4"),
            "updated worker.pool.a size=3".to_string(),
        ]
    );
    assert_eq!(admin.factory_configurations("worker.pool").len(), 2);
    assert_eq!(
        admin.get(&named).unwrap()[properties::FACTORY_PID],
        json!("worker.pool")
    );

    let late = Arc::new(RecordingFactory::default());
    admin
        .add_managed_service_factory("worker.pool", late.clone() as Arc<dyn ManagedServiceFactory>)
        .unwrap();
    admin.delete(&named).unwrap();
    admin.flush().await.unwrap();

    let late_events = late.events.lock().clone();
    assert_eq!(late_events.len(), 3);
    assert_eq!(late_events.last().unwrap(), "deleted worker.pool.a");
    assert_eq!(early.events.lock().last().unwrap(), "deleted worker.pool.a");
}

/// 测试删除不存在的配置和空名称
#[tokio::test]
async fn test_invalid_operations() {
    let admin = started();
    assert!(matches!(admin.delete("missing"), Err(ConfigError::NotFound { .. })));
    assert!(admin
        .update_factory_configuration("worker.pool", "", Default::default())
        .is_err());
    assert!(admin.list().is_empty());
}

/// 测试配置事件广播，包括目标拒绝配置
#[tokio::test]
async fn test_events_report_updates_and_rejections() {
    let admin = started();
    let mut events = admin.subscribe();
    admin
        .add_managed_service("strict", RecordingService::rejecting() as Arc<dyn ManagedService>)
        .unwrap();

    admin
        .update("strict", properties::properties([("x", json!(1))]))
        .unwrap();
    admin.flush().await.unwrap();
    admin.delete("strict").unwrap();

    let kinds: Vec<ConfigurationEventType> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|event| event.event_type)
        .collect();
    assert_eq!(
        kinds,
        vec![
            ConfigurationEventType::Updated,
            ConfigurationEventType::DeliveryFailed,
            ConfigurationEventType::Deleted,
        ]
    );
    assert!(admin.last_updated("strict").is_none());
}

/// 测试目标回调 panic 时分发任务继续交付后续配置
#[tokio::test]
async fn test_panicking_target_does_not_stop_deliveries() {
    let admin = started();
    let mut events = admin.subscribe();
    admin
        .add_managed_service("bad", Arc::new(PanickingService) as Arc<dyn ManagedService>)
        .unwrap();
    let good = Arc::new(RecordingService::default());
    admin
        .add_managed_service("good", good.clone() as Arc<dyn ManagedService>)
        .unwrap();

    admin
        .update("bad", properties::properties([("n", json!(1))]))
        .unwrap();
    admin
        .update("good", properties::properties([("n", json!(2))]))
        .unwrap();
    admin.flush().await.unwrap();
    assert_eq!(good.received.lock().len(), 1);

    let failed: Vec<String> = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|event| event.event_type == ConfigurationEventType::DeliveryFailed)
        .map(|event| event.pid)
        .collect();
    assert_eq!(failed, vec!["bad".to_string()]);

    admin.stop().await.unwrap();
    admin.start().unwrap();
    admin
        .update("good", properties::properties([("n", json!(3))]))
        .unwrap();
    admin.flush().await.unwrap();
    assert_eq!(good.received.lock().len(), 2);
    admin.stop().await.unwrap();
}
