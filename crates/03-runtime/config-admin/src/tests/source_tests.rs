//! 配置文件源和目录监控测试

use super::{init_tracing, RecordingService};
use crate::{
    apply_source, ConfigurationKey, ConfigurationSource, DirectoryWatcher, FileConfigurationSource,
    InMemoryConfigurationAdmin,
};
use dm_abstractions::{ConfigurationAdmin, ManagedService};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// 测试从目录加载单例和工厂配置
#[tokio::test]
async fn test_directory_source_loads_records() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("app.http.toml"), "port = 8080\n").unwrap();
    std::fs::write(dir.path().join("worker.pool-a.json"), r#"{ "size": 2 }"#).unwrap();
    std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

    let source = FileConfigurationSource::new(dir.path());
    let records = source.load().await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(
        records[0].key,
        ConfigurationKey::Singleton {
            pid: "app.http".to_string()
        }
    );
    assert_eq!(records[0].properties["port"], json!(8080));
    assert_eq!(records[1].key.pid(), "worker.pool.a");
}

/// 测试把目录中的配置写入配置管理服务
#[tokio::test]
async fn test_apply_source_to_admin() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("app.http.toml"), "port = 8080\n").unwrap();
    std::fs::write(dir.path().join("worker.pool-a.toml"), "size = 2\n").unwrap();
    std::fs::write(dir.path().join("broken.toml"), "port = = 1\n").unwrap();

    let admin = InMemoryConfigurationAdmin::new();
    let source = FileConfigurationSource::new(dir.path());
    let result = apply_source(&source, &admin).await;
    assert!(result.is_err(), "无法解析的文件应该让加载失败");

    std::fs::remove_file(dir.path().join("broken.toml")).unwrap();
    let applied = apply_source(&source, &admin).await.unwrap();
    assert_eq!(applied, 2);
    assert_eq!(admin.list(), vec!["app.http".to_string(), "worker.pool.a".to_string()]);
    assert_eq!(admin.factory_configurations("worker.pool"), vec!["worker.pool.a".to_string()]);
}

/// 测试目录监控把文件修改和删除应用到配置
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_applies_file_changes() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let admin = InMemoryConfigurationAdmin::new();
    admin.start().unwrap();
    let service = Arc::new(RecordingService::default());
    admin
        .add_managed_service("app.http", service.clone() as Arc<dyn ManagedService>)
        .unwrap();

    let shared: Arc<dyn ConfigurationAdmin> = Arc::new(admin.clone());
    let mut watcher = DirectoryWatcher::start(dir.path(), shared).unwrap();
    assert!(watcher.is_watching());

    let file = dir.path().join("app.http.toml");
    std::fs::write(&file, "port = 8080\n").unwrap();
    let created = wait_until(|| {
        admin.get("app.http").and_then(|p| p.get("port").cloned()) == Some(json!(8080))
    })
    .await;
    assert!(created, "配置应该随文件创建出现");

    std::fs::remove_file(&file).unwrap();
    let deleted = wait_until(|| admin.get("app.http").is_none()).await;
    assert!(deleted, "配置应该随文件删除消失");

    admin.flush().await.unwrap();
    assert!(service.received.lock().last().unwrap().is_none());

    watcher.stop().await;
    assert!(!watcher.is_watching());
    admin.stop().await.unwrap();
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
