//! 内存配置管理服务
//!
//! 配置保存在内存中。每次变更都会在调用线程上确定要通知的目标，
//! 然后把分发请求放进一个无界通道，由 [`InMemoryConfigurationAdmin::start`]
//! 启动的 tokio 任务按入队顺序逐个交付。目标拒绝配置或在回调中 panic 时只记录日志并发出
//! [`ConfigurationEventType::DeliveryFailed`](crate::ConfigurationEventType) 事件，分发任务继续运行。

use crate::events::ConfigurationEvent;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dm_abstractions::{ConfigurationAdmin, ManagedService, ManagedServiceFactory};
use dm_common::{properties, ConfigError, Properties};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const EVENT_SOURCE: &str = "config-admin";

/// 已保存的配置
#[derive(Debug, Clone)]
struct StoredConfiguration {
    factory_pid: Option<String>,
    properties: Properties,
    updated_at: DateTime<Utc>,
}

impl StoredConfiguration {
    /// 交付给目标的属性，附带 `service.pid` 和 `service.factoryPid`
    fn delivered(&self, pid: &str) -> Properties {
        let mut props = self.properties.clone();
        props.insert(properties::SERVICE_PID.to_string(), json!(pid));
        if let Some(factory_pid) = &self.factory_pid {
            props.insert(properties::FACTORY_PID.to_string(), json!(factory_pid));
        }
        props
    }
}

enum Delivery {
    Updated {
        pid: String,
        properties: Option<Properties>,
        targets: Vec<Arc<dyn ManagedService>>,
    },
    FactoryUpdated {
        factory_pid: String,
        pid: String,
        properties: Properties,
        targets: Vec<Arc<dyn ManagedServiceFactory>>,
    },
    FactoryDeleted {
        factory_pid: String,
        pid: String,
        targets: Vec<Arc<dyn ManagedServiceFactory>>,
    },
    Flush(oneshot::Sender<()>),
    Shutdown,
}

struct AdminInner {
    store: DashMap<String, StoredConfiguration>,
    services: RwLock<Vec<(String, Arc<dyn ManagedService>)>>,
    factories: RwLock<Vec<(String, Arc<dyn ManagedServiceFactory>)>>,
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
    worker: Mutex<Option<JoinHandle<mpsc::UnboundedReceiver<Delivery>>>>,
    events: broadcast::Sender<ConfigurationEvent>,
}

/// 内存配置管理服务
///
/// 克隆得到的句柄共享同一份状态。
#[derive(Clone)]
pub struct InMemoryConfigurationAdmin {
    inner: Arc<AdminInner>,
}

impl InMemoryConfigurationAdmin {
    /// 创建配置管理服务，分发任务需要调用 [`start`](Self::start) 后才会运行
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(AdminInner {
                store: DashMap::new(),
                services: RwLock::new(Vec::new()),
                factories: RwLock::new(Vec::new()),
                sender,
                receiver: Mutex::new(Some(receiver)),
                worker: Mutex::new(None),
                events,
            }),
        }
    }

    /// 启动分发任务，必须在 tokio 运行时中调用
    pub fn start(&self) -> Result<(), ConfigError> {
        let mut worker = self.inner.worker.lock();
        if worker.is_some() {
            debug!("配置分发任务已经在运行");
            return Ok(());
        }
        let receiver = self
            .inner
            .receiver
            .lock()
            .take()
            .ok_or_else(|| ConfigError::DispatchError {
                message: "分发通道不可用".to_string(),
            })?;
        let events = self.inner.events.clone();
        *worker = Some(tokio::spawn(run_deliveries(receiver, events)));
        info!("配置分发任务已启动");
        Ok(())
    }

    /// 交付完已入队的请求后停止分发任务
    ///
    /// 停止后的变更继续排队，再次启动时交付。
    pub async fn stop(&self) -> Result<(), ConfigError> {
        let Some(handle) = self.inner.worker.lock().take() else {
            return Ok(());
        };
        self.enqueue(Delivery::Shutdown);
        let receiver = handle.await.map_err(|e| ConfigError::DispatchError {
            message: format!("分发任务异常退出: {}", e),
        })?;
        *self.inner.receiver.lock() = Some(receiver);
        info!("配置分发任务已停止");
        Ok(())
    }

    /// 分发任务是否在运行
    pub fn is_running(&self) -> bool {
        self.inner.worker.lock().is_some()
    }

    /// 等待此前入队的全部请求交付完成
    pub async fn flush(&self) -> Result<(), ConfigError> {
        if !self.is_running() {
            return Err(ConfigError::DispatchError {
                message: "分发任务未启动".to_string(),
            });
        }
        let (done, wait) = oneshot::channel();
        self.enqueue(Delivery::Flush(done));
        wait.await.map_err(|_| ConfigError::DispatchError {
            message: "分发任务在完成前退出".to_string(),
        })
    }

    /// 订阅配置变更事件
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigurationEvent> {
        self.inner.events.subscribe()
    }

    /// 配置最近一次修改的时间
    pub fn last_updated(&self, pid: &str) -> Option<DateTime<Utc>> {
        self.inner.store.get(pid).map(|entry| entry.updated_at)
    }

    /// 工厂的全部配置 PID
    pub fn factory_configurations(&self, factory_pid: &str) -> Vec<String> {
        let mut pids: Vec<String> = self
            .inner
            .store
            .iter()
            .filter(|entry| entry.factory_pid.as_deref() == Some(factory_pid))
            .map(|entry| entry.key().clone())
            .collect();
        pids.sort();
        pids
    }

    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    fn enqueue(&self, delivery: Delivery) {
        // 接收端只在 inner 被释放时才会关闭
        if self.inner.sender.send(delivery).is_err() {
            warn!("配置分发通道已关闭");
        }
    }

    fn publish(&self, event: ConfigurationEvent) {
        // 没有订阅者时发送失败，可以忽略
        let _ = self.inner.events.send(event);
    }

    fn services_for(&self, pid: &str) -> Vec<Arc<dyn ManagedService>> {
        self.inner
            .services
            .read()
            .iter()
            .filter(|(p, _)| p == pid)
            .map(|(_, s)| Arc::clone(s))
            .collect()
    }

    fn factories_for(&self, factory_pid: &str) -> Vec<Arc<dyn ManagedServiceFactory>> {
        self.inner
            .factories
            .read()
            .iter()
            .filter(|(p, _)| p == factory_pid)
            .map(|(_, f)| Arc::clone(f))
            .collect()
    }

    fn store_factory(&self, factory_pid: &str, pid: String, properties: Properties) -> String {
        let stored = StoredConfiguration {
            factory_pid: Some(factory_pid.to_string()),
            properties,
            updated_at: Utc::now(),
        };
        let delivered = stored.delivered(&pid);
        self.inner.store.insert(pid.clone(), stored);
        debug!("工厂配置已保存: {} ({})", pid, factory_pid);

        self.enqueue(Delivery::FactoryUpdated {
            factory_pid: factory_pid.to_string(),
            pid: pid.clone(),
            properties: delivered,
            targets: self.factories_for(factory_pid),
        });
        self.publish(ConfigurationEvent::updated(
            pid.clone(),
            Some(factory_pid.to_string()),
            EVENT_SOURCE,
        ));
        pid
    }
}

impl Default for InMemoryConfigurationAdmin {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryConfigurationAdmin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryConfigurationAdmin")
            .field("configurations", &self.inner.store.len())
            .field("services", &self.inner.services.read().len())
            .field("factories", &self.inner.factories.read().len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl ConfigurationAdmin for InMemoryConfigurationAdmin {
    fn update(&self, pid: &str, properties: Properties) -> Result<(), ConfigError> {
        let factory_pid = self
            .inner
            .store
            .get(pid)
            .and_then(|entry| entry.factory_pid.clone());
        if let Some(factory_pid) = factory_pid {
            self.store_factory(&factory_pid, pid.to_string(), properties);
            return Ok(());
        }

        let stored = StoredConfiguration {
            factory_pid: None,
            properties,
            updated_at: Utc::now(),
        };
        let delivered = stored.delivered(pid);
        self.inner.store.insert(pid.to_string(), stored);
        debug!("配置已保存: {}", pid);

        self.enqueue(Delivery::Updated {
            pid: pid.to_string(),
            properties: Some(delivered),
            targets: self.services_for(pid),
        });
        self.publish(ConfigurationEvent::updated(pid, None, EVENT_SOURCE));
        Ok(())
    }

    fn create_factory_configuration(&self, factory_pid: &str, properties: Properties) -> Result<String, ConfigError> {
        let pid = format!("{}.{}", factory_pid, Uuid::new_v4());
        Ok(self.store_factory(factory_pid, pid, properties))
    }

    fn update_factory_configuration(
        &self,
        factory_pid: &str,
        name: &str,
        properties: Properties,
    ) -> Result<String, ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::InvalidProperties {
                message: format!("工厂配置名称为空: {}", factory_pid),
            });
        }
        let pid = format!("{}.{}", factory_pid, name);
        Ok(self.store_factory(factory_pid, pid, properties))
    }

    fn delete(&self, pid: &str) -> Result<(), ConfigError> {
        let (_, stored) = self
            .inner
            .store
            .remove(pid)
            .ok_or_else(|| ConfigError::NotFound { pid: pid.to_string() })?;
        debug!("配置已删除: {}", pid);

        match stored.factory_pid {
            Some(factory_pid) => {
                self.enqueue(Delivery::FactoryDeleted {
                    pid: pid.to_string(),
                    targets: self.factories_for(&factory_pid),
                    factory_pid: factory_pid.clone(),
                });
                self.publish(ConfigurationEvent::deleted(pid, Some(factory_pid), EVENT_SOURCE));
            }
            None => {
                self.enqueue(Delivery::Updated {
                    pid: pid.to_string(),
                    properties: None,
                    targets: self.services_for(pid),
                });
                self.publish(ConfigurationEvent::deleted(pid, None, EVENT_SOURCE));
            }
        }
        Ok(())
    }

    fn get(&self, pid: &str) -> Option<Properties> {
        self.inner.store.get(pid).map(|entry| entry.delivered(pid))
    }

    fn list(&self) -> Vec<String> {
        let mut pids: Vec<String> = self.inner.store.iter().map(|e| e.key().clone()).collect();
        pids.sort();
        pids
    }

    fn add_managed_service(&self, pid: &str, service: Arc<dyn ManagedService>) -> Result<(), ConfigError> {
        {
            let mut services = self.inner.services.write();
            if services
                .iter()
                .any(|(p, s)| p == pid && Arc::ptr_eq(s, &service))
            {
                return Err(ConfigError::AlreadyRegistered { pid: pid.to_string() });
            }
            services.push((pid.to_string(), Arc::clone(&service)));
        }
        debug!("受管服务已登记: {}", pid);

        let current = self
            .inner
            .store
            .get(pid)
            .filter(|entry| entry.factory_pid.is_none())
            .map(|entry| entry.delivered(pid));
        if let Some(current) = current {
            self.enqueue(Delivery::Updated {
                pid: pid.to_string(),
                properties: Some(current),
                targets: vec![service],
            });
        }
        Ok(())
    }

    fn remove_managed_service(&self, pid: &str, service: &Arc<dyn ManagedService>) -> bool {
        let mut services = self.inner.services.write();
        let before = services.len();
        services.retain(|(p, s)| !(p == pid && Arc::ptr_eq(s, service)));
        services.len() != before
    }

    fn add_managed_service_factory(
        &self,
        factory_pid: &str,
        factory: Arc<dyn ManagedServiceFactory>,
    ) -> Result<(), ConfigError> {
        {
            let mut factories = self.inner.factories.write();
            if factories
                .iter()
                .any(|(p, f)| p == factory_pid && Arc::ptr_eq(f, &factory))
            {
                return Err(ConfigError::AlreadyRegistered {
                    pid: factory_pid.to_string(),
                });
            }
            factories.push((factory_pid.to_string(), Arc::clone(&factory)));
        }
        debug!("受管服务工厂已登记: {} ({})", factory_pid, factory.name());

        for pid in self.factory_configurations(factory_pid) {
            let Some(delivered) = self.inner.store.get(&pid).map(|entry| entry.delivered(&pid)) else {
                continue;
            };
            self.enqueue(Delivery::FactoryUpdated {
                factory_pid: factory_pid.to_string(),
                pid,
                properties: delivered,
                targets: vec![Arc::clone(&factory)],
            });
        }
        Ok(())
    }

    fn remove_managed_service_factory(&self, factory_pid: &str, factory: &Arc<dyn ManagedServiceFactory>) -> bool {
        let mut factories = self.inner.factories.write();
        let before = factories.len();
        factories.retain(|(p, f)| !(p == factory_pid && Arc::ptr_eq(f, factory)));
        factories.len() != before
    }
}

async fn run_deliveries(
    mut receiver: mpsc::UnboundedReceiver<Delivery>,
    events: broadcast::Sender<ConfigurationEvent>,
) -> mpsc::UnboundedReceiver<Delivery> {
    while let Some(delivery) = receiver.recv().await {
        match delivery {
            Delivery::Shutdown => break,
            Delivery::Flush(done) => {
                let _ = done.send(());
            }
            other => deliver(other, &events),
        }
    }
    receiver
}

fn deliver(delivery: Delivery, events: &broadcast::Sender<ConfigurationEvent>) {
    match delivery {
        Delivery::Updated {
            pid,
            properties,
            targets,
        } => {
            for target in targets {
                if let Err(reason) = guarded(|| target.updated(properties.as_ref())) {
                    warn!("受管服务拒绝配置 {}: {}", pid, reason);
                    let _ = events.send(ConfigurationEvent::rejected(pid.clone(), None, EVENT_SOURCE));
                }
            }
        }
        Delivery::FactoryUpdated {
            factory_pid,
            pid,
            properties,
            targets,
        } => {
            for target in targets {
                if let Err(reason) = guarded(|| target.updated(&pid, &properties)) {
                    warn!("受管服务工厂 {} 拒绝配置 {}: {}", target.name(), pid, reason);
                    let _ = events.send(ConfigurationEvent::rejected(
                        pid.clone(),
                        Some(factory_pid.clone()),
                        EVENT_SOURCE,
                    ));
                }
            }
        }
        Delivery::FactoryDeleted {
            factory_pid,
            pid,
            targets,
        } => {
            for target in targets {
                let deleted = guarded(|| {
                    target.deleted(&pid);
                    Ok(())
                });
                if let Err(reason) = deleted {
                    warn!("受管服务工厂 {} 删除配置 {} 失败: {}", target.name(), pid, reason);
                    let _ = events.send(ConfigurationEvent::rejected(
                        pid.clone(),
                        Some(factory_pid.clone()),
                        EVENT_SOURCE,
                    ));
                }
            }
        }
        Delivery::Flush(_) | Delivery::Shutdown => {}
    }
}

/// 调用目标回调，把错误和 panic 都转成原因文本
fn guarded<F>(call: F) -> Result<(), String>
where
    F: FnOnce() -> Result<(), ConfigError>,
{
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("配置目标回调发生 panic: {}", message);
            Err(format!("panic: {message}"))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知 panic".to_string()
    }
}
