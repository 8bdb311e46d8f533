mod admin_tests;
mod source_tests;

use dm_abstractions::{ManagedService, ManagedServiceFactory};
use dm_common::{ConfigError, Properties};
use parking_lot::Mutex;
use std::sync::Arc;

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// 记录收到的配置的受管服务
#[derive(Default)]
pub(crate) struct RecordingService {
    pub(crate) received: Mutex<Vec<Option<Properties>>>,
    pub(crate) reject: bool,
}

impl RecordingService {
    pub(crate) fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            received: Mutex::new(Vec::new()),
            reject: true,
        })
    }
}

impl ManagedService for RecordingService {
    fn updated(&self, properties: Option<&Properties>) -> Result<(), ConfigError> {
        self.received.lock().push(properties.cloned());
        if self.reject {
            return Err(ConfigError::InvalidProperties {
                message: "拒绝".to_string(),
            });
        }
        Ok(())
    }
}

/// 记录工厂事件
#[derive(Default)]
pub(crate) struct RecordingFactory {
    pub(crate) events: Mutex<Vec<String>>,
}

impl ManagedServiceFactory for RecordingFactory {
    fn name(&self) -> String {
        "recording".to_string()
    }

    fn updated(&self, pid: &str, properties: &Properties) -> Result<(), ConfigError> {
        let size = properties.get("size").cloned().unwrap_or_default();
        self.events.lock().push(format!("updated {pid} size={size}"));
        Ok(())
    }

    fn deleted(&self, pid: &str) {
        self.events.lock().push(format!("deleted {pid}"));
    }
}

/// 每次收到配置都 panic 的受管服务
pub(crate) struct PanickingService;

impl ManagedService for PanickingService {
    fn updated(&self, _properties: Option<&Properties>) -> Result<(), ConfigError> {
        panic!("受管服务内部错误");
    }
}
