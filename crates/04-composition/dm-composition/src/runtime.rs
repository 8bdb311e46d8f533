//! 依赖管理运行时

use crate::builder::RuntimeBuilder;
use crate::diagnostics::Diagnostics;
use crate::settings::DmSettings;
use chrono::{DateTime, Utc};
use config_admin::{apply_source, DirectoryWatcher, FileConfigurationSource, InMemoryConfigurationAdmin};
use dm_abstractions::ConfigurationAdmin;
use dm_common::DmError;
use dm_impl::{DependencyManager, InMemoryServiceRegistry};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// 依赖管理运行时
///
/// 把服务注册表、配置管理服务和依赖管理器组合在一起，负责配置目录的加载和监控。
pub struct DmRuntime {
    settings: DmSettings,
    registry: InMemoryServiceRegistry,
    admin: InMemoryConfigurationAdmin,
    manager: DependencyManager,
    watcher: tokio::sync::Mutex<Option<DirectoryWatcher>>,
    status: RwLock<RuntimeStatus>,
    metrics: RwLock<RuntimeMetrics>,
}

impl DmRuntime {
    /// 创建运行时构建器
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub(crate) fn new(
        settings: DmSettings,
        registry: InMemoryServiceRegistry,
        admin: InMemoryConfigurationAdmin,
        manager: DependencyManager,
    ) -> Self {
        Self {
            settings,
            registry,
            admin,
            manager,
            watcher: tokio::sync::Mutex::new(None),
            status: RwLock::new(RuntimeStatus::Initialized),
            metrics: RwLock::new(RuntimeMetrics::default()),
        }
    }

    /// 启动运行时
    ///
    /// 启动配置管理服务，加载配置目录，按设置开始监控目录。重复调用不做任何事。
    pub async fn start(&self) -> Result<(), DmError> {
        if self.status() == RuntimeStatus::Running {
            return Ok(());
        }
        info!("启动依赖管理运行时: {}", self.settings.bundle.name);
        self.set_status(RuntimeStatus::Starting);

        if let Err(e) = self.start_configuration().await {
            error!("运行时启动失败: {}", e);
            self.set_status(RuntimeStatus::Failed);
            return Err(e);
        }

        self.metrics.write().started_at = Some(Utc::now());
        self.set_status(RuntimeStatus::Running);
        info!("依赖管理运行时启动完成");
        Ok(())
    }

    async fn start_configuration(&self) -> Result<(), DmError> {
        if !self.admin.is_running() {
            self.admin.start()?;
        }
        let Some(directory) = self.settings.configuration.directory.clone() else {
            return Ok(());
        };

        self.load_directory(&directory).await?;
        if self.settings.configuration.hot_reload {
            let admin: Arc<dyn ConfigurationAdmin> = Arc::new(self.admin.clone());
            let watcher = DirectoryWatcher::start(&directory, admin)?;
            *self.watcher.lock().await = Some(watcher);
        }
        Ok(())
    }

    async fn load_directory(&self, directory: &Path) -> Result<usize, DmError> {
        if !directory.is_dir() {
            return Err(DmError::BootstrapFailed {
                message: format!("配置目录不存在: {}", directory.display()),
            });
        }
        let source = FileConfigurationSource::new(directory);
        let applied = apply_source(&source, &self.admin).await?;
        self.metrics.write().configurations_loaded += applied as u64;
        Ok(applied)
    }

    /// 重新加载配置目录，返回写入的配置数量
    pub async fn reload_configuration(&self) -> Result<usize, DmError> {
        let Some(directory) = self.settings.configuration.directory.clone() else {
            warn!("没有设置配置目录，跳过重新加载");
            return Ok(0);
        };
        info!("重新加载配置目录: {}", directory.display());
        let applied = self.load_directory(&directory).await?;
        self.metrics.write().reload_count += 1;
        Ok(applied)
    }

    /// 停止运行时
    ///
    /// 按加入的逆序停止所有组件，然后停止目录监控和配置管理服务。
    pub async fn stop(&self) -> Result<(), DmError> {
        if !matches!(self.status(), RuntimeStatus::Running | RuntimeStatus::Failed) {
            return Ok(());
        }
        info!("停止依赖管理运行时: {}", self.settings.bundle.name);
        self.set_status(RuntimeStatus::Stopping);

        self.manager.clear();
        if let Some(mut watcher) = self.watcher.lock().await.take() {
            watcher.stop().await;
        }
        if self.admin.is_running() {
            self.admin.stop().await?;
        }

        self.metrics.write().stopped_at = Some(Utc::now());
        self.set_status(RuntimeStatus::Stopped);
        info!("依赖管理运行时已停止");
        Ok(())
    }

    /// 等待已排队的配置交付完成
    pub async fn settle(&self) -> Result<(), DmError> {
        Ok(self.admin.flush().await?)
    }

    /// 诊断报告
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics::collect(&self.manager, self.registry.service_count(), self.admin.len())
    }

    pub fn status(&self) -> RuntimeStatus {
        *self.status.read()
    }

    fn set_status(&self, status: RuntimeStatus) {
        *self.status.write() = status;
    }

    pub fn metrics(&self) -> RuntimeMetrics {
        self.metrics.read().clone()
    }

    pub fn settings(&self) -> &DmSettings {
        &self.settings
    }

    /// 依赖管理器
    pub fn manager(&self) -> &DependencyManager {
        &self.manager
    }

    /// 服务注册表
    pub fn registry(&self) -> &InMemoryServiceRegistry {
        &self.registry
    }

    /// 配置管理服务
    pub fn configuration_admin(&self) -> &InMemoryConfigurationAdmin {
        &self.admin
    }

    /// 是否正在监控配置目录
    pub async fn is_watching(&self) -> bool {
        self.watcher
            .lock()
            .await
            .as_ref()
            .is_some_and(DirectoryWatcher::is_watching)
    }
}

impl std::fmt::Debug for DmRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmRuntime")
            .field("bundle", &self.settings.bundle.name)
            .field("status", &self.status())
            .field("components", &self.manager.len())
            .finish()
    }
}

/// 运行时状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeStatus {
    /// 已初始化
    Initialized,
    /// 启动中
    Starting,
    /// 运行中
    Running,
    /// 停止中
    Stopping,
    /// 已停止
    Stopped,
    /// 失败
    Failed,
}

/// 运行时统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeMetrics {
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// 从配置目录写入的配置数量
    pub configurations_loaded: u64,
    /// 手动重新加载次数
    pub reload_count: u64,
}

impl RuntimeMetrics {
    /// 运行时间
    pub fn uptime(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.stopped_at) {
            (Some(start), Some(stop)) => Some(stop - start),
            (Some(start), None) => Some(Utc::now() - start),
            _ => None,
        }
    }
}
