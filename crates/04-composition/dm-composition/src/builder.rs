//! 运行时构建器

use crate::logging::{init_logging, LoggingConfig};
use crate::runtime::DmRuntime;
use crate::settings::DmSettings;
use config_admin::InMemoryConfigurationAdmin;
use dm_abstractions::BundleContext;
use dm_common::DmError;
use dm_impl::{DependencyManager, InMemoryServiceRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// 运行时构建器
///
/// 使用建造者模式组装注册表、配置管理服务和依赖管理器。
pub struct RuntimeBuilder {
    settings: DmSettings,
    registry: Option<InMemoryServiceRegistry>,
    /// 只有明确配置了日志时才安装订阅器
    logging: Option<LoggingConfig>,
}

impl RuntimeBuilder {
    /// 使用默认设置创建构建器
    pub fn new() -> Self {
        Self::from_settings(DmSettings::default())
    }

    /// 使用已加载的设置创建构建器
    pub fn from_settings(settings: DmSettings) -> Self {
        Self {
            settings,
            registry: None,
            logging: None,
        }
    }

    /// 从设置文件和 `DM_` 环境变量加载设置，并按设置初始化日志
    pub fn load_settings<P: AsRef<Path>>(path: Option<P>) -> Result<Self, DmError> {
        let path: Option<&Path> = path.as_ref().map(|p| p.as_ref());
        let settings = DmSettings::load(path)?;
        let logging = settings.logging.to_logging_config()?;
        Ok(Self::from_settings(settings).with_logging(logging))
    }

    /// 设置 bundle 身份
    pub fn bundle(mut self, id: u64, name: impl Into<String>) -> Self {
        self.settings.bundle.id = id;
        self.settings.bundle.name = name.into();
        self
    }

    /// 启动时加载的配置目录
    pub fn config_directory<P: Into<PathBuf>>(mut self, directory: P) -> Self {
        let directory = directory.into();
        info!("配置目录: {}", directory.display());
        self.settings.configuration.directory = Some(directory);
        self
    }

    /// 启用配置目录热重载
    pub fn enable_hot_reload(mut self, enabled: bool) -> Self {
        self.settings.configuration.hot_reload = enabled;
        if enabled {
            info!("启用配置热重载");
        }
        self
    }

    /// 配置日志
    pub fn with_logging(mut self, config: LoggingConfig) -> Self {
        self.logging = Some(config);
        self
    }

    /// 使用已有的服务注册表，多个运行时可以共享同一个注册表
    pub fn with_registry(mut self, registry: InMemoryServiceRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 构建运行时
    pub fn build(self) -> Result<DmRuntime, DmError> {
        if let Some(logging) = &self.logging {
            init_logging(logging)?;
        }
        if self.settings.configuration.hot_reload && self.settings.configuration.directory.is_none() {
            return Err(DmError::BootstrapFailed {
                message: "启用热重载时必须设置配置目录".to_string(),
            });
        }

        let registry = self.registry.unwrap_or_default();
        let admin = InMemoryConfigurationAdmin::new();
        let context = BundleContext::new(
            self.settings.bundle.id,
            self.settings.bundle.name.clone(),
            Arc::new(registry.clone()),
        )
        .with_configuration_admin(Arc::new(admin.clone()));
        let manager = DependencyManager::new(context);

        debug!("运行时构建完成: {:?}", self.settings);
        Ok(DmRuntime::new(self.settings, registry, admin, manager))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
