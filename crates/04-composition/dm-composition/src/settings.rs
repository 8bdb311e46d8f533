//! 运行时设置
//!
//! 设置来自可选的 TOML/JSON 文件和 `DM_` 前缀的环境变量，环境变量优先。
//! 嵌套键用双下划线分隔，例如 `DM_CONFIGURATION__HOT_RELOAD=true`。

use crate::logging::LoggingConfig;
use dm_common::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "DM";

/// 运行时设置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmSettings {
    pub bundle: BundleSettings,
    pub configuration: ConfigurationSettings,
    pub logging: LoggingSettings,
}

/// bundle 身份
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleSettings {
    pub id: u64,
    pub name: String,
}

impl Default for BundleSettings {
    fn default() -> Self {
        Self {
            id: 0,
            name: "dm.runtime".to_string(),
        }
    }
}

/// 配置目录
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigurationSettings {
    /// 启动时加载的配置目录，不设置时不加载
    pub directory: Option<PathBuf>,
    /// 是否监控目录变化
    pub hot_reload: bool,
}

/// 日志设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// 日志级别，例如 `info`、`debug`
    pub level: String,
    /// EnvFilter 指令，设置后覆盖 `level`
    pub filter: Option<String>,
    pub json: bool,
    pub show_target: bool,
    pub show_thread_ids: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            filter: None,
            json: false,
            show_target: true,
            show_thread_ids: false,
        }
    }
}

impl LoggingSettings {
    /// 转换为日志配置
    pub fn to_logging_config(&self) -> Result<LoggingConfig, ConfigError> {
        let level = self
            .level
            .parse::<tracing::Level>()
            .map_err(|e| ConfigError::SettingsError {
                message: format!("无效的日志级别 {}: {}", self.level, e),
            })?;
        Ok(LoggingConfig {
            level,
            filter: self.filter.clone(),
            show_target: self.show_target,
            show_thread_ids: self.show_thread_ids,
            json_format: self.json,
            ..LoggingConfig::default()
        })
    }
}

impl DmSettings {
    /// 从可选的设置文件和进程环境变量加载
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(path, None)
    }

    /// 从可选的设置文件和给定的环境变量表加载
    ///
    /// `environment` 为 `None` 时读取进程环境变量。
    pub fn load_from(
        path: Option<&Path>,
        environment: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            debug!("加载运行时设置文件: {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(environment),
            )
            .build()
            .map_err(settings_error)?;

        let settings: Self = settings.try_deserialize().map_err(settings_error)?;
        debug!("运行时设置: {:?}", settings);
        Ok(settings)
    }
}

fn settings_error(e: config::ConfigError) -> ConfigError {
    ConfigError::SettingsError {
        message: e.to_string(),
    }
}
