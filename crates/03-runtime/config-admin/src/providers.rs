//! 配置源
//!
//! 目录中的文件按名称映射到配置：
//!
//! - `<pid>.toml` / `<pid>.json` 是单例配置
//! - `<factory_pid>-<name>.toml` / `.json` 是工厂配置，PID 为 `<factory_pid>.<name>`
//!
//! 单例配置的 PID 因此不能包含 `-`。

use async_trait::async_trait;
use dm_abstractions::ConfigurationAdmin;
use dm_common::{ConfigError, Properties};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 配置文件中的一条配置
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationRecord {
    pub key: ConfigurationKey,
    pub properties: Properties,
}

/// 配置的标识
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConfigurationKey {
    /// 单例配置
    Singleton { pid: String },
    /// 工厂配置
    Factory { factory_pid: String, name: String },
}

impl ConfigurationKey {
    /// 由文件名推导配置标识，不支持的扩展名返回 `None`
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?;
        if !matches!(extension, "toml" | "json") {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        if stem.is_empty() || stem.starts_with('.') {
            return None;
        }
        Some(match stem.rsplit_once('-') {
            Some((factory_pid, name)) if !factory_pid.is_empty() && !name.is_empty() => Self::Factory {
                factory_pid: factory_pid.to_string(),
                name: name.to_string(),
            },
            _ => Self::Singleton {
                pid: stem.to_string(),
            },
        })
    }

    /// 在配置管理服务中的 PID
    pub fn pid(&self) -> String {
        match self {
            Self::Singleton { pid } => pid.clone(),
            Self::Factory { factory_pid, name } => format!("{}.{}", factory_pid, name),
        }
    }

    /// 把配置写入配置管理服务
    pub fn apply(&self, admin: &dyn ConfigurationAdmin, properties: Properties) -> Result<String, ConfigError> {
        match self {
            Self::Singleton { pid } => {
                admin.update(pid, properties)?;
                Ok(pid.clone())
            }
            Self::Factory { factory_pid, name } => {
                admin.update_factory_configuration(factory_pid, name, properties)
            }
        }
    }
}

/// 配置源
#[async_trait]
pub trait ConfigurationSource: Send + Sync {
    /// 配置源名称
    fn name(&self) -> &str;

    /// 读取全部配置
    async fn load(&self) -> Result<Vec<ConfigurationRecord>, ConfigError>;
}

/// 从目录读取配置文件
#[derive(Debug, Clone)]
pub struct FileConfigurationSource {
    directory: PathBuf,
}

impl FileConfigurationSource {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// 读取单个配置文件
    pub async fn load_file(path: &Path) -> Result<Option<ConfigurationRecord>, ConfigError> {
        let Some(key) = ConfigurationKey::from_path(path) else {
            return Ok(None);
        };
        debug!("加载配置文件: {}", path.display());
        let content = tokio::fs::read_to_string(path).await?;
        let properties = parse_properties(path, &content)?;
        Ok(Some(ConfigurationRecord { key, properties }))
    }
}

#[async_trait]
impl ConfigurationSource for FileConfigurationSource {
    fn name(&self) -> &str {
        "FileConfigurationSource"
    }

    async fn load(&self) -> Result<Vec<ConfigurationRecord>, ConfigError> {
        let mut entries = tokio::fs::read_dir(&self.directory).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();

        let mut records = Vec::new();
        for path in paths {
            if let Some(record) = Self::load_file(&path).await? {
                records.push(record);
            }
        }
        debug!("从 {} 读取到 {} 个配置", self.directory.display(), records.len());
        Ok(records)
    }
}

/// 把配置源中的全部配置写入配置管理服务，返回写入的数量
///
/// 单个配置写入失败只记录日志。
pub async fn apply_source(source: &dyn ConfigurationSource, admin: &dyn ConfigurationAdmin) -> Result<usize, ConfigError> {
    let records = source.load().await?;
    let mut applied = 0;
    for record in records {
        match record.key.apply(admin, record.properties) {
            Ok(pid) => {
                debug!("已应用配置: {}", pid);
                applied += 1;
            }
            Err(e) => warn!("应用配置 {} 失败: {}", record.key.pid(), e),
        }
    }
    info!("配置源 {} 已应用 {} 个配置", source.name(), applied);
    Ok(applied)
}

fn parse_properties(path: &Path, content: &str) -> Result<Properties, ConfigError> {
    let parse_error = |source: Box<dyn std::error::Error + Send + Sync>| ConfigError::ParseError {
        path: path.display().to_string(),
        source,
    };
    let value = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str::<Value>(content).map_err(|e| parse_error(Box::new(e)))?,
        _ => {
            let table: toml::Table = toml::from_str(content).map_err(|e| parse_error(Box::new(e)))?;
            toml_to_json(&toml::Value::Table(table))
        }
    };
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(ConfigError::InvalidProperties {
            message: format!("{} 顶层不是对象: {}", path.display(), other),
        }),
    }
}

/// 将 TOML 值转换为 JSON 值
fn toml_to_json(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(i) => Value::Number(serde_json::Number::from(*i)),
        toml::Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Array(arr) => Value::Array(arr.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
    }
}
