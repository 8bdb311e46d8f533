//! 日志初始化

use dm_common::DmError;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: tracing::Level,
    /// EnvFilter 指令，设置后覆盖 `level`
    pub filter: Option<String>,
    /// 是否显示目标
    pub show_target: bool,
    /// 是否显示线程ID
    pub show_thread_ids: bool,
    /// 是否显示文件名
    pub show_file: bool,
    /// 是否显示行号
    pub show_line_number: bool,
    /// 是否使用 JSON 格式
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: tracing::Level::INFO,
            filter: None,
            show_target: true,
            show_thread_ids: false,
            show_file: false,
            show_line_number: false,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// 开发环境：调试级别，附带线程和源码位置
    pub fn development() -> Self {
        Self {
            level: tracing::Level::DEBUG,
            filter: None,
            show_target: true,
            show_thread_ids: true,
            show_file: true,
            show_line_number: true,
            json_format: false,
        }
    }

    /// 生产环境：JSON 输出
    pub fn production() -> Self {
        Self {
            level: tracing::Level::INFO,
            filter: None,
            show_target: false,
            show_thread_ids: false,
            show_file: false,
            show_line_number: false,
            json_format: true,
        }
    }

    /// 构造过滤器
    ///
    /// 设置了 `RUST_LOG` 时以它为准，其次是 `filter` 指令，最后是 `level`。
    pub fn env_filter(&self) -> Result<EnvFilter, DmError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        match &self.filter {
            Some(directives) => EnvFilter::try_new(directives).map_err(|e| DmError::BootstrapFailed {
                message: format!("无效的日志过滤指令 {}: {}", directives, e),
            }),
            None => Ok(EnvFilter::default().add_directive(LevelFilter::from_level(self.level).into())),
        }
    }
}

/// 安装全局日志订阅器
///
/// 已经安装过订阅器时返回错误。
pub fn init_logging(config: &LoggingConfig) -> Result<(), DmError> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter()?)
        .with_target(config.show_target)
        .with_thread_ids(config.show_thread_ids)
        .with_file(config.show_file)
        .with_line_number(config.show_line_number);

    if config.json_format {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    }
    .map_err(|e| DmError::BootstrapFailed {
        message: format!("日志初始化失败: {}", e),
    })?;

    info!("日志系统初始化完成");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(LoggingConfig::development().level, tracing::Level::DEBUG);
        assert!(LoggingConfig::production().json_format);
        assert!(!LoggingConfig::default().json_format);
    }

    #[test]
    fn test_invalid_filter_directive() {
        let config = LoggingConfig {
            filter: Some("dm_impl=[".to_string()),
            ..LoggingConfig::default()
        };
        if std::env::var("RUST_LOG").is_err() {
            assert!(config.env_filter().is_err());
        }
    }
}
