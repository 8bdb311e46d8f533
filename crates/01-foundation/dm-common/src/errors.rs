//! 错误类型定义

use thiserror::Error;

/// 通用的装箱错误类型
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 组件配置期错误
///
/// 在组件已经激活后修改不可变配置时产生，同步返回给调用方。
#[derive(Error, Debug)]
pub enum ComponentError {
    #[error("组件处于活动状态，无法修改配置: {component}")]
    Active { component: String },

    #[error("组件实例创建失败: {component}, 原因: {source}")]
    InstantiationFailed { component: String, source: BoxError },

    #[error("组件已被释放: {component}")]
    Released { component: String },

    #[error("依赖操作失败: {source}")]
    Dependency {
        #[from]
        source: DependencyError,
    },
}

impl ComponentError {
    /// 创建活动状态错误
    pub fn active(component: impl Into<String>) -> Self {
        Self::Active {
            component: component.into(),
        }
    }

    /// 是否为活动状态错误
    pub fn is_active_fault(&self) -> bool {
        matches!(self, Self::Active { .. })
    }
}

/// 装饰器协议错误
///
/// 装饰器与其上游事件源之间的协议被破坏时产生（例如移除一个从未添加过的键）。
#[derive(Error, Debug)]
pub enum DecoratorError {
    #[error("装饰键已存在: {key}")]
    DuplicateKey { key: String },

    #[error("装饰键不存在: {key}")]
    UnknownKey { key: String },

    #[error("装饰组件创建失败: {key}, 原因: {source}")]
    CreationFailed {
        key: String,
        source: ComponentError,
    },
}

/// 依赖启动/停止错误
#[derive(Error, Debug)]
pub enum DependencyError {
    #[error("依赖启动失败: {dependency}, 原因: {message}")]
    StartFailed { dependency: String, message: String },

    #[error("依赖停止失败: {dependency}, 原因: {message}")]
    StopFailed { dependency: String, message: String },

    #[error("服务注册表错误: {source}")]
    Registry {
        #[from]
        source: RegistryError,
    },

    #[error("配置错误: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },
}

/// 服务注册表错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("服务已注销: {service_id}")]
    Unregistered { service_id: u64 },

    #[error("服务不存在: {service_id}")]
    ServiceNotFound { service_id: u64 },

    #[error("服务注册参数无效: {message}")]
    InvalidRegistration { message: String },
}

/// 用户回调执行错误
///
/// 生命周期回调（init/start/stop/destroy）和依赖回调的失败统一用它表示，
/// 始终在调用边界被捕获并记录。
#[derive(Error, Debug)]
#[error("回调 {callback} 执行失败: {source}")]
pub struct CallbackError {
    /// 回调名称
    pub callback: String,
    /// 原始错误
    pub source: BoxError,
}

impl CallbackError {
    /// 包装一个已有错误
    pub fn new(callback: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            callback: callback.into(),
            source: source.into(),
        }
    }

    /// 使用文本消息创建
    pub fn msg(callback: impl Into<String>, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self {
            callback: callback.into(),
            source: message.into(),
        }
    }
}

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置不存在: {pid}")]
    NotFound { pid: String },

    #[error("配置目标已注册: {pid}")]
    AlreadyRegistered { pid: String },

    #[error("配置文件读取失败: {source}")]
    FileReadError {
        #[from]
        source: std::io::Error,
    },

    #[error("配置解析失败: {path}, 原因: {source}")]
    ParseError { path: String, source: BoxError },

    #[error("配置序列化失败: {source}")]
    SerializationError {
        #[from]
        source: serde_json::Error,
    },

    #[error("配置属性无效: {message}")]
    InvalidProperties { message: String },

    #[error("配置分发失败: {message}")]
    DispatchError { message: String },

    #[error("配置文件监控失败: {message}")]
    WatchError { message: String },

    #[error("运行时设置加载失败: {message}")]
    SettingsError { message: String },
}

/// 依赖管理运行时错误
#[derive(Error, Debug)]
pub enum DmError {
    #[error("组件错误: {source}")]
    Component {
        #[from]
        source: ComponentError,
    },

    #[error("装饰器错误: {source}")]
    Decorator {
        #[from]
        source: DecoratorError,
    },

    #[error("依赖错误: {source}")]
    Dependency {
        #[from]
        source: DependencyError,
    },

    #[error("注册表错误: {source}")]
    Registry {
        #[from]
        source: RegistryError,
    },

    #[error("配置错误: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("启动失败: {message}")]
    BootstrapFailed { message: String },
}

/// 结果类型别名
pub type ComponentResult<T> = Result<T, ComponentError>;
pub type DecoratorResult<T> = Result<T, DecoratorError>;
pub type DependencyResult<T> = Result<T, DependencyError>;
pub type RegistryResult<T> = Result<T, RegistryError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type CallbackResult = Result<(), CallbackError>;
pub type DmResult<T> = Result<T, DmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversions() {
        let err: DmError = ComponentError::active("demo").into();
        assert!(matches!(
            err,
            DmError::Component {
                source: ComponentError::Active { .. }
            }
        ));

        let err: DependencyError = RegistryError::Unregistered { service_id: 7 }.into();
        assert!(err.to_string().contains('7'));
    }

    #[test]
    fn test_callback_error_message() {
        let err = CallbackError::msg("start", "boom");
        assert_eq!(err.callback, "start");
        assert!(err.to_string().contains("boom"));
    }
}
