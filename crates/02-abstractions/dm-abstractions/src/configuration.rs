//! 配置管理契约

use dm_common::{ConfigError, Properties};
use std::sync::Arc;

/// 受管服务
///
/// 按 PID 接收单例配置。`None` 表示配置已被删除。
pub trait ManagedService: Send + Sync {
    fn updated(&self, properties: Option<&Properties>) -> Result<(), ConfigError>;
}

/// 受管服务工厂
///
/// 按工厂 PID 接收一族配置，每个配置对应一个 PID。
pub trait ManagedServiceFactory: Send + Sync {
    /// 工厂名称，用于日志
    fn name(&self) -> String;

    /// 新建或更新一个配置
    fn updated(&self, pid: &str, properties: &Properties) -> Result<(), ConfigError>;

    /// 删除一个配置
    fn deleted(&self, pid: &str);
}

/// 配置管理服务
pub trait ConfigurationAdmin: Send + Sync {
    /// 创建或替换单例配置
    fn update(&self, pid: &str, properties: Properties) -> Result<(), ConfigError>;

    /// 以生成的 PID 创建工厂配置
    fn create_factory_configuration(
        &self,
        factory_pid: &str,
        properties: Properties,
    ) -> Result<String, ConfigError>;

    /// 以指定名称创建或替换工厂配置，PID 为 `<factory_pid>.<name>`
    fn update_factory_configuration(
        &self,
        factory_pid: &str,
        name: &str,
        properties: Properties,
    ) -> Result<String, ConfigError>;

    /// 删除配置
    fn delete(&self, pid: &str) -> Result<(), ConfigError>;

    /// 读取配置
    fn get(&self, pid: &str) -> Option<Properties>;

    /// 列出所有 PID
    fn list(&self) -> Vec<String>;

    /// 注册受管服务，立即收到当前配置
    fn add_managed_service(
        &self,
        pid: &str,
        service: Arc<dyn ManagedService>,
    ) -> Result<(), ConfigError>;

    /// 注销受管服务
    fn remove_managed_service(&self, pid: &str, service: &Arc<dyn ManagedService>) -> bool;

    /// 注册受管服务工厂，立即收到该工厂已有的全部配置
    fn add_managed_service_factory(
        &self,
        factory_pid: &str,
        factory: Arc<dyn ManagedServiceFactory>,
    ) -> Result<(), ConfigError>;

    /// 注销受管服务工厂
    fn remove_managed_service_factory(
        &self,
        factory_pid: &str,
        factory: &Arc<dyn ManagedServiceFactory>,
    ) -> bool;
}
