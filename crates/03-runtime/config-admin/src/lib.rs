//! # Configuration Admin
//!
//! 配置管理服务的实现：按 PID 保存配置，并把变更异步分发给受管服务和受管服务工厂。
//!
//! ## 主要组件
//!
//! - [`InMemoryConfigurationAdmin`] - 内存配置管理服务，变更在 tokio 任务上按序分发
//! - [`FileConfigurationSource`] - 从目录加载 TOML / JSON 配置文件
//! - [`DirectoryWatcher`] - 监控配置目录并把文件变更应用到配置管理服务
//! - [`ConfigurationEvent`] - 配置变更事件

pub mod admin;
pub mod events;
pub mod providers;
pub mod watcher;

pub use admin::*;
pub use events::*;
pub use providers::*;
pub use watcher::*;

#[cfg(test)]
mod tests;
