//! # DM Composition
//!
//! 组合层：把服务注册表、配置管理服务和依赖管理器组装成一个可运行的运行时。
//!
//! ## 主要功能
//!
//! - [`DmSettings`] - 从设置文件和 `DM_` 环境变量加载运行时设置
//! - [`LoggingConfig`] / [`init_logging`] - 日志初始化
//! - [`RuntimeBuilder`] / [`DmRuntime`] - 运行时的构建、启动和停止
//! - [`Diagnostics`] - 组件诊断报告
//!
//! ## 基本使用
//!
//! ```rust,no_run
//! use dm_composition::DmRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = DmRuntime::builder()
//!         .bundle(1, "app")
//!         .config_directory("./conf")
//!         .enable_hot_reload(true)
//!         .build()?;
//!     runtime.start().await?;
//!
//!     let component = runtime.manager().create_component();
//!     runtime.manager().add(component);
//!     println!("{}", runtime.diagnostics());
//!
//!     runtime.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod diagnostics;
pub mod logging;
pub mod runtime;
pub mod settings;

pub use builder::RuntimeBuilder;
pub use diagnostics::{Diagnostics, DiagnosticsSummary, MissingDependency};
pub use logging::{init_logging, LoggingConfig};
pub use runtime::{DmRuntime, RuntimeMetrics, RuntimeStatus};
pub use settings::{BundleSettings, ConfigurationSettings, DmSettings, LoggingSettings};

#[cfg(test)]
mod tests;
