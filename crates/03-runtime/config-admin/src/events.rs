//! 配置变更事件定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 配置变更事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationEvent {
    /// 事件类型
    pub event_type: ConfigurationEventType,
    /// 配置 PID
    pub pid: String,
    /// 所属工厂 PID，单例配置为空
    pub factory_pid: Option<String>,
    /// 事件时间
    pub timestamp: DateTime<Utc>,
    /// 事件来源
    pub source: String,
}

impl ConfigurationEvent {
    /// 创建配置更新事件
    pub fn updated(pid: impl Into<String>, factory_pid: Option<String>, source: impl Into<String>) -> Self {
        Self::new(ConfigurationEventType::Updated, pid, factory_pid, source)
    }

    /// 创建配置删除事件
    pub fn deleted(pid: impl Into<String>, factory_pid: Option<String>, source: impl Into<String>) -> Self {
        Self::new(ConfigurationEventType::Deleted, pid, factory_pid, source)
    }

    /// 创建分发失败事件
    pub fn rejected(pid: impl Into<String>, factory_pid: Option<String>, source: impl Into<String>) -> Self {
        Self::new(ConfigurationEventType::DeliveryFailed, pid, factory_pid, source)
    }

    fn new(
        event_type: ConfigurationEventType,
        pid: impl Into<String>,
        factory_pid: Option<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            pid: pid.into(),
            factory_pid,
            timestamp: Utc::now(),
            source: source.into(),
        }
    }

    /// 是否为工厂配置事件
    pub fn is_factory(&self) -> bool {
        self.factory_pid.is_some()
    }
}

/// 配置变更事件类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigurationEventType {
    /// 配置创建或更新
    Updated,
    /// 配置删除
    Deleted,
    /// 目标拒绝了配置
    DeliveryFailed,
}
