//! 声明层面的生命周期状态

use serde::{Deserialize, Serialize};
use std::fmt;

/// 组件声明状态
///
/// 从诊断视角看组件：服务是否已经注册。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentState {
    /// 未注册
    Unregistered,
    /// 已注册
    Registered,
}

impl Default for ComponentState {
    fn default() -> Self {
        Self::Unregistered
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unregistered => f.write_str("unregistered"),
            Self::Registered => f.write_str("registered"),
        }
    }
}

/// 依赖声明状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyState {
    /// 必需且不可用
    RequiredUnavailable,
    /// 必需且可用
    RequiredAvailable,
    /// 可选且不可用
    OptionalUnavailable,
    /// 可选且可用
    OptionalAvailable,
}

impl DependencyState {
    /// 根据可用性和必需性计算
    pub fn of(available: bool, required: bool) -> Self {
        match (required, available) {
            (true, false) => Self::RequiredUnavailable,
            (true, true) => Self::RequiredAvailable,
            (false, false) => Self::OptionalUnavailable,
            (false, true) => Self::OptionalAvailable,
        }
    }

    /// 是否必需
    pub fn is_required(&self) -> bool {
        matches!(self, Self::RequiredAvailable | Self::RequiredUnavailable)
    }

    /// 是否可用
    pub fn is_available(&self) -> bool {
        matches!(self, Self::RequiredAvailable | Self::OptionalAvailable)
    }
}

impl fmt::Display for DependencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::RequiredUnavailable => "required unavailable",
            Self::RequiredAvailable => "required available",
            Self::OptionalUnavailable => "optional unavailable",
            Self::OptionalAvailable => "optional available",
        };
        f.write_str(text)
    }
}
