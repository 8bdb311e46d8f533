//! 组件诊断报告
//!
//! 列出每个组件的状态和依赖，并找出因必需依赖缺失而没有注册服务的组件。

use chrono::{DateTime, Utc};
use dm_abstractions::{ComponentDeclaration, DependencyDeclaration};
use dm_common::{ComponentState, ConfigError};
use dm_impl::DependencyManager;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 诊断报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// 生成时间
    pub generated_at: DateTime<Utc>,
    pub bundle_id: u64,
    pub bundle_name: String,
    /// 组件视图，按 ID 排序
    pub components: Vec<ComponentDeclaration>,
    pub summary: DiagnosticsSummary,
}

/// 统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsSummary {
    pub components: usize,
    pub registered: usize,
    pub unregistered: usize,
    /// 不可用的必需依赖总数
    pub missing_required: usize,
    /// 注册表中的服务总数
    pub services: usize,
    /// 配置管理服务中的配置总数
    pub configurations: usize,
}

/// 一个缺失的必需依赖
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependency<'a> {
    pub component: &'a ComponentDeclaration,
    pub dependency: &'a DependencyDeclaration,
}

impl Diagnostics {
    /// 收集依赖管理器中所有组件的视图
    pub fn collect(manager: &DependencyManager, services: usize, configurations: usize) -> Self {
        let components = manager.declarations();
        let registered = components
            .iter()
            .filter(|c| c.state == ComponentState::Registered)
            .count();
        let missing_required = components.iter().map(|c| c.missing_required().count()).sum();
        let summary = DiagnosticsSummary {
            components: components.len(),
            registered,
            unregistered: components.len() - registered,
            missing_required,
            services,
            configurations,
        };
        Self {
            generated_at: Utc::now(),
            bundle_id: manager.context().bundle_id(),
            bundle_name: manager.context().symbolic_name().to_string(),
            components,
            summary,
        }
    }

    /// 服务未注册的组件
    pub fn unregistered(&self) -> impl Iterator<Item = &ComponentDeclaration> {
        self.components
            .iter()
            .filter(|c| c.state == ComponentState::Unregistered)
    }

    /// 所有不可用的必需依赖
    pub fn missing_required(&self) -> Vec<MissingDependency<'_>> {
        self.components
            .iter()
            .flat_map(|component| {
                component
                    .missing_required()
                    .map(move |dependency| MissingDependency { component, dependency })
            })
            .collect()
    }

    /// 是否所有组件都已注册服务
    pub fn is_healthy(&self) -> bool {
        self.summary.missing_required == 0
    }

    /// JSON 格式
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "[{}] {} ({} 个组件, {} 个已注册, {} 个服务, {} 个配置)",
            self.bundle_id,
            self.bundle_name,
            self.summary.components,
            self.summary.registered,
            self.summary.services,
            self.summary.configurations
        )?;
        for component in &self.components {
            writeln!(f, "  [{}] {} {}", component.id.0, component.name, component.state)?;
            for dependency in &component.dependencies {
                writeln!(f, "    {} {} {}", dependency.kind, dependency.name, dependency.state)?;
            }
        }

        let missing = self.missing_required();
        if !missing.is_empty() {
            writeln!(f, "缺失的必需依赖:")?;
            for m in missing {
                writeln!(f, "  {} -> {} {}", m.component.name, m.dependency.kind, m.dependency.name)?;
            }
        }
        Ok(())
    }
}
