//! 元数据定义
//!
//! 提供组件 ID、类型键和服务引用

use crate::properties::{self, Properties};
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

/// 组件 ID
///
/// 由管理器持有的 [`IdSequence`] 单调分配，用于组件之间的排序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentId(pub u64);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 单调递增的 ID 序列
#[derive(Debug)]
pub struct IdSequence {
    next: AtomicU64,
}

impl IdSequence {
    /// 创建从 1 开始的序列
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// 创建从指定值开始的序列
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// 分配下一个原始 ID
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, AtomicOrdering::SeqCst)
    }

    /// 分配下一个组件 ID
    pub fn next_component_id(&self) -> ComponentId {
        ComponentId(self.next())
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// 类型键
///
/// 自动注入按类型键匹配目标字段。
#[derive(Debug, Clone, Copy)]
pub struct TypeKey {
    /// 类型ID
    pub id: TypeId,
    /// 类型全名
    pub name: &'static str,
}

impl TypeKey {
    /// 从类型获取类型键
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// 获取简短的类型名称（不包含模块路径）
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl std::hash::Hash for TypeKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// 服务 ID
pub type ServiceId = u64;

/// 服务引用
///
/// 注册表中一个已注册服务在某一时刻的快照。相等性只比较服务 ID。
#[derive(Debug, Clone)]
pub struct ServiceReference {
    /// 服务 ID
    pub id: ServiceId,
    /// 注册者所属的 bundle
    pub bundle_id: u64,
    /// 提供的接口
    pub interfaces: Arc<[String]>,
    /// 服务属性
    pub properties: Properties,
}

impl ServiceReference {
    /// 服务排名
    pub fn ranking(&self) -> i64 {
        properties::ranking(&self.properties)
    }

    /// 读取属性
    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    /// 是否提供指定接口
    pub fn provides(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|i| i == interface)
    }

    /// 按优先级比较：排名高者优先，排名相同时 ID 小者优先
    pub fn priority_cmp(&self, other: &Self) -> Ordering {
        other
            .ranking()
            .cmp(&self.ranking())
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialEq for ServiceReference {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceReference {}

impl std::hash::Hash for ServiceReference {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.id, self.interfaces.join(", "))
    }
}
