//! 自动注入
//!
//! 组件实现通过 [`Injectable::injection_table`] 在构建期声明可注入的字段，
//! 运行时按 `(类型键, 字段名)` 查表写入，不做任何运行时反射。

use crate::lifecycle::Lifecycle;
use crate::registry::ServiceObject;
use dm_common::TypeKey;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// 类型擦除辅助 trait
pub trait AsAny: Any + Send + Sync {
    /// 获取 `&dyn Any`
    fn as_any(&self) -> &dyn Any;

    /// 转换为 `Arc<dyn Any>`
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

type Setter<T> = Arc<dyn Fn(&T, Option<ServiceObject>) -> bool + Send + Sync>;

struct Slot<T> {
    key: TypeKey,
    name: Option<String>,
    setter: Setter<T>,
}

/// 注入表
///
/// 为类型 `T` 登记若干个注入槽位，每个槽位对应一个值类型和一个可选的字段名。
/// 字段本身通常是 `RwLock<Option<Arc<V>>>` 之类的内部可变结构。
pub struct InjectionTable<T> {
    slots: Vec<Slot<T>>,
}

impl<T: Any + Send + Sync> InjectionTable<T> {
    /// 创建空的注入表
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// 登记一个按类型匹配的槽位
    pub fn inject<V, F>(self, setter: F) -> Self
    where
        V: Any + Send + Sync,
        F: Fn(&T, Option<Arc<V>>) + Send + Sync + 'static,
    {
        self.slot::<V, F>(None, setter)
    }

    /// 登记一个按类型和字段名匹配的槽位
    pub fn inject_named<V, F>(self, name: impl Into<String>, setter: F) -> Self
    where
        V: Any + Send + Sync,
        F: Fn(&T, Option<Arc<V>>) + Send + Sync + 'static,
    {
        self.slot::<V, F>(Some(name.into()), setter)
    }

    fn slot<V, F>(mut self, name: Option<String>, setter: F) -> Self
    where
        V: Any + Send + Sync,
        F: Fn(&T, Option<Arc<V>>) + Send + Sync + 'static,
    {
        let key = TypeKey::of::<V>();
        let setter: Setter<T> = Arc::new(move |target: &T, value: Option<ServiceObject>| {
            match value {
                None => {
                    setter(target, None);
                    true
                }
                Some(object) => match object.downcast::<V>() {
                    Ok(typed) => {
                        setter(target, Some(typed));
                        true
                    }
                    Err(_) => {
                        warn!("注入值类型不匹配: 期望 {}", key.name);
                        false
                    }
                },
            }
        });
        self.slots.push(Slot { key, name, setter });
        self
    }

    /// 槽位数量
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// 是否没有任何槽位
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<T: Any + Send + Sync> Default for InjectionTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 类型擦除后的注入器
pub trait Injector: Send + Sync {
    /// 向目标写入值，返回命中的槽位数
    ///
    /// 未指定名称时匹配所有同类型槽位；指定名称时类型和名称都必须匹配。
    fn inject(
        &self,
        target: &dyn Any,
        key: &TypeKey,
        name: Option<&str>,
        value: Option<ServiceObject>,
    ) -> usize;

    /// 是否存在该类型的槽位
    fn accepts(&self, key: &TypeKey) -> bool;
}

impl<T: Any + Send + Sync> Injector for InjectionTable<T> {
    fn inject(
        &self,
        target: &dyn Any,
        key: &TypeKey,
        name: Option<&str>,
        value: Option<ServiceObject>,
    ) -> usize {
        let Some(target) = target.downcast_ref::<T>() else {
            return 0;
        };

        self.slots
            .iter()
            .filter(|slot| slot.key == *key)
            .filter(|slot| match name {
                Some(name) => slot.name.as_deref() == Some(name),
                None => true,
            })
            .filter(|slot| (slot.setter)(target, value.clone()))
            .count()
    }

    fn accepts(&self, key: &TypeKey) -> bool {
        self.slots.iter().any(|slot| slot.key == *key)
    }
}

/// 可注入的组件实现
///
/// 默认注入表为空，表示该实现不接收任何自动注入。
pub trait Injectable: Lifecycle + Sized {
    /// 构建注入表
    fn injection_table() -> InjectionTable<Self> {
        InjectionTable::new()
    }
}

/// 组件实例
///
/// 实现对象与其注入表的组合，克隆开销很小。
#[derive(Clone)]
pub struct Instance {
    object: Arc<dyn Lifecycle>,
    injector: Arc<dyn Injector>,
    type_name: &'static str,
}

impl Instance {
    /// 使用类型自带的注入表创建实例
    pub fn new<T: Injectable>(object: Arc<T>) -> Self {
        Self::with_table(object, T::injection_table())
    }

    /// 使用指定的注入表创建实例
    pub fn with_table<T: Lifecycle>(object: Arc<T>, table: InjectionTable<T>) -> Self {
        Self {
            object,
            injector: Arc::new(table),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// 实现对象
    pub fn object(&self) -> &Arc<dyn Lifecycle> {
        &self.object
    }

    /// 实现类型名
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// 向下转型为具体类型
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.object).into_any_arc().downcast::<T>().ok()
    }

    /// 向下转型为具体类型的引用
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.object).as_any().downcast_ref::<T>()
    }

    /// 按类型键注入
    pub fn inject(&self, key: &TypeKey, name: Option<&str>, value: Option<ServiceObject>) -> usize {
        self.injector
            .inject((*self.object).as_any(), key, name, value)
    }

    /// 是否接受该类型的注入
    pub fn accepts(&self, key: &TypeKey) -> bool {
        self.injector.accepts(key)
    }

    /// 是否为同一个实现对象
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type_name", &self.type_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::RwLock;

    #[derive(Default)]
    struct Printer {
        queue: RwLock<Option<Arc<String>>>,
        backup: RwLock<Option<Arc<String>>>,
        copies: RwLock<Option<Arc<u32>>>,
    }

    impl Lifecycle for Printer {}

    impl Injectable for Printer {
        fn injection_table() -> InjectionTable<Self> {
            InjectionTable::new()
                .inject_named::<String, _>("queue", |p: &Printer, v| {
                    *p.queue.write().unwrap() = v;
                })
                .inject_named::<String, _>("backup", |p: &Printer, v| {
                    *p.backup.write().unwrap() = v;
                })
                .inject::<u32, _>(|p: &Printer, v| *p.copies.write().unwrap() = v)
        }
    }

    #[test]
    fn test_unnamed_injection_hits_every_slot_of_type() {
        let printer = Arc::new(Printer::default());
        let instance = Instance::new(Arc::clone(&printer));

        let value: ServiceObject = Arc::new("lp0".to_string());
        let hits = instance.inject(&TypeKey::of::<String>(), None, Some(value));

        assert_eq!(hits, 2);
        assert_eq!(printer.queue.read().unwrap().as_deref().map(String::as_str), Some("lp0"));
        assert_eq!(printer.backup.read().unwrap().as_deref().map(String::as_str), Some("lp0"));
    }

    #[test]
    fn test_named_injection_and_clear() {
        let printer = Arc::new(Printer::default());
        let instance = Instance::new(Arc::clone(&printer));
        let key = TypeKey::of::<String>();

        let value: ServiceObject = Arc::new("lp1".to_string());
        assert_eq!(instance.inject(&key, Some("backup"), Some(value)), 1);
        assert!(printer.queue.read().unwrap().is_none());
        assert!(printer.backup.read().unwrap().is_some());

        assert_eq!(instance.inject(&key, Some("backup"), None), 1);
        assert!(printer.backup.read().unwrap().is_none());
    }

    #[test]
    fn test_type_mismatch_and_downcast() {
        let printer = Arc::new(Printer::default());
        let instance = Instance::new(Arc::clone(&printer));

        let wrong: ServiceObject = Arc::new(7_i64);
        assert_eq!(instance.inject(&TypeKey::of::<u32>(), None, Some(wrong)), 0);
        assert_eq!(instance.inject(&TypeKey::of::<f64>(), None, None), 0);

        assert!(instance.accepts(&TypeKey::of::<u32>()));
        assert!(instance.downcast::<Printer>().is_some());
        assert!(instance.downcast_ref::<String>().is_none());
        assert!(instance.ptr_eq(&instance.clone()));
    }
}
