//! 按键扇出的组件表
//!
//! 每个键最多对应一个组件。创建和移除在表锁内互斥完成，
//! 组件的启停在锁外进行。

use crate::component::Component;
use crate::dependencies::same_dependency;
use crate::manager::WeakManager;
use dm_abstractions::{ComponentStateListener, Dependency};
use dm_common::{ComponentResult, DecoratorError, DecoratorResult, Properties};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, warn};

/// 组件创建策略
pub trait ComponentCreator<K, P>: Send + Sync {
    /// 为新键创建一个尚未启动的组件
    fn create(&self, key: &K, params: &P) -> ComponentResult<Component>;

    /// 已有键的参数发生变化
    fn update(&self, _key: &K, _params: &P, _component: &Component) -> ComponentResult<()> {
        Ok(())
    }

    /// 由装饰器的服务属性计算某个组件的服务属性
    fn service_properties(&self, _key: &K, _params: &P, base: &Properties) -> Properties {
        base.clone()
    }

    /// 需要复制到每个新组件上的依赖
    fn dependencies(&self) -> Vec<Arc<dyn Dependency>> {
        Vec::new()
    }
}

struct Entry<P> {
    params: P,
    component: Component,
    /// `(原始依赖, 副本)`
    copies: Vec<(Arc<dyn Dependency>, Arc<dyn Dependency>)>,
}

/// 键到组件的扇出表
pub struct KeyedFanOut<K, P> {
    manager: WeakManager,
    creator: Box<dyn ComponentCreator<K, P>>,
    entries: Mutex<HashMap<K, Entry<P>>>,
}

impl<K, P> KeyedFanOut<K, P>
where
    K: Eq + Hash + Clone + Display + Send + 'static,
    P: Clone + Send + 'static,
{
    pub(crate) fn new(manager: WeakManager, creator: Box<dyn ComponentCreator<K, P>>) -> Self {
        Self {
            manager,
            creator,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// 为新键创建组件并交给管理器启动
    ///
    /// 键已存在时返回 [`DecoratorError::DuplicateKey`]。
    pub fn added(&self, key: K, params: P) -> DecoratorResult<Component> {
        let (component, copies) = {
            let mut entries = self.entries.lock();
            if entries.contains_key(&key) {
                return Err(DecoratorError::DuplicateKey {
                    key: key.to_string(),
                });
            }
            let component = self.create(&key, &params)?;
            let copies: Vec<(Arc<dyn Dependency>, Arc<dyn Dependency>)> = self
                .creator
                .dependencies()
                .into_iter()
                .map(|dependency| {
                    let copy = dependency.create_copy();
                    (dependency, copy)
                })
                .collect();
            entries.insert(
                key.clone(),
                Entry {
                    params,
                    component: component.clone(),
                    copies: copies.clone(),
                },
            );
            (component, copies)
        };

        let copies: Vec<Arc<dyn Dependency>> = copies.into_iter().map(|(_, copy)| copy).collect();
        if let Err(e) = component.add_all(copies) {
            warn!("装饰组件 {} 添加依赖失败: {}", key, e);
        }
        debug!("装饰键 {} 创建组件 {}", key, component.id());
        match self.manager.upgrade() {
            Some(manager) => manager.add(component.clone()),
            None => component.start(),
        }
        Ok(component)
    }

    /// 移除键对应的组件并停止它
    ///
    /// 键不存在时返回 [`DecoratorError::UnknownKey`]。
    pub fn removed(&self, key: &K) -> DecoratorResult<Component> {
        let entry = self
            .entries
            .lock()
            .remove(key)
            .ok_or_else(|| DecoratorError::UnknownKey {
                key: key.to_string(),
            })?;
        debug!("装饰键 {} 移除组件 {}", key, entry.component.id());
        self.retire(&entry.component);
        Ok(entry.component)
    }

    /// 把组件从旧键移到新键，组件本身保持不变
    pub fn swapped(&self, old: &K, new: K, params: P) -> DecoratorResult<Component> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&new) {
            return Err(DecoratorError::DuplicateKey {
                key: new.to_string(),
            });
        }
        let mut entry = entries.remove(old).ok_or_else(|| DecoratorError::UnknownKey {
            key: old.to_string(),
        })?;
        entry.params = params;
        let component = entry.component.clone();
        entries.insert(new, entry);
        Ok(component)
    }

    /// 键不存在时创建组件，否则交给策略更新已有组件
    pub fn updated(&self, key: K, params: P) -> DecoratorResult<Component> {
        let existing = {
            let mut entries = self.entries.lock();
            entries.get_mut(&key).map(|entry| {
                entry.params = params.clone();
                entry.component.clone()
            })
        };

        match existing {
            None => self.added(key, params),
            Some(component) => {
                self.creator
                    .update(&key, &params, &component)
                    .map_err(|source| DecoratorError::CreationFailed {
                        key: key.to_string(),
                        source,
                    })?;
                Ok(component)
            }
        }
    }

    /// 键对应的组件
    pub fn get(&self, key: &K) -> Option<Component> {
        self.entries.lock().get(key).map(|e| e.component.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.lock().keys().cloned().collect()
    }

    /// 所有组件，按组件 ID 排序
    pub fn components(&self) -> Vec<Component> {
        let mut components: Vec<Component> = self
            .entries
            .lock()
            .values()
            .map(|e| e.component.clone())
            .collect();
        components.sort();
        components
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按策略为每个组件重新计算并发布服务属性
    pub fn set_service_properties(&self, base: &Properties) {
        let targets: Vec<(Component, Properties)> = self
            .entries
            .lock()
            .iter()
            .map(|(key, entry)| {
                (
                    entry.component.clone(),
                    self.creator.service_properties(key, &entry.params, base),
                )
            })
            .collect();
        for (component, props) in targets {
            component.set_service_properties(props);
        }
    }

    pub fn add_state_listener(&self, listener: Arc<dyn ComponentStateListener>) {
        for component in self.components() {
            component.add_state_listener(Arc::clone(&listener));
        }
    }

    pub fn remove_state_listener(&self, listener: &Arc<dyn ComponentStateListener>) {
        for component in self.components() {
            component.remove_state_listener(listener);
        }
    }

    /// 给每个组件添加一份依赖副本
    pub fn add_dependency(&self, dependency: &Arc<dyn Dependency>) {
        let targets: Vec<(Component, Arc<dyn Dependency>)> = {
            let mut entries = self.entries.lock();
            entries
                .values_mut()
                .map(|entry| {
                    let copy = dependency.create_copy();
                    entry.copies.push((Arc::clone(dependency), Arc::clone(&copy)));
                    (entry.component.clone(), copy)
                })
                .collect()
        };
        for (component, copy) in targets {
            if let Err(e) = component.add(copy) {
                warn!("装饰组件 {} 添加依赖失败: {}", component.id(), e);
            }
        }
    }

    /// 从每个组件上移除对应的依赖副本
    pub fn remove_dependency(&self, dependency: &Arc<dyn Dependency>) {
        let targets: Vec<(Component, Arc<dyn Dependency>)> = {
            let mut entries = self.entries.lock();
            let mut targets = Vec::new();
            for entry in entries.values_mut() {
                let (matched, kept): (Vec<_>, Vec<_>) = entry
                    .copies
                    .drain(..)
                    .partition(|(original, _)| same_dependency(original, dependency));
                entry.copies = kept;
                targets.extend(
                    matched
                        .into_iter()
                        .map(|(_, copy)| (entry.component.clone(), copy)),
                );
            }
            targets
        };
        for (component, copy) in targets {
            component.remove(&copy);
        }
    }

    /// 停止并移除所有组件
    pub fn stop_all(&self) {
        let entries: Vec<(K, Entry<P>)> = self.entries.lock().drain().collect();
        for (key, entry) in entries {
            debug!("装饰键 {} 停止组件 {}", key, entry.component.id());
            self.retire(&entry.component);
        }
    }

    fn create(&self, key: &K, params: &P) -> DecoratorResult<Component> {
        self.creator
            .create(key, params)
            .map_err(|source| DecoratorError::CreationFailed {
                key: key.to_string(),
                source,
            })
    }

    fn retire(&self, component: &Component) {
        let removed = self
            .manager
            .upgrade()
            .map_or(false, |manager| manager.remove(component.id()));
        if !removed {
            component.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependencies::ToggleDependency;
    use crate::manager::DependencyManager;
    use crate::registry::InMemoryServiceRegistry;
    use crate::state::Phase;
    use dm_abstractions::{BundleContext, Injectable, Lifecycle};
    use parking_lot::Mutex as PlMutex;
    use serde_json::json;

    #[derive(Default)]
    struct Worker;

    impl Lifecycle for Worker {}
    impl Injectable for Worker {}

    struct Creator {
        manager: DependencyManager,
        updates: Arc<PlMutex<Vec<String>>>,
    }

    impl ComponentCreator<String, u32> for Creator {
        fn create(&self, key: &String, _params: &u32) -> ComponentResult<Component> {
            let component = self.manager.create_component();
            component
                .set_interface("Worker", dm_common::properties::properties([("key", json!(key))]))?
                .set_implementation::<Worker>()?;
            Ok(component)
        }

        fn update(&self, key: &String, params: &u32, _component: &Component) -> ComponentResult<()> {
            self.updates.lock().push(format!("{key}={params}"));
            Ok(())
        }
    }

    fn fan_out() -> (DependencyManager, KeyedFanOut<String, u32>, Arc<PlMutex<Vec<String>>>) {
        let registry = Arc::new(InMemoryServiceRegistry::new());
        let manager = DependencyManager::new(BundleContext::new(1, "fan-out", registry));
        let updates = Arc::new(PlMutex::new(Vec::new()));
        let creator = Creator {
            manager: manager.clone(),
            updates: Arc::clone(&updates),
        };
        let fan_out = KeyedFanOut::new(manager.downgrade(), Box::new(creator));
        (manager, fan_out, updates)
    }

    #[test]
    fn test_at_most_one_component_per_key() {
        let (manager, fan_out, _) = fan_out();

        let component = fan_out.added("a".to_string(), 1).unwrap();
        assert_eq!(component.phase(), Phase::Bound);
        assert_eq!(manager.len(), 1);

        let duplicate = fan_out.added("a".to_string(), 2);
        assert!(matches!(duplicate, Err(DecoratorError::DuplicateKey { .. })));
        assert_eq!(fan_out.len(), 1);

        let removed = fan_out.removed(&"a".to_string()).unwrap();
        assert_eq!(removed.phase(), Phase::Inactive);
        assert!(manager.is_empty());

        let unknown = fan_out.removed(&"a".to_string());
        assert!(matches!(unknown, Err(DecoratorError::UnknownKey { .. })));
    }

    #[test]
    fn test_updated_creates_then_updates() {
        let (_manager, fan_out, updates) = fan_out();

        let first = fan_out.updated("pid".to_string(), 1).unwrap();
        let second = fan_out.updated("pid".to_string(), 2).unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(fan_out.len(), 1);
        assert_eq!(*updates.lock(), vec!["pid=2".to_string()]);
    }

    #[test]
    fn test_swapped_rekeys_component() {
        let (_manager, fan_out, _) = fan_out();
        let component = fan_out.added("old".to_string(), 1).unwrap();

        let swapped = fan_out.swapped(&"old".to_string(), "new".to_string(), 2).unwrap();

        assert!(component.ptr_eq(&swapped));
        assert!(!fan_out.contains(&"old".to_string()));
        assert!(fan_out.get(&"new".to_string()).is_some());
        assert!(matches!(
            fan_out.swapped(&"old".to_string(), "other".to_string(), 3),
            Err(DecoratorError::UnknownKey { .. })
        ));
    }

    #[test]
    fn test_dependency_fan_out_and_stop_all() {
        let (manager, fan_out, _) = fan_out();
        let a = fan_out.added("a".to_string(), 1).unwrap();
        let b = fan_out.added("b".to_string(), 2).unwrap();

        let gate: Arc<dyn Dependency> = ToggleDependency::builder().with_required(true).build();
        fan_out.add_dependency(&gate);
        assert_eq!(a.dependencies().len(), 1);
        assert_eq!(a.phase(), Phase::WaitingForRequired);
        assert_eq!(b.phase(), Phase::WaitingForRequired);

        fan_out.remove_dependency(&gate);
        assert!(a.dependencies().is_empty());
        assert_eq!(a.phase(), Phase::Bound);

        fan_out.stop_all();
        assert!(fan_out.is_empty());
        assert!(manager.is_empty());
        assert_eq!(b.phase(), Phase::Inactive);
    }
}
