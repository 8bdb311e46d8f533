//! 组件状态快照
//!
//! 每次依赖事件都会生成一个新的 [`State`]，阶段只由四个输入决定。

use dm_abstractions::Dependency;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// 生命周期阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// 未启动
    Inactive,
    /// 已启动，等待必需依赖，尚未创建实例
    WaitingForRequired,
    /// 必需依赖已满足，尚未创建实例
    TrackingOptional,
    /// 已创建实例，缺失的必需依赖都是实例绑定的
    WaitingForRequiredInstantiated,
    /// 已创建实例且必需依赖全部满足
    Bound,
}

impl Phase {
    /// 由四个输入计算阶段
    ///
    /// `keep_instance_around` 表示所有缺失的必需依赖都是实例绑定的。
    pub fn classify(
        is_started: bool,
        is_instantiated: bool,
        all_required_available: bool,
        keep_instance_around: bool,
    ) -> Self {
        if !is_started {
            Self::Inactive
        } else if all_required_available {
            if is_instantiated {
                Self::Bound
            } else {
                Self::TrackingOptional
            }
        } else if is_instantiated && keep_instance_around {
            Self::WaitingForRequiredInstantiated
        } else {
            Self::WaitingForRequired
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Inactive => "inactive",
            Self::WaitingForRequired => "waiting for required",
            Self::TrackingOptional => "tracking optional",
            Self::WaitingForRequiredInstantiated => "waiting for required (instantiated)",
            Self::Bound => "bound",
        };
        f.write_str(text)
    }
}

/// 不可变的状态快照
#[derive(Clone)]
pub struct State {
    dependencies: Vec<Arc<dyn Dependency>>,
    is_started: bool,
    is_instantiated: bool,
    is_bound: bool,
    phase: Phase,
}

impl State {
    /// 创建快照，只对依赖列表做一次线性扫描
    pub fn new(
        dependencies: Vec<Arc<dyn Dependency>>,
        is_started: bool,
        is_instantiated: bool,
        is_bound: bool,
    ) -> Self {
        let mut all_required_available = true;
        let mut keep_instance_around = true;
        if is_started {
            for dependency in dependencies.iter().filter(|d| d.is_required()) {
                if !dependency.is_available() {
                    all_required_available = false;
                    if !dependency.is_instance_bound() {
                        keep_instance_around = false;
                    }
                }
            }
        }

        Self {
            phase: Phase::classify(
                is_started,
                is_instantiated,
                all_required_available,
                keep_instance_around,
            ),
            dependencies,
            is_started,
            is_instantiated,
            is_bound,
        }
    }

    /// 初始状态：没有依赖，未启动
    pub fn initial() -> Self {
        Self::new(Vec::new(), false, false, false)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn dependencies(&self) -> &[Arc<dyn Dependency>] {
        &self.dependencies
    }

    pub fn is_started(&self) -> bool {
        self.is_started
    }

    pub fn is_instantiated_input(&self) -> bool {
        self.is_instantiated
    }

    pub fn is_bound_input(&self) -> bool {
        self.is_bound
    }

    pub fn is_inactive(&self) -> bool {
        self.phase == Phase::Inactive
    }

    pub fn is_waiting_for_required(&self) -> bool {
        self.phase == Phase::WaitingForRequired
    }

    pub fn is_tracking_optional(&self) -> bool {
        self.phase == Phase::TrackingOptional
    }

    pub fn is_waiting_for_required_instantiated(&self) -> bool {
        self.phase == Phase::WaitingForRequiredInstantiated
    }

    pub fn is_bound(&self) -> bool {
        self.phase == Phase::Bound
    }

    pub fn is_all_required_available(&self) -> bool {
        self.is_tracking_optional() || self.is_bound()
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("phase", &self.phase)
            .field("dependencies", &self.dependencies.len())
            .field("is_started", &self.is_started)
            .field("is_instantiated", &self.is_instantiated)
            .field("is_bound", &self.is_bound)
            .finish()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dm_abstractions::DependencyService;
    use dm_common::DependencyError;

    struct Fixed {
        required: bool,
        available: bool,
        instance_bound: bool,
    }

    impl Dependency for Fixed {
        fn name(&self) -> String {
            "fixed".to_string()
        }

        fn kind(&self) -> &'static str {
            "fixed"
        }

        fn is_required(&self) -> bool {
            self.required
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn is_instance_bound(&self) -> bool {
            self.instance_bound
        }

        fn start(&self, _service: Arc<dyn DependencyService>) -> Result<(), DependencyError> {
            Ok(())
        }

        fn stop(&self) -> Result<(), DependencyError> {
            Ok(())
        }

        fn create_copy(&self) -> Arc<dyn Dependency> {
            dependency(self.required, self.available, self.instance_bound)
        }
    }

    fn dependency(required: bool, available: bool, instance_bound: bool) -> Arc<dyn Dependency> {
        Arc::new(Fixed {
            required,
            available,
            instance_bound,
        })
    }

    #[test]
    fn test_classification_table() {
        use Phase::*;
        // (started, instantiated, all_required_available, keep_instance_around) -> phase
        let table = [
            ((false, false, false, false), Inactive),
            ((false, false, false, true), Inactive),
            ((false, false, true, false), Inactive),
            ((false, false, true, true), Inactive),
            ((false, true, false, false), Inactive),
            ((false, true, false, true), Inactive),
            ((false, true, true, false), Inactive),
            ((false, true, true, true), Inactive),
            ((true, false, false, false), WaitingForRequired),
            ((true, false, false, true), WaitingForRequired),
            ((true, false, true, false), TrackingOptional),
            ((true, false, true, true), TrackingOptional),
            ((true, true, false, false), WaitingForRequired),
            ((true, true, false, true), WaitingForRequiredInstantiated),
            ((true, true, true, false), Bound),
            ((true, true, true, true), Bound),
        ];

        for ((started, instantiated, available, keep), expected) in table {
            assert_eq!(
                Phase::classify(started, instantiated, available, keep),
                expected,
                "started={started} instantiated={instantiated} available={available} keep={keep}"
            );
        }
    }

    #[test]
    fn test_state_scans_dependencies() {
        let state = State::new(vec![dependency(true, false, false)], true, false, false);
        assert!(state.is_waiting_for_required());

        let state = State::new(vec![dependency(true, true, false)], true, false, false);
        assert!(state.is_tracking_optional());
        assert!(state.is_all_required_available());

        let state = State::new(
            vec![dependency(true, true, false), dependency(false, false, false)],
            true,
            true,
            false,
        );
        assert!(state.is_bound());
    }

    #[test]
    fn test_instance_bound_keeps_instance() {
        let deps = vec![dependency(true, true, false), dependency(true, false, true)];
        let state = State::new(deps.clone(), true, true, true);
        assert!(state.is_waiting_for_required_instantiated());
        assert!(!state.is_all_required_available());

        // 未创建实例时实例绑定不起作用
        let state = State::new(deps, true, false, false);
        assert!(state.is_waiting_for_required());
    }

    #[test]
    fn test_bound_input_does_not_affect_phase() {
        let deps = vec![dependency(true, true, false)];
        let a = State::new(deps.clone(), true, true, false);
        let b = State::new(deps, true, true, true);
        assert_eq!(a.phase(), b.phase());
        assert!(b.is_bound_input());
        assert!(State::initial().is_inactive());
    }
}
