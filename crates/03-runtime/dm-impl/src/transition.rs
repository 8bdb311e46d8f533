//! 状态迁移表

use crate::state::Phase;
use serde::Serialize;
use std::fmt;

/// 迁移动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransitionAction {
    /// 创建实例、配置依赖、调用 init
    Activate,
    /// 调用 start、跟踪可选依赖、注册服务
    Bind,
    /// 注销服务、停止跟踪可选依赖、调用 stop
    Unbind,
    /// 调用 destroy、丢弃实例
    Deactivate,
    /// 开始跟踪必需依赖
    StartTrackingRequired,
    /// 停止跟踪必需依赖
    StopTrackingRequired,
}

impl TransitionAction {
    /// 动作作用于迁移前的快照还是迁移后的快照
    pub fn acts_on_previous_state(&self) -> bool {
        matches!(
            self,
            Self::Unbind | Self::Deactivate | Self::StopTrackingRequired
        )
    }
}

impl fmt::Display for TransitionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Activate => "activate",
            Self::Bind => "bind",
            Self::Unbind => "unbind",
            Self::Deactivate => "deactivate",
            Self::StartTrackingRequired => "start tracking required",
            Self::StopTrackingRequired => "stop tracking required",
        };
        f.write_str(text)
    }
}

/// 查询 `old -> new` 迁移需要按顺序执行的动作
///
/// 表中没有的组合返回空切片。
pub fn transition_actions(old: Phase, new: Phase) -> &'static [TransitionAction] {
    use Phase::*;
    use TransitionAction::*;

    match (old, new) {
        (Inactive, TrackingOptional) => &[Activate],
        (Inactive, WaitingForRequired) => &[StartTrackingRequired],
        (WaitingForRequired, TrackingOptional) => &[Activate],
        (WaitingForRequired, Inactive) => &[StopTrackingRequired],
        (TrackingOptional, WaitingForRequiredInstantiated) => &[],
        (TrackingOptional, Bound) => &[Bind],
        (TrackingOptional, WaitingForRequired) => &[Deactivate],
        (TrackingOptional, Inactive) => &[Deactivate, StopTrackingRequired],
        (WaitingForRequiredInstantiated, WaitingForRequired) => &[Deactivate],
        (WaitingForRequiredInstantiated, Inactive) => &[Deactivate, StopTrackingRequired],
        (WaitingForRequiredInstantiated, Bound) => &[Bind],
        (Bound, WaitingForRequiredInstantiated) => &[Unbind],
        (Bound, WaitingForRequired) => &[Unbind, Deactivate],
        (Bound, Inactive) => &[Unbind, Deactivate, StopTrackingRequired],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Phase::*;
    use TransitionAction::*;

    const PHASES: [Phase; 5] = [
        Inactive,
        WaitingForRequired,
        TrackingOptional,
        WaitingForRequiredInstantiated,
        Bound,
    ];

    #[test]
    fn test_transition_table() {
        let expected: &[(Phase, Phase, &[TransitionAction])] = &[
            (Inactive, TrackingOptional, &[Activate]),
            (Inactive, WaitingForRequired, &[StartTrackingRequired]),
            (WaitingForRequired, TrackingOptional, &[Activate]),
            (WaitingForRequired, Inactive, &[StopTrackingRequired]),
            (TrackingOptional, Bound, &[Bind]),
            (TrackingOptional, WaitingForRequired, &[Deactivate]),
            (TrackingOptional, Inactive, &[Deactivate, StopTrackingRequired]),
            (WaitingForRequiredInstantiated, WaitingForRequired, &[Deactivate]),
            (
                WaitingForRequiredInstantiated,
                Inactive,
                &[Deactivate, StopTrackingRequired],
            ),
            (WaitingForRequiredInstantiated, Bound, &[Bind]),
            (Bound, WaitingForRequiredInstantiated, &[Unbind]),
            (Bound, WaitingForRequired, &[Unbind, Deactivate]),
            (Bound, Inactive, &[Unbind, Deactivate, StopTrackingRequired]),
        ];

        for old in PHASES {
            for new in PHASES {
                let want = expected
                    .iter()
                    .find(|(o, n, _)| *o == old && *n == new)
                    .map(|(_, _, actions)| *actions)
                    .unwrap_or(&[]);
                assert_eq!(transition_actions(old, new), want, "{old} -> {new}");
            }
        }
    }

    #[test]
    fn test_tracking_optional_to_waiting_instantiated_is_noop() {
        assert!(transition_actions(TrackingOptional, WaitingForRequiredInstantiated).is_empty());
    }

    #[test]
    fn test_action_snapshot_selection() {
        assert!(!Activate.acts_on_previous_state());
        assert!(!Bind.acts_on_previous_state());
        assert!(!StartTrackingRequired.acts_on_previous_state());
        assert!(Unbind.acts_on_previous_state());
        assert!(Deactivate.acts_on_previous_state());
        assert!(StopTrackingRequired.acts_on_previous_state());
    }
}
