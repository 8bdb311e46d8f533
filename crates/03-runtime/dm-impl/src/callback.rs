//! 用户回调的调用边界
//!
//! 回调返回的错误和 panic 都在这里被捕获并记录，不会越过执行器边界。

use dm_common::CallbackResult;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

/// 提取 panic 负载中的文本
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知 panic".to_string()
    }
}

/// 调用一个回调，失败时记录警告
///
/// 返回回调是否成功完成。
pub(crate) fn invoke_guarded<F>(owner: &str, callback: &str, f: F) -> bool
where
    F: FnOnce() -> CallbackResult,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("{} 的回调 {} 执行失败: {}", owner, callback, e);
            false
        }
        Err(payload) => {
            warn!(
                "{} 的回调 {} 发生 panic: {}",
                owner,
                callback,
                panic_message(payload.as_ref())
            );
            false
        }
    }
}

/// 调用一个无返回值的通知，panic 时记录警告
pub(crate) fn notify_guarded<F>(owner: &str, callback: &str, f: F)
where
    F: FnOnce(),
{
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        warn!(
            "{} 的监听器 {} 发生 panic: {}",
            owner,
            callback,
            panic_message(payload.as_ref())
        );
    }
}
