//! 串行执行器
//!
//! 多个线程可以同时投递任务，但同一时刻最多只有一个线程在执行。
//! 第一个调用 [`SerialExecutor::execute`] 的线程成为执行者，负责把队列排空，
//! 其余线程立即返回，它们投递的任务由执行者代为完成。

use crate::callback::panic_message;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, ThreadId};
use tracing::{error, warn};

/// 闭包任务
pub type Task = Box<dyn FnOnce() + Send>;

struct Queue<W> {
    items: VecDeque<W>,
    runner: Option<ThreadId>,
}

/// 串行执行器
///
/// 工作项类型 `W` 由构造时固定的处理函数消费。
pub struct SerialExecutor<W> {
    name: String,
    queue: Mutex<Queue<W>>,
    handler: Box<dyn Fn(W) + Send + Sync>,
}

impl<W: Send + 'static> SerialExecutor<W> {
    /// 创建执行器
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(W) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            queue: Mutex::new(Queue {
                items: VecDeque::new(),
                runner: None,
            }),
            handler: Box::new(handler),
        }
    }

    /// 投递任务，不会等待执行
    pub fn enqueue(&self, item: W) {
        self.queue.lock().items.push_back(item);
    }

    /// 尝试成为执行者并排空队列
    ///
    /// 已有执行者时立即返回。
    pub fn execute(&self) {
        {
            let mut queue = self.queue.lock();
            if queue.runner.is_some() {
                return;
            }
            queue.runner = Some(thread::current().id());
        }
        self.drain();
    }

    /// 投递并执行
    pub fn execute_with(&self, item: W) {
        self.enqueue(item);
        self.execute();
    }

    /// 当前线程就是执行者时直接执行，否则等同于 [`Self::execute_with`]
    pub fn execute_now(&self, item: W) {
        if self.is_running_on_current_thread() {
            let pending = self.pending();
            if pending > 0 {
                warn!("执行器 {} 插队执行任务，跳过了 {} 个排队任务", self.name, pending);
            }
            self.run(item);
        } else {
            self.execute_with(item);
        }
    }

    /// 当前线程是否为执行者
    pub fn is_running_on_current_thread(&self) -> bool {
        self.queue.lock().runner == Some(thread::current().id())
    }

    /// 是否有执行者正在排空队列
    pub fn is_active(&self) -> bool {
        self.queue.lock().runner.is_some()
    }

    /// 排队中的任务数
    pub fn pending(&self) -> usize {
        self.queue.lock().items.len()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn drain(&self) {
        loop {
            let next = {
                let mut queue = self.queue.lock();
                match queue.items.pop_front() {
                    Some(item) => item,
                    None => {
                        queue.runner = None;
                        return;
                    }
                }
            };
            self.run(next);
        }
    }

    fn run(&self, item: W) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (self.handler)(item))) {
            error!(
                "执行器 {} 的任务执行失败: {}",
                self.name,
                panic_message(payload.as_ref())
            );
        }
    }
}

impl SerialExecutor<Task> {
    /// 创建执行闭包任务的执行器
    pub fn for_tasks(name: impl Into<String>) -> Self {
        Self::new(name, |task: Task| task())
    }
}

impl<W> fmt::Debug for SerialExecutor<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.queue.lock();
        f.debug_struct("SerialExecutor")
            .field("name", &self.name)
            .field("pending", &queue.items.len())
            .field("active", &queue.runner.is_some())
            .finish()
    }
}
