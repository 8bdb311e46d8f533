//! 配置目录监控器

use crate::providers::{ConfigurationKey, FileConfigurationSource};
use dm_abstractions::ConfigurationAdmin;
use dm_common::ConfigError;
use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 配置目录监控器
///
/// 文件创建或修改时重新加载并更新对应的配置，文件删除时删除配置。
pub struct DirectoryWatcher {
    directory: PathBuf,
    watcher: Option<notify::RecommendedWatcher>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("directory", &self.directory)
            .field("is_watching", &self.is_watching())
            .finish()
    }
}

impl DirectoryWatcher {
    /// 开始监控目录，必须在 tokio 运行时中调用
    pub fn start<P: AsRef<Path>>(directory: P, admin: Arc<dyn ConfigurationAdmin>) -> Result<Self, ConfigError> {
        let directory = directory.as_ref().to_path_buf();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Event>();

        // notify 的回调是同步的，事件经通道交给异步任务处理
        let mut watcher = recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if sender.send(event).is_err() {
                    debug!("配置监控任务已结束，丢弃文件事件");
                }
            }
            Err(e) => error!("文件监控错误: {:?}", e),
        })
        .map_err(|e| ConfigError::WatchError {
            message: format!("创建文件监控器失败: {}", e),
        })?;
        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::WatchError {
                message: format!("监控目录 {} 失败: {}", directory.display(), e),
            })?;

        let task = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                handle_event(admin.as_ref(), event).await;
            }
        });

        info!("开始监控配置目录: {}", directory.display());
        Ok(Self {
            directory,
            watcher: Some(watcher),
            task: Some(task),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// 停止监控
    pub async fn stop(&mut self) {
        if self.watcher.take().is_none() {
            return;
        }
        // 监控器释放后通道关闭，任务处理完剩余事件后退出
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("配置监控任务异常退出: {}", e);
            }
        }
        info!("停止监控配置目录: {}", self.directory.display());
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn handle_event(admin: &dyn ConfigurationAdmin, event: Event) {
    for path in &event.paths {
        let Some(key) = ConfigurationKey::from_path(path) else {
            continue;
        };
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => reload(admin, path, &key).await,
            EventKind::Remove(_) => {
                let pid = key.pid();
                match admin.delete(&pid) {
                    Ok(()) => info!("配置文件已删除，删除配置: {}", pid),
                    Err(ConfigError::NotFound { .. }) => debug!("配置 {} 已不存在", pid),
                    Err(e) => warn!("删除配置 {} 失败: {}", pid, e),
                }
            }
            _ => {}
        }
    }
}

async fn reload(admin: &dyn ConfigurationAdmin, path: &Path, key: &ConfigurationKey) {
    // 重命名或删除后的修改事件可能指向不存在的文件
    if !path.exists() {
        return;
    }
    match FileConfigurationSource::load_file(path).await {
        Ok(Some(record)) => {
            if admin.get(&key.pid()).map(strip_admin_keys) == Some(record.properties.clone()) {
                debug!("配置文件内容未变化: {}", path.display());
                return;
            }
            match key.apply(admin, record.properties) {
                Ok(pid) => info!("配置文件已变化，更新配置: {}", pid),
                Err(e) => warn!("更新配置 {} 失败: {}", key.pid(), e),
            }
        }
        Ok(None) => {}
        // 编辑器写入过程中可能读到不完整的内容，等待下一次修改事件
        Err(e) => warn!("加载配置文件 {} 失败: {}", path.display(), e),
    }
}

fn strip_admin_keys(mut props: dm_common::Properties) -> dm_common::Properties {
    props.remove(dm_common::SERVICE_PID);
    props.remove(dm_common::FACTORY_PID);
    props
}
