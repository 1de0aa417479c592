//! 事件分发
//!
//! 单个消费者顺序处理监听器事件：分类 → 防抖 → 为每个事件启动独立任务。
//! 每个任务都有处理上限，超时只记录日志并放弃等待，不强制取消。
//! 新目录的遍历在阻塞线程上进行：注册调用要等监听器线程应答，不能占住事件循环。

use std::any::Any;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{EventKind as RawKind, ModifyKind, RenameMode};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep, timeout, Instant};

use crate::config::AgentConfig;
use crate::debouncer::Debouncer;
use crate::delivery::DeliveryPolicy;
use crate::error::{Error, Result};
use crate::registrar::{Registrar, WatchTarget};
use crate::transport::Transport;
use crate::types::{DeliveryOutcome, EventKind, FileEvent};

/// 监听器回调送来的原始事件
pub type RawEvent = notify::Result<notify::Event>;

/// 把监听器事件映射为逻辑事件
///
/// rename 的旧路径按删除处理，新路径按创建处理；访问类事件忽略。
pub fn classify(event: &notify::Event) -> Vec<(PathBuf, EventKind)> {
    let all = |kind: EventKind| -> Vec<(PathBuf, EventKind)> {
        event.paths.iter().map(|p| (p.clone(), kind)).collect()
    };

    match event.kind {
        RawKind::Create(_) => all(EventKind::Write),
        RawKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => all(EventKind::Remove),
            RenameMode::To => all(EventKind::Write),
            RenameMode::Both => event
                .paths
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let kind = if i == 0 { EventKind::Remove } else { EventKind::Write };
                    (p.clone(), kind)
                })
                .collect(),
            // 平台无法判断方向，看路径是否还在
            RenameMode::Any | RenameMode::Other => event
                .paths
                .iter()
                .map(|p| {
                    let kind = if p.exists() { EventKind::Write } else { EventKind::Remove };
                    (p.clone(), kind)
                })
                .collect(),
        },
        // 内容、权限等变化
        RawKind::Modify(_) => all(EventKind::Write),
        RawKind::Remove(_) => all(EventKind::Remove),
        RawKind::Access(_) | RawKind::Any | RawKind::Other => Vec::new(),
    }
}

/// 在独立任务中运行 `operation`，最多等待 `ceiling`
///
/// 超时后任务被放弃（不 abort），panic 转换为 [`Error::TaskFailed`]。
pub async fn run_bounded<F>(path: &Path, ceiling: Duration, operation: F) -> Result<DeliveryOutcome>
where
    F: Future<Output = Result<DeliveryOutcome>> + Send + 'static,
{
    let handle = tokio::spawn(operation);

    match timeout(ceiling, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            let reason = if join_err.is_panic() {
                format!("panicked: {}", panic_message(join_err.into_panic()))
            } else {
                "cancelled".to_string()
            };
            Err(Error::TaskFailed {
                path: path.to_path_buf(),
                reason,
            })
        }
        Err(_) => Err(Error::EventTimeout {
            path: path.to_path_buf(),
            timeout: ceiling,
        }),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 注册器和监听器本体，遍历时整体加锁
struct Watches<W> {
    registrar: Registrar,
    target: W,
}

/// 事件分发器
pub struct Dispatcher<T, W> {
    policy: Arc<DeliveryPolicy<T>>,
    debouncer: Debouncer,
    /// Dispatcher 结束时监听器一起释放
    watches: Arc<Mutex<Watches<W>>>,
    /// 已删除、尚未从注册器中清除的路径
    removed: Arc<Mutex<Vec<PathBuf>>>,
    settle_delay: Duration,
    event_timeout: Duration,
    tasks: JoinSet<()>,
    /// 进行中的目录遍历，结果是新发现的文件
    walks: JoinSet<Vec<PathBuf>>,
}

impl<T: Transport, W: WatchTarget + 'static> Dispatcher<T, W> {
    pub fn new(
        policy: Arc<DeliveryPolicy<T>>,
        registrar: Registrar,
        target: W,
        config: &AgentConfig,
    ) -> Self {
        Self {
            policy,
            debouncer: Debouncer::new(config.debounce_window),
            watches: Arc::new(Mutex::new(Watches { registrar, target })),
            removed: Arc::new(Mutex::new(Vec::new())),
            settle_delay: config.settle_delay,
            event_timeout: config.event_timeout,
            tasks: JoinSet::new(),
            walks: JoinSet::new(),
        }
    }

    /// 启动时推送已有文件（不等待 settle）
    pub fn prime(&mut self, files: Vec<PathBuf>) {
        let now = Instant::now();
        let count = files.len();
        for path in files {
            if self.debouncer.should_accept(&path, now) {
                self.spawn_event(FileEvent::new(path, EventKind::Write), Duration::ZERO);
            }
        }
        tracing::info!("📦 Initial sync queued {} files", count);
    }

    /// 主循环，直到收到关闭信号或事件通道关闭
    ///
    /// 退出前等待已派发的任务（每个最多 `event_timeout`）。
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<RawEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        tracing::info!("🔄 Dispatcher started");

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => {
                    tracing::info!("Shutdown requested, no longer accepting events");
                    break;
                }
                received = events.recv() => match received {
                    Some(Ok(event)) => self.on_event(&event),
                    Some(Err(e)) => {
                        tracing::warn!("⚠️ {}", Error::NotifierInternal(e));
                    }
                    None => {
                        tracing::info!("Event channel closed");
                        break;
                    }
                },
                Some(joined) = self.walks.join_next(), if !self.walks.is_empty() => {
                    self.on_walked(joined);
                }
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Event supervisor task failed: {}", e);
                    }
                }
            }
        }

        self.drain().await;
        Ok(())
    }

    fn on_event(&mut self, event: &notify::Event) {
        for (path, kind) in classify(event) {
            match kind {
                EventKind::Write => self.on_write(path),
                EventKind::Remove => {
                    self.debouncer.forget(&path);
                    self.forget_watches(path.clone());
                    self.spawn_event(FileEvent::new(path, EventKind::Remove), Duration::ZERO);
                }
            }
        }
    }

    fn on_write(&mut self, path: PathBuf) {
        // 目录本身不推送，新目录需要注册
        if path.is_dir() {
            self.register_directory(path);
            return;
        }

        if !self.debouncer.should_accept(&path, Instant::now()) {
            tracing::debug!("Debounced write event for {:?}", path);
            return;
        }

        self.spawn_event(FileEvent::new(path, EventKind::Write), self.settle_delay);
    }

    /// 同一 inode 可能被新建的目录复用，删除后必须从注册器中清除
    ///
    /// 遍历进行中时不等锁，留给下一次遍历在开始前处理。
    fn forget_watches(&self, path: PathBuf) {
        let mut pending = self.removed.lock();
        pending.push(path);
        if let Some(mut watches) = self.watches.try_lock() {
            apply_removals(&mut watches.registrar, &mut pending);
        }
    }

    fn register_directory(&mut self, dir: PathBuf) {
        let watches = self.watches.clone();
        let removed = self.removed.clone();

        self.walks.spawn_blocking(move || {
            let mut guard = watches.lock();
            let Watches { registrar, target } = &mut *guard;
            apply_removals(registrar, &mut removed.lock());

            match registrar.walk(target, &dir) {
                Ok(summary) if summary.directories > 0 => {
                    tracing::info!(
                        "👁️ Registered {} new directories under {:?}",
                        summary.directories,
                        dir
                    );
                    summary.files
                }
                Ok(_) => Vec::new(),
                Err(e) => {
                    tracing::warn!("⚠️ Failed to register new directory {:?}: {}", dir, e);
                    Vec::new()
                }
            }
        });
    }

    /// 移入的目录里已有的文件不会再产生事件，这里补发
    fn on_walked(&mut self, joined: std::result::Result<Vec<PathBuf>, JoinError>) {
        let files = match joined {
            Ok(files) => files,
            Err(e) => {
                tracing::error!("Directory registration task failed: {}", e);
                return;
            }
        };

        let now = Instant::now();
        for file in files {
            if self.debouncer.should_accept(&file, now) {
                self.spawn_event(FileEvent::new(file, EventKind::Write), self.settle_delay);
            }
        }
    }

    fn spawn_event(&mut self, event: FileEvent, settle: Duration) {
        let policy = self.policy.clone();
        let ceiling = self.event_timeout;

        self.tasks.spawn(async move {
            let path = event.path.clone();
            let action = event.kind.method();
            let id = event.id;
            let observed_at = event.observed_at;

            let operation = async move {
                if !settle.is_zero() {
                    sleep(settle).await;
                }
                policy.handle(&event).await
            };

            match run_bounded(&path, ceiling, operation).await {
                Ok(outcome) => {
                    tracing::debug!(
                        "✅ {} {:?} done in {:?} (status {}, event {})",
                        action,
                        path,
                        observed_at.elapsed(),
                        outcome.status,
                        id
                    );
                }
                Err(e) => {
                    tracing::error!(
                        "❌ {} {:?} failed after {:?} (event {}): {}",
                        action,
                        path,
                        observed_at.elapsed(),
                        id,
                        e
                    );
                }
            }
        });
    }

    async fn drain(&mut self) {
        // 遍历结果也算已接受的事件
        while let Some(joined) = self.walks.join_next().await {
            self.on_walked(joined);
        }

        let pending = self.tasks.len();
        if pending > 0 {
            tracing::info!("⏳ Waiting for {} in-flight events", pending);
        }
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Event supervisor task failed: {}", e);
            }
        }
    }
}

fn apply_removals(registrar: &mut Registrar, pending: &mut Vec<PathBuf>) {
    for path in pending.drain(..) {
        let forgotten = registrar.forget(&path);
        if forgotten > 0 {
            tracing::debug!("Forgot {} watched directories under {:?}", forgotten, path);
        }
    }
}

/// 等待关闭信号；发送端被丢弃时永远挂起
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let sender_gone = shutdown.wait_for(|stop| *stop).await.is_err();
    if sender_gone {
        std::future::pending::<()>().await;
    }
}
