//! Agent 生命周期
//!
//! 负责：
//! - 创建文件系统监听器，把回调事件桥接到异步通道
//! - 启动前注册所有监听目录（阻塞，完成后才进入事件循环）
//! - 运行 Dispatcher 直到关闭信号，返回第一个致命错误

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{mpsc, watch};

use crate::config::{AgentConfig, WatchConfig};
use crate::delivery::DeliveryPolicy;
use crate::dispatcher::{Dispatcher, RawEvent};
use crate::error::{Error, Result};
use crate::registrar::{Registrar, WatchTarget};
use crate::transport::{HttpTransport, Transport};

/// 文件推送 Agent
pub struct Agent<T> {
    watch: WatchConfig,
    config: AgentConfig,
    transport: Arc<T>,
}

impl Agent<HttpTransport> {
    /// 使用 HTTP 传输创建 Agent
    pub fn new(watch: WatchConfig, config: AgentConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&watch, &config)?);
        Ok(Self::with_transport(watch, config, transport))
    }
}

impl<T: Transport> Agent<T> {
    pub fn with_transport(watch: WatchConfig, config: AgentConfig, transport: Arc<T>) -> Self {
        Self {
            watch,
            config,
            transport,
        }
    }

    /// 运行直到 `shutdown` 变为 `true` 或监听器停止
    ///
    /// 启动失败（监听器创建、目录注册）返回致命错误；单事件失败只记录日志。
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel::<RawEvent>();

        // 回调运行在监听器自己的线程上，这个线程同时处理 watch() 注册，不能阻塞
        let watcher = notify::recommended_watcher(move |res: RawEvent| {
            let _ = tx.send(res);
        })
        .map_err(Error::NotifierInit)?;

        let roots = self.watch.paths.clone();
        let (watcher, registrar, files) =
            tokio::task::spawn_blocking(move || register_roots(watcher, &roots))
                .await
                .map_err(|e| anyhow!("registration task failed: {}", e))??;

        tracing::info!(
            "🚀 Watching {} directories under {} roots → {}",
            registrar.registered(),
            self.watch.paths.len(),
            self.watch.url
        );

        let policy = Arc::new(DeliveryPolicy::new(self.transport.clone(), &self.config));
        let mut dispatcher = Dispatcher::new(policy, registrar, watcher, &self.config);

        if self.config.initial_sync {
            dispatcher.prime(files);
        }

        dispatcher.run(rx, shutdown).await?;

        tracing::info!("🧹 Agent stopped");
        Ok(())
    }
}

/// 注册所有根路径：目录递归注册，普通文件直接监听
///
/// 返回监听目标、注册器和遍历到的全部文件。
pub fn register_roots<W: WatchTarget>(
    mut target: W,
    roots: &[PathBuf],
) -> Result<(W, Registrar, Vec<PathBuf>)> {
    let mut registrar = Registrar::new();
    let mut files = Vec::new();

    for root in roots {
        if root.is_dir() {
            let summary = registrar.walk(&mut target, root)?;
            tracing::debug!(
                "👁️ {:?}: {} directories, {} files",
                root,
                summary.directories,
                summary.files.len()
            );
            files.extend(summary.files);
        } else {
            target.add(root).map_err(|source| Error::WatchSetup {
                path: root.clone(),
                source,
            })?;
            tracing::debug!("👁️ Watching file {:?}", root);
            files.push(root.clone());
        }
    }

    Ok((target, registrar, files))
}

/// 启动信号监听任务（Ctrl-C / SIGTERM），返回关闭信号
pub fn spawn_signal_handler() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = tx.send(true);
        // 保持发送端存活直到所有接收端退出
        tx.closed().await;
    });
    rx
}

/// 等待进程终止信号
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registrar::testing::RecordingTarget;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_plain_file_root_watched_directly() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("single.txt");
        fs::write(&file, "x").unwrap();

        let (target, registrar, files) =
            register_roots(RecordingTarget::default(), &[file.clone()]).unwrap();

        assert_eq!(target.added, vec![file.clone()]);
        assert_eq!(registrar.registered(), 0);
        assert_eq!(files, vec![file]);
    }

    #[test]
    fn test_duplicate_roots_are_harmless() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/a.txt"), "a").unwrap();

        let root = dir.path().to_path_buf();
        let (target, registrar, _files) =
            register_roots(RecordingTarget::default(), &[root.clone(), root]).unwrap();

        assert_eq!(target.added.len(), 2);
        assert_eq!(registrar.registered(), 2);
    }

    #[test]
    fn test_root_registration_failure_is_fatal() {
        let dir = tempdir().unwrap();
        let target = RecordingTarget {
            fail_on: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let err = register_roots(target, &[dir.path().to_path_buf()]).unwrap_err();
        assert!(err.is_fatal());
    }
}
