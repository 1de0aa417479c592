//! 推送策略
//!
//! - 写事件：读文件（有限次重试、线性退避），成功后 POST 一次
//! - 删除事件：直接 DELETE 一次，不读文件、不重试
//!
//! 读到 0 字节视为文件仍在写入中，和读取失败一样重试。真正的空文件因此无法推送。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::config::{AgentConfig, StatusPolicy};
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::types::{DeliveryOutcome, DeliveryRequest, EventKind, FileEvent};

/// 包装 Transport 的推送策略
pub struct DeliveryPolicy<T> {
    transport: Arc<T>,
    read_attempts: u32,
    backoff_step: Duration,
    status_policy: StatusPolicy,
}

impl<T: Transport> DeliveryPolicy<T> {
    pub fn new(transport: Arc<T>, config: &AgentConfig) -> Self {
        Self {
            transport,
            read_attempts: config.read_attempts.max(1),
            backoff_step: config.read_backoff_step,
            status_policy: config.status_policy,
        }
    }

    /// 按事件类型推送
    pub async fn handle(&self, event: &FileEvent) -> Result<DeliveryOutcome> {
        match event.kind {
            EventKind::Write => self.send_write(&event.path).await,
            EventKind::Remove => self.send_remove(&event.path).await,
        }
    }

    /// 读文件并 POST
    pub async fn send_write(&self, path: &Path) -> Result<DeliveryOutcome> {
        let content = self.read_with_retry(path).await?;
        let outcome = self
            .transport
            .deliver(DeliveryRequest::write(path, content))
            .await?;
        self.check_status(path, outcome)
    }

    /// DELETE（内容为空）
    pub async fn send_remove(&self, path: &Path) -> Result<DeliveryOutcome> {
        let outcome = self.transport.deliver(DeliveryRequest::remove(path)).await?;
        self.check_status(path, outcome)
    }

    /// 读取非空内容，失败或为空时退避重试
    pub async fn read_with_retry(&self, path: &Path) -> Result<Vec<u8>> {
        for attempt in 1..=self.read_attempts {
            match tokio::fs::read(path).await {
                Ok(data) if !data.is_empty() => {
                    tracing::debug!(
                        "📖 Read {:?}: {} bytes (attempt {})",
                        path,
                        data.len(),
                        attempt
                    );
                    return Ok(data);
                }
                Ok(_) => {
                    tracing::debug!(
                        "File {:?} is empty, retrying (attempt {}/{})",
                        path,
                        attempt,
                        self.read_attempts
                    );
                }
                Err(e) => {
                    tracing::debug!(
                        "Failed to read {:?}: {} (attempt {}/{})",
                        path,
                        e,
                        attempt,
                        self.read_attempts
                    );
                }
            }

            if attempt < self.read_attempts {
                sleep(backoff_delay(self.backoff_step, attempt)).await;
            }
        }

        Err(Error::ReadExhausted {
            path: path.to_path_buf(),
            attempts: self.read_attempts,
        })
    }

    fn check_status(&self, path: &Path, outcome: DeliveryOutcome) -> Result<DeliveryOutcome> {
        if outcome.is_success() {
            return Ok(outcome);
        }

        match self.status_policy {
            StatusPolicy::AcceptAll => {
                tracing::warn!("⚠️ Receiver answered {} for {:?}", outcome.status, path);
                Ok(outcome)
            }
            StatusPolicy::RequireSuccess => Err(Error::HttpStatus {
                path: path.to_path_buf(),
                status: outcome.status,
            }),
        }
    }
}

/// 第 `attempt` 次失败后的等待时长（线性）
pub fn backoff_delay(step: Duration, attempt: u32) -> Duration {
    step * attempt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::RecordingTransport;
    use crate::types::Method;
    use tempfile::tempdir;

    fn fast_config() -> AgentConfig {
        AgentConfig {
            read_backoff_step: Duration::from_millis(10),
            ..AgentConfig::default()
        }
    }

    #[test]
    fn test_backoff_is_linear_and_increasing() {
        let step = Duration::from_millis(500);
        let delays: Vec<_> = (1..=5).map(|n| backoff_delay(step, n)).collect();
        assert_eq!(delays[0], Duration::from_millis(500));
        assert_eq!(delays[4], Duration::from_millis(2500));
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_write_reads_and_posts_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello").unwrap();

        let transport = RecordingTransport::new();
        let policy = DeliveryPolicy::new(transport.clone(), &fast_config());

        let outcome = policy.send_write(&path).await.unwrap();
        assert_eq!(outcome.status, 200);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, Method::Post);
        assert_eq!(sent[0].content, b"hello");
    }

    #[tokio::test]
    async fn test_missing_file_exhausts_without_sending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ghost.txt");

        let transport = RecordingTransport::new();
        let policy = DeliveryPolicy::new(transport.clone(), &fast_config());

        match policy.send_write(&path).await {
            Err(Error::ReadExhausted { attempts, .. }) => assert_eq!(attempts, 5),
            other => panic!("expected ReadExhausted, got {:?}", other),
        }
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_empty_file_retried_until_filled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("growing.txt");
        std::fs::write(&path, "").unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            sleep(Duration::from_millis(15)).await;
            tokio::fs::write(&writer_path, "done").await.unwrap();
        });

        let transport = RecordingTransport::new();
        let policy = DeliveryPolicy::new(transport.clone(), &fast_config());

        policy.send_write(&path).await.unwrap();
        writer.await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, b"done");
    }

    // 虚拟时钟下 sleep 可能向上取整到下一毫秒，留出余量
    fn assert_elapsed_near(elapsed: Duration, expected_ms: u64) {
        let expected = Duration::from_millis(expected_ms);
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(50),
            "elapsed {:?}, expected about {:?}",
            elapsed,
            expected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_schedule_with_default_backoff() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("never.txt");

        let transport = RecordingTransport::new();
        let policy = DeliveryPolicy::new(transport.clone(), &AgentConfig::default());

        // 500 + 1000 + 1500 + 2000，最后一次失败后不再等待
        let started = tokio::time::Instant::now();
        let result = policy.send_write(&path).await;
        assert_elapsed_near(started.elapsed(), 5000);

        assert!(matches!(
            result,
            Err(Error::ReadExhausted { attempts: 5, .. })
        ));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fourth_read_picks_up_late_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("late.txt");
        std::fs::write(&path, "").unwrap();

        // 第 3 次读（t=1500ms）之后、第 4 次读（t=3000ms）之前写入
        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            sleep(Duration::from_millis(2900)).await;
            std::fs::write(&writer_path, "late").unwrap();
        });

        let transport = RecordingTransport::new();
        let policy = DeliveryPolicy::new(transport.clone(), &AgentConfig::default());

        let started = tokio::time::Instant::now();
        policy.send_write(&path).await.unwrap();
        assert_elapsed_near(started.elapsed(), 3000);
        writer.await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, b"late");
    }

    #[tokio::test]
    async fn test_remove_sends_delete_without_reading() {
        let transport = RecordingTransport::new();
        let policy = DeliveryPolicy::new(transport.clone(), &fast_config());

        policy
            .handle(&FileEvent::new("/nowhere/a.txt", EventKind::Remove))
            .await
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent, vec![DeliveryRequest::remove("/nowhere/a.txt")]);
    }

    #[tokio::test]
    async fn test_status_policy() {
        let transport = RecordingTransport::with_status(500);

        let lenient = DeliveryPolicy::new(transport.clone(), &fast_config());
        assert_eq!(lenient.send_remove(Path::new("/x")).await.unwrap().status, 500);

        let strict_config = AgentConfig {
            status_policy: StatusPolicy::RequireSuccess,
            ..fast_config()
        };
        let strict = DeliveryPolicy::new(transport, &strict_config);
        assert!(matches!(
            strict.send_remove(Path::new("/x")).await,
            Err(Error::HttpStatus { status: 500, .. })
        ));
    }
}
