//! 写事件防抖
//!
//! 记录每个路径最近一次被接受的时间，窗口内的重复写事件直接丢弃。
//! 只由 Dispatcher 单线程访问，不加锁。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

/// 超过这个条目数时清理过期记录
const PRUNE_THRESHOLD: usize = 1024;

/// 按路径防抖
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_accepted: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: HashMap::new(),
        }
    }

    /// 是否接受该写事件；接受时立即记录时间
    pub fn should_accept(&mut self, path: &Path, now: Instant) -> bool {
        if let Some(last) = self.last_accepted.get(path) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }

        if self.last_accepted.len() >= PRUNE_THRESHOLD {
            self.prune(now);
        }
        self.last_accepted.insert(path.to_path_buf(), now);
        true
    }

    /// 删除后清掉记录，紧接着的重建不会被吞
    pub fn forget(&mut self, path: &Path) {
        self.last_accepted.remove(path);
    }

    /// 丢弃已经出窗口的记录
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.last_accepted
            .retain(|_, last| now.saturating_duration_since(*last) < window);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.last_accepted.len()
    }
}
