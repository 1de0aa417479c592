//! 配置
//!
//! - [`WatchConfig`]：接收端地址、监听路径、认证 key，从 JSON 文件加载，加载后不可变
//! - [`AgentConfig`]：管线参数（防抖窗口、超时、重试等），默认值即线上行为

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// 监听配置
///
/// JSON 格式：`{"Url": "...", "Paths": ["..."], "Key": "..."}`，也接受小写 key。
#[derive(Clone, Deserialize)]
pub struct WatchConfig {
    /// 接收端 URL，所有请求相同
    #[serde(rename = "Url", alias = "url")]
    pub url: String,
    /// 监听根路径（目录或普通文件）
    #[serde(rename = "Paths", alias = "paths", default)]
    pub paths: Vec<PathBuf>,
    /// 原样写入 Authorization 头
    #[serde(rename = "Key", alias = "key")]
    pub key: String,
}

impl fmt::Debug for WatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchConfig")
            .field("url", &self.url)
            .field("paths", &self.paths)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl WatchConfig {
    /// 从 JSON 文件加载并校验
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&data)
    }

    /// 解析 JSON，展开 `~` / 环境变量，丢弃不存在的路径
    pub fn from_json(data: &str) -> Result<Self> {
        let raw: WatchConfig = serde_json::from_str(data)
            .map_err(|e| Error::Config(format!("invalid config json: {}", e)))?;
        raw.resolve()
    }

    fn resolve(mut self) -> Result<Self> {
        if self.url.trim().is_empty() {
            return Err(Error::Config("Url must not be empty".into()));
        }
        let url = reqwest::Url::parse(&self.url)
            .map_err(|e| Error::Config(format!("invalid Url {:?}: {}", self.url, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::Config(format!(
                "unsupported Url scheme {:?}",
                url.scheme()
            )));
        }

        let mut resolved = Vec::with_capacity(self.paths.len());
        for raw in &self.paths {
            let raw = raw.to_string_lossy();
            let expanded = shellexpand::full(&raw)
                .map_err(|e| Error::Config(format!("cannot expand path {:?}: {}", raw, e)))?;
            let path = PathBuf::from(expanded.as_ref());

            if !path.exists() {
                tracing::warn!("⚠️ Skipping missing watch path: {:?}", path);
                continue;
            }
            resolved.push(path);
        }

        if resolved.is_empty() {
            return Err(Error::Config("no existing watch paths configured".into()));
        }

        self.paths = resolved;
        Ok(self)
    }
}

/// 非 2xx 响应的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusPolicy {
    /// 任何状态码都算完成（只记录日志）
    #[default]
    AcceptAll,
    /// 非 2xx 视为单事件失败
    RequireSuccess,
}

/// Agent 运行参数
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// 同一路径两次写事件的最小间隔
    pub debounce_window: Duration,
    /// 接受写事件后、读文件前的等待
    pub settle_delay: Duration,
    /// 单事件处理上限
    pub event_timeout: Duration,
    /// 读文件最大尝试次数
    pub read_attempts: u32,
    /// 线性退避步长（第 n 次失败后等待 n * step）
    pub read_backoff_step: Duration,
    /// 单次 HTTP 请求的总超时
    pub request_timeout: Duration,
    /// 空闲连接保留时间
    pub pool_idle_timeout: Duration,
    /// 每个 host 保留的空闲连接上限
    pub pool_max_idle_per_host: usize,
    pub status_policy: StatusPolicy,
    /// 启动时推送所有已存在的文件
    pub initial_sync: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(2500),
            settle_delay: Duration::from_millis(100),
            event_timeout: Duration::from_secs(30),
            read_attempts: 5,
            read_backoff_step: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
            pool_idle_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 10,
            status_policy: StatusPolicy::AcceptAll,
            initial_sync: false,
        }
    }
}
