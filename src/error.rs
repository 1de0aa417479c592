//! 错误类型定义

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// 库错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 启动时目录注册失败（致命）
    #[error("failed to register watch on {path:?}: {source}")]
    WatchSetup {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// 无法创建文件系统监听器（致命）
    #[error("failed to start filesystem notifier: {0}")]
    NotifierInit(#[source] notify::Error),

    /// 文件多次读取失败或始终为空
    #[error("giving up on {path:?} after {attempts} read attempts")]
    ReadExhausted { path: PathBuf, attempts: u32 },

    /// 请求构建 / 网络 / 响应读取失败
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// 请求体压缩失败
    #[error("failed to encode request body: {0}")]
    Encode(String),

    /// 非 2xx 响应（仅在 RequireSuccess 策略下）
    #[error("receiver answered {status} for {path:?}")]
    HttpStatus { path: PathBuf, status: u16 },

    /// 单个事件超过处理上限
    #[error("processing {path:?} exceeded {timeout:?}")]
    EventTimeout { path: PathBuf, timeout: Duration },

    /// 监听器内部错误（非致命）
    #[error("notifier error: {0}")]
    NotifierInternal(#[source] notify::Error),

    /// 事件任务异常退出（panic / 被取消）
    #[error("event task for {path:?} failed: {reason}")]
    TaskFailed { path: PathBuf, reason: String },

    /// 配置错误
    #[error("config error: {0}")]
    Config(String),

    /// 序列化错误
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// 是否应终止整个进程
    ///
    /// 只有启动阶段（配置、目录注册）的错误是致命的，其余都按单事件失败处理。
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::WatchSetup { .. } | Error::NotifierInit(_) | Error::Config(_)
        )
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, Error>;
