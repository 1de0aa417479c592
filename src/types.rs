//! 核心类型定义

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

/// 逻辑事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// 创建 / 写入 / 权限变化
    Write,
    /// 删除（rename 的旧路径也算）
    Remove,
}

impl EventKind {
    /// 对应的 HTTP 方法
    pub fn method(self) -> Method {
        match self {
            EventKind::Write => Method::Post,
            EventKind::Remove => Method::Delete,
        }
    }
}

/// 文件事件，由 Dispatcher 消费一次
#[derive(Debug, Clone)]
pub struct FileEvent {
    /// 日志关联用
    pub id: Uuid,
    pub path: PathBuf,
    pub kind: EventKind,
    /// 被 Dispatcher 接受的时刻，日志中报告总耗时
    pub observed_at: Instant,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>, kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            kind,
            observed_at: Instant::now(),
        }
    }
}

/// 推送使用的 HTTP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Post,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// 单次推送请求，每次尝试重新构建
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    pub path: PathBuf,
    /// 删除时为空
    pub content: Vec<u8>,
    pub method: Method,
}

impl DeliveryRequest {
    pub fn write(path: impl Into<PathBuf>, content: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            content,
            method: Method::Post,
        }
    }

    pub fn remove(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            content: Vec::new(),
            method: Method::Delete,
        }
    }

    /// 转换为线上 JSON 结构
    pub fn payload(&self) -> Payload {
        Payload::new(&self.path, &self.content)
    }
}

/// 请求体：`{"path": ..., "content": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub path: String,
    pub content: String,
}

impl Payload {
    /// 非 UTF-8 内容按 lossy 方式转换（接收端只接受字符串）
    pub fn new(path: &Path, content: &[u8]) -> Self {
        Self {
            path: path.to_string_lossy().into_owned(),
            content: String::from_utf8_lossy(content).into_owned(),
        }
    }
}

/// 一次推送的结果（仅用于日志 / 错误传播）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub status: u16,
    pub elapsed: Duration,
    pub response_size: usize,
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
