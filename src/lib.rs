//! watch-transmitter - 目录监听推送 Agent
//!
//! 监听配置的文件/目录，把创建、修改、删除推送到远端接收端。
//!
//! # 核心流程
//!
//! - **Registrar**: 启动时递归注册所有目录（按 inode 去重）
//! - **Dispatcher**: 单消费者处理监听事件，分类 + 防抖，每个事件独立任务
//! - **DeliveryPolicy**: 读文件重试（线性退避），POST / DELETE
//! - **Transport**: JSON → gzip → HTTP，带 Authorization 头，连接复用
//!
//! # 线上协议
//!
//! 请求体为 gzip 压缩的 `{"path": "...", "content": "..."}`，
//! 写入用 `POST`，删除用 `DELETE`（content 为空）。任何状态码都视为完成。

pub mod agent;
pub mod config;
pub mod debouncer;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod registrar;
pub mod transport;
pub mod types;

// Re-exports
pub use agent::{register_roots, shutdown_signal, spawn_signal_handler, Agent};
pub use config::{AgentConfig, StatusPolicy, WatchConfig};
pub use debouncer::Debouncer;
pub use delivery::DeliveryPolicy;
pub use dispatcher::{classify, run_bounded, Dispatcher, RawEvent};
pub use error::{Error, Result};
pub use registrar::{Registrar, WalkSummary, WatchTarget};
pub use transport::{encode_body, HttpTransport, Transport};
pub use types::*;

/// 完整版本号（语义版本 + 编译时间戳）
///
/// 格式：`{CARGO_PKG_VERSION}-{BUILD_TIMESTAMP}`
pub const VERSION_FULL: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("BUILD_TIMESTAMP"));
