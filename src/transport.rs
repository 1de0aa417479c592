//! 传输层
//!
//! 每次推送构建一个 gzip 压缩、带认证头的 HTTP 请求。连接池在所有推送任务间共享。

use std::future::Future;
use std::io::Write;
use std::time::Instant;

use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Client, Url};

use crate::config::{AgentConfig, WatchConfig};
use crate::error::{Error, Result};
use crate::types::{DeliveryOutcome, DeliveryRequest, Payload};

/// 推送一次请求
///
/// 任何 HTTP 状态码都返回 `Ok`，状态码的解释交给调用方。
pub trait Transport: Send + Sync + 'static {
    fn deliver(
        &self,
        request: DeliveryRequest,
    ) -> impl Future<Output = Result<DeliveryOutcome>> + Send;
}

/// 基于 reqwest 的 HTTP 传输
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    url: Url,
    key: String,
}

impl HttpTransport {
    /// 创建传输（连接池参数与请求超时来自 [`AgentConfig`]）
    pub fn new(watch: &WatchConfig, agent: &AgentConfig) -> Result<Self> {
        let url = Url::parse(&watch.url)
            .map_err(|e| Error::Config(format!("invalid Url {:?}: {}", watch.url, e)))?;

        // 覆盖建连、发送、读取响应体的总时长
        let client = Client::builder()
            .timeout(agent.request_timeout)
            .pool_idle_timeout(agent.pool_idle_timeout)
            .pool_max_idle_per_host(agent.pool_max_idle_per_host)
            .build()?;

        Ok(Self {
            client,
            url,
            key: watch.key.clone(),
        })
    }
}

impl Transport for HttpTransport {
    async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryOutcome> {
        let start = Instant::now();
        tracing::info!(
            "📤 Sending {} {:?} ({} bytes)",
            request.method,
            request.path,
            request.content.len()
        );

        let body = encode_body(&request.payload())?;

        let response = self
            .client
            .request(request.method.into(), self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .header(AUTHORIZATION, self.key.as_str())
            .body(body)
            .send()
            .await?;

        let status = response.status();
        // 读完响应体，连接才能回到池里
        let bytes = response.bytes().await?;

        let outcome = DeliveryOutcome {
            status: status.as_u16(),
            elapsed: start.elapsed(),
            response_size: bytes.len(),
        };

        tracing::info!(
            "📬 {} {:?} → {} in {}ms ({} bytes response)",
            request.method,
            request.path,
            status,
            outcome.elapsed.as_millis(),
            outcome.response_size
        );

        Ok(outcome)
    }
}

/// JSON 序列化后 gzip 压缩
pub fn encode_body(payload: &Payload) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(payload)?;

    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2 + 32), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| Error::Encode(e.to_string()))?;
    encoder.finish().map_err(|e| Error::Encode(e.to_string()))
}

#[cfg(test)]
pub(crate) mod testing {
    //! 单元测试用的记录型传输

    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    /// 记录所有请求，返回固定状态码
    pub struct RecordingTransport {
        pub requests: Mutex<Vec<DeliveryRequest>>,
        pub status: u16,
        /// 模拟卡死的请求
        pub hang: bool,
    }

    impl RecordingTransport {
        pub fn new() -> Arc<Self> {
            Self::with_status(200)
        }

        pub fn with_status(status: u16) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                status,
                hang: false,
            })
        }

        pub fn hanging() -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                status: 200,
                hang: true,
            })
        }

        pub fn sent(&self) -> Vec<DeliveryRequest> {
            self.requests.lock().clone()
        }
    }

    impl Transport for RecordingTransport {
        async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryOutcome> {
            self.requests.lock().push(request);
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(DeliveryOutcome {
                status: self.status,
                elapsed: Duration::ZERO,
                response_size: 0,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;

    use super::*;

    fn decode(body: &[u8]) -> Payload {
        let mut json = String::new();
        GzDecoder::new(body).read_to_string(&mut json).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_encode_body_round_trip() {
        let request = DeliveryRequest::write("/data/a.txt", b"hello".to_vec());
        let body = encode_body(&request.payload()).unwrap();

        // gzip 魔数
        assert_eq!(&body[..2], &[0x1f, 0x8b]);
        assert_eq!(
            decode(&body),
            Payload {
                path: "/data/a.txt".into(),
                content: "hello".into(),
            }
        );
    }

    #[test]
    fn test_encode_delete_body() {
        let request = DeliveryRequest::remove("/data/a.txt");
        let body = encode_body(&request.payload()).unwrap();
        assert_eq!(decode(&body).content, "");
    }

    #[test]
    fn test_rejects_invalid_url() {
        let watch = WatchConfig {
            url: "not a url".into(),
            paths: vec![],
            key: "k".into(),
        };
        assert!(matches!(
            HttpTransport::new(&watch, &AgentConfig::default()),
            Err(Error::Config(_))
        ));
    }
}
