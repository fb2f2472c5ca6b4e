//! HttpTransport port - 低レベル HTTP の抽象化
//!
//! ソケットや TLS はホスト側の責務。コアは「GET/POST して status + body か、
//! 型付きの失敗を受け取る」ことだけを要求します。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("no connectivity")]
    NoConnectivity,

    #[error("transport failure: {0}")]
    Io(String),
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &Url, timeout: Duration) -> Result<HttpResponse, TransportError>;

    async fn post(
        &self,
        url: &Url,
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
}
