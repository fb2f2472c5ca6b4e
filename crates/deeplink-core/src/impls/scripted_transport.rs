//! ScriptedTransport - テスト用・デモ用の HttpTransport
//!
//! リクエスト種別ごとに応答（status + body、または TransportError）を
//! 積んでおき、呼ばれた順に返します。積まれていなければ `200 {}` を返します。
//!
//! 呼び出しはすべて記録され、同時実行数の最大値も数えるので
//! 「同時に 1 本しか飛ばない」ことをテストで確認できます。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::domain::{HttpMethod, RequestKind};
use crate::ports::{HttpResponse, HttpTransport, TransportError};

/// One scripted reaction to a call.
#[derive(Debug, Clone, PartialEq)]
pub enum Scripted {
    Reply(HttpResponse),
    Fail(TransportError),
}

impl Scripted {
    pub fn ok(body: Value) -> Self {
        Scripted::status(200, body)
    }

    pub fn status(status: u16, body: Value) -> Self {
        Scripted::Reply(HttpResponse::new(status, body.to_string()))
    }

    pub fn fail(error: TransportError) -> Self {
        Scripted::Fail(error)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub kind: Option<RequestKind>,
    pub method: HttpMethod,
    pub url: Url,
    pub body: Option<Value>,
}

impl RecordedCall {
    /// Looks a field up in the POST body, or in the query string for GETs.
    pub fn field(&self, key: &str) -> Option<Value> {
        match &self.body {
            Some(body) => body.get(key).cloned(),
            None => self
                .url
                .query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| Value::String(v.into_owned())),
        }
    }
}

#[derive(Default)]
struct Script {
    replies: HashMap<RequestKind, VecDeque<Scripted>>,
    calls: Vec<RecordedCall>,
}

#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
    latency: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, kind: RequestKind, reply: Scripted) {
        self.lock().replies.entry(kind).or_default().push_back(reply);
    }

    pub fn push_times(&self, kind: RequestKind, times: usize, reply: Scripted) {
        let mut script = self.lock();
        let replies = script.replies.entry(kind).or_default();
        for _ in 0..times {
            replies.push_back(reply.clone());
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, kind: RequestKind) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.kind == Some(kind))
            .cloned()
            .collect()
    }

    /// Highest number of calls that were in progress at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn answer(
        &self,
        method: HttpMethod,
        url: &Url,
        body: Option<&Value>,
    ) -> Result<HttpResponse, TransportError> {
        let kind = kind_for(url);
        let reply = {
            let mut script = self.lock();
            script.calls.push(RecordedCall {
                kind,
                method,
                url: url.clone(),
                body: body.cloned(),
            });
            match kind {
                Some(k) => script.replies.get_mut(&k).and_then(VecDeque::pop_front),
                None => None,
            }
        };

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        match reply {
            Some(Scripted::Reply(response)) => Ok(response),
            Some(Scripted::Fail(error)) => Err(error),
            None => Ok(HttpResponse::new(200, "{}")),
        }
    }
}

/// Maps a URL back to the request kind whose path it was built from.
fn kind_for(url: &Url) -> Option<RequestKind> {
    let path = url.path();
    RequestKind::ALL.into_iter().find(|kind| {
        let Some(kind_path) = kind.path() else {
            return false;
        };
        match kind_path.strip_suffix('/') {
            Some(prefix) => path
                .rsplit_once('/')
                .is_some_and(|(head, _)| head.ends_with(prefix)),
            None => path.ends_with(kind_path),
        }
    })
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get(&self, url: &Url, _timeout: Duration) -> Result<HttpResponse, TransportError> {
        self.answer(HttpMethod::Get, url, None).await
    }

    async fn post(
        &self,
        url: &Url,
        body: &Value,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.answer(HttpMethod::Post, url, Some(body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::install("https://api.example.com/v1/install", Some(RequestKind::RegisterInstall))]
    #[case::get_code("https://api.example.com/v1/referralcode", Some(RequestKind::GetReferralCode))]
    #[case::validate("https://api.example.com/v1/referralcode/ABC", Some(RequestKind::ValidateReferralCode))]
    #[case::credits("https://api.example.com/v1/credits/U1", Some(RequestKind::GetRewards))]
    #[case::nested_base("https://api.example.com/api/v1/open", Some(RequestKind::RegisterOpen))]
    #[case::unknown("https://api.example.com/v2/other", None)]
    fn urls_map_back_to_kinds(#[case] raw: &str, #[case] expected: Option<RequestKind>) {
        assert_eq!(kind_for(&Url::parse(raw).unwrap()), expected);
    }

    #[tokio::test]
    async fn scripted_replies_then_default() {
        let transport = ScriptedTransport::new();
        transport.push(RequestKind::RegisterOpen, Scripted::status(500, json!({})));
        let url = Url::parse("https://api.example.com/v1/open").unwrap();

        let first = transport.post(&url, &json!({"a": 1}), Duration::from_secs(1)).await.unwrap();
        let second = transport.post(&url, &json!({"a": 2}), Duration::from_secs(1)).await.unwrap();

        assert_eq!(first.status, 500);
        assert_eq!(second.status, 200);
        assert_eq!(transport.calls_for(RequestKind::RegisterOpen).len(), 2);
        assert_eq!(transport.calls()[1].field("a"), Some(json!(2)));
        assert_eq!(transport.max_concurrent(), 1);
    }
}
