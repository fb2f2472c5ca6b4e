//! Network executor: one request in, one classified outcome out.
//!
//! Design:
//! - Exactly one transport call per `execute`; retries belong to the
//!   orchestrator.
//! - No state is touched here. The response dispatcher applies results.
//! - Every call carries `branch_key`, `sdk` and `retryNumber`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::domain::{HttpMethod, NetworkOutcome, Request, RequestKind, SdkError, TransientReason, keys};
use crate::ports::{HttpTransport, TransportError};

pub struct NetworkExecutor {
    transport: Arc<dyn HttpTransport>,
    base_url: Url,
    branch_key: String,
    sdk_tag: String,
}

impl NetworkExecutor {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: Url,
        branch_key: impl Into<String>,
        sdk_tag: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            base_url,
            branch_key: branch_key.into(),
            sdk_tag: sdk_tag.into(),
        }
    }

    /// Sends `request` once.
    ///
    /// `Err` only when the request cannot be turned into a call at all
    /// (no endpoint, unusable URL); every transport result is an outcome.
    pub async fn execute(
        &self,
        request: &Request,
        retry_number: u32,
        timeout: Duration,
    ) -> Result<NetworkOutcome, SdkError> {
        let mut url = self.request_url(request)?;
        let params = self.with_common_params(request.payload(), retry_number);

        let result = match request.kind().method() {
            HttpMethod::Get => {
                {
                    let mut query = url.query_pairs_mut();
                    for (key, value) in &params {
                        match value {
                            Value::Null => {}
                            Value::String(s) => {
                                query.append_pair(key, s);
                            }
                            other => {
                                query.append_pair(key, &other.to_string());
                            }
                        }
                    }
                }
                self.transport.get(&url, timeout).await
            }
            HttpMethod::Post => {
                self.transport
                    .post(&url, &Value::Object(params), timeout)
                    .await
            }
        };

        let outcome = match result {
            Ok(response) => NetworkOutcome::from_status(response.status, &response.body),
            Err(TransportError::Timeout) => {
                NetworkOutcome::TransientFailure(TransientReason::Timeout)
            }
            Err(TransportError::NoConnectivity) => {
                NetworkOutcome::TransientFailure(TransientReason::NoConnectivity)
            }
            Err(TransportError::Io(message)) => {
                debug!(%message, "transport i/o failure treated as no connectivity");
                NetworkOutcome::TransientFailure(TransientReason::NoConnectivity)
            }
        };
        Ok(outcome)
    }

    /// Full URL for `request`, including the send-time suffix for kinds
    /// whose path ends in `/`.
    pub fn request_url(&self, request: &Request) -> Result<Url, SdkError> {
        let kind = request.kind();
        let path = kind
            .path()
            .ok_or_else(|| SdkError::Construct(format!("{kind} has no endpoint")))?;

        let Some(base_path) = path.strip_suffix('/') else {
            return self
                .base_url
                .join(path)
                .map_err(|e| SdkError::Construct(format!("bad url for {kind}: {e}")));
        };

        let suffix = match kind {
            RequestKind::GetReferralCounts | RequestKind::GetRewards => {
                request.str_field(keys::IDENTITY_ID).unwrap_or_default()
            }
            _ => request.str_field(keys::REFERRAL_CODE).unwrap_or_default(),
        };
        let mut url = self
            .base_url
            .join(base_path)
            .map_err(|e| SdkError::Construct(format!("bad url for {kind}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| SdkError::Construct(format!("base url cannot take a path for {kind}")))?
            .push(suffix);
        Ok(url)
    }

    fn with_common_params(&self, payload: &Map<String, Value>, retry_number: u32) -> Map<String, Value> {
        let mut params = payload.clone();
        params.insert(keys::BRANCH_KEY.into(), self.branch_key.clone().into());
        params.insert(keys::SDK.into(), self.sdk_tag.clone().into());
        params.insert(keys::RETRY_NUMBER.into(), retry_number.into());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{Scripted, ScriptedTransport};
    use crate::ports::{IdGenerator, SystemClock, UlidGenerator};
    use chrono::Utc;
    use rstest::rstest;
    use serde_json::json;

    fn executor(transport: Arc<ScriptedTransport>) -> NetworkExecutor {
        let base = Url::parse("https://api.example.com/").unwrap();
        NetworkExecutor::new(transport, base, "key_test_abc", "rust0.1.0")
    }

    fn request(kind: RequestKind, payload: Value) -> Request {
        let Value::Object(payload) = payload else {
            panic!("payload must be an object");
        };
        let ids = UlidGenerator::new(SystemClock);
        Request::new(ids.generate_request_id(), kind, payload, Utc::now())
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn post_carries_payload_and_common_params() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(RequestKind::CompleteAction, Scripted::ok(json!({ "ok": true })));
        let exec = executor(transport.clone());

        let outcome = exec
            .execute(&request(RequestKind::CompleteAction, json!({ "event": "buy" })), 2, TIMEOUT)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            NetworkOutcome::Success {
                status: 200,
                body: json!({ "ok": true })
            }
        );
        let call = &transport.calls()[0];
        assert_eq!(call.url.as_str(), "https://api.example.com/v1/event");
        assert_eq!(call.field("event"), Some(json!("buy")));
        assert_eq!(call.field("branch_key"), Some(json!("key_test_abc")));
        assert_eq!(call.field("sdk"), Some(json!("rust0.1.0")));
        assert_eq!(call.field("retryNumber"), Some(json!(2)));
    }

    #[tokio::test]
    async fn get_uses_identity_suffix_and_query() {
        let transport = Arc::new(ScriptedTransport::new());
        let exec = executor(transport.clone());

        exec.execute(
            &request(RequestKind::GetRewards, json!({ "identity_id": "U1", "session_id": null })),
            0,
            TIMEOUT,
        )
        .await
        .unwrap();

        let call = &transport.calls()[0];
        assert_eq!(call.method, HttpMethod::Get);
        assert_eq!(call.url.path(), "/v1/credits/U1");
        assert_eq!(call.field("branch_key"), Some(json!("key_test_abc")));
        assert_eq!(call.field("retryNumber"), Some(json!("0")));
        assert_eq!(call.field("session_id"), None);
    }

    #[test]
    fn referral_code_suffix_is_escaped() {
        let exec = executor(Arc::new(ScriptedTransport::new()));
        let url = exec
            .request_url(&request(RequestKind::ApplyReferralCode, json!({ "referral_code": "A B/C" })))
            .unwrap();
        assert_eq!(url.path(), "/v1/applycode/A%20B%2FC");
    }

    #[test]
    fn ping_has_no_url() {
        let exec = executor(Arc::new(ScriptedTransport::new()));
        assert!(matches!(
            exec.request_url(&request(RequestKind::Ping, json!({}))),
            Err(SdkError::Construct(_))
        ));
    }

    #[rstest]
    #[case::timeout(TransportError::Timeout, TransientReason::Timeout)]
    #[case::offline(TransportError::NoConnectivity, TransientReason::NoConnectivity)]
    #[case::io(TransportError::Io("reset".into()), TransientReason::NoConnectivity)]
    #[tokio::test]
    async fn transport_errors_are_transient(#[case] error: TransportError, #[case] reason: TransientReason) {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(RequestKind::RegisterClose, Scripted::fail(error));
        let exec = executor(transport);

        let outcome = exec
            .execute(&request(RequestKind::RegisterClose, json!({})), 0, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(outcome, NetworkOutcome::TransientFailure(reason));
    }

    #[tokio::test]
    async fn server_and_client_statuses() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(RequestKind::CreateLink, Scripted::status(409, json!({})));
        transport.push(RequestKind::CreateLink, Scripted::status(400, json!({ "error": "bad" })));
        transport.push(RequestKind::CreateLink, Scripted::status(500, json!({})));
        let exec = executor(transport);
        let req = request(RequestKind::CreateLink, json!({}));

        assert_eq!(
            exec.execute(&req, 0, TIMEOUT).await.unwrap(),
            NetworkOutcome::Conflict { status: 409 }
        );
        assert!(matches!(
            exec.execute(&req, 0, TIMEOUT).await.unwrap(),
            NetworkOutcome::ClientError { status: 400, .. }
        ));
        assert_eq!(
            exec.execute(&req, 0, TIMEOUT).await.unwrap(),
            NetworkOutcome::TransientFailure(TransientReason::ServerError { status: 500 })
        );
    }
}
