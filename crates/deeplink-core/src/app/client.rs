//! DeepLink - ホストアプリ向けの公開 API
//!
//! 各アクションはその場でリクエストをキューに積み、結果を返す Future を返します。
//! Future を drop しても送信は行われます（fire-and-forget）。
//! 呼び出し前に検出できるエラー（空の identity、残高ゼロの redeem など）は
//! キューに積まず、そのまま Future の結果になります。

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::info;

use crate::config::ConfigError;
use crate::domain::{
    CreditHistoryQuery, InitOptions, LinkProperties, NetworkState, ReferralCodeOptions, Request,
    RequestKind, SdkError, SessionPhase, SessionState, keys,
};

use super::dispatcher::Reply;
use super::orchestrator::{PendingReply, SessionOrchestrator};
use super::worker_loop::DispatchWorker;

const DEFAULT_BUCKET: &str = "default";

pub struct DeepLink {
    orchestrator: Arc<SessionOrchestrator>,
    worker: Mutex<Option<DispatchWorker>>,
}

fn settle<T>(
    pending: PendingReply,
    extract: fn(Reply) -> Result<T, SdkError>,
) -> impl Future<Output = Result<T, SdkError>> + Send + 'static
where
    T: Send + 'static,
{
    async move { extract(pending.await?) }
}

fn payload_of(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Map<String, Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

impl DeepLink {
    pub(crate) fn new(orchestrator: Arc<SessionOrchestrator>, worker: DispatchWorker) -> Self {
        Self {
            orchestrator,
            worker: Mutex::new(Some(worker)),
        }
    }

    // ---- session ----

    /// Starts (or joins) a session. Resolves with the latest referring params.
    pub fn init_session(&self) -> impl Future<Output = Result<Value, SdkError>> + Send + use<> {
        self.init_session_with(InitOptions::default())
    }

    pub fn init_session_with(
        &self,
        options: InitOptions,
    ) -> impl Future<Output = Result<Value, SdkError>> + Send + use<> {
        settle(self.orchestrator.init_session(options), Reply::into_params)
    }

    pub fn close_session(&self) {
        self.orchestrator.close_session();
    }

    /// Host foreground signal.
    pub fn on_session_should_start(&self) -> impl Future<Output = Result<Value, SdkError>> + Send + use<> {
        self.init_session()
    }

    /// Host background signal.
    pub fn on_session_should_end(&self) {
        self.close_session();
    }

    /// Resumes dispatch after a no-network pause. Resolves once the dispatch
    /// loop has caught up to this call.
    pub fn on_connectivity_restored(&self) -> impl Future<Output = Result<(), SdkError>> + Send + use<> {
        settle(self.orchestrator.on_connectivity_restored(), Reply::into_done)
    }

    // ---- identity ----

    /// Identifies the current user. Resolves with the first-referring params.
    pub fn set_identity(&self, identity: &str) -> impl Future<Output = Result<Value, SdkError>> + Send + use<> {
        let session = self.orchestrator.session();
        let pending = if identity.is_empty() {
            PendingReply::ready(Err(SdkError::Construct("identity must not be empty".into())))
        } else if session.identity().as_deref() == Some(identity) {
            PendingReply::ready(Ok(Reply::ReferringParams(session.install_params())))
        } else {
            let payload = payload_of([(keys::IDENTITY, identity.into())]);
            self.orchestrator.submit(RequestKind::IdentifyUser, payload)
        };
        settle(pending, Reply::into_params)
    }

    pub fn logout(&self) -> impl Future<Output = Result<(), SdkError>> + Send + use<> {
        settle(self.orchestrator.submit(RequestKind::Logout, Map::new()), Reply::into_done)
    }

    // ---- credits and counts ----

    /// Refreshes per-action referral counts. Resolves with whether anything changed.
    pub fn load_action_counts(&self) -> impl Future<Output = Result<bool, SdkError>> + Send + use<> {
        settle(
            self.orchestrator.submit(RequestKind::GetReferralCounts, Map::new()),
            Reply::into_changed,
        )
    }

    /// Refreshes credit balances. Resolves with whether anything changed.
    pub fn load_rewards(&self) -> impl Future<Output = Result<bool, SdkError>> + Send + use<> {
        settle(self.orchestrator.submit(RequestKind::GetRewards, Map::new()), Reply::into_changed)
    }

    pub fn redeem_rewards(&self, amount: i64) -> impl Future<Output = Result<bool, SdkError>> + Send + use<> {
        self.redeem_rewards_from(DEFAULT_BUCKET, amount)
    }

    /// Redeems up to `amount` credits from `bucket`, clamped to the locally
    /// known balance.
    pub fn redeem_rewards_from(
        &self,
        bucket: &str,
        amount: i64,
    ) -> impl Future<Output = Result<bool, SdkError>> + Send + use<> {
        let available = self.orchestrator.session().credits(bucket);
        let redeemable = amount.min(available);
        let pending = if redeemable <= 0 {
            PendingReply::ready(Err(SdkError::RedeemRewards(format!(
                "no credits to redeem in bucket {bucket:?} (requested {amount}, available {available})"
            ))))
        } else {
            if redeemable < amount {
                info!(bucket, amount, available, "redeem clamped to available credits");
            }
            let payload = payload_of([(keys::BUCKET, bucket.into()), (keys::AMOUNT, redeemable.into())]);
            self.orchestrator.submit(RequestKind::RedeemRewards, payload)
        };
        settle(pending, Reply::into_changed)
    }

    pub fn credit_history(
        &self,
        query: &CreditHistoryQuery,
    ) -> impl Future<Output = Result<Vec<Value>, SdkError>> + Send + use<> {
        settle(
            self.orchestrator.submit(RequestKind::GetRewardHistory, query.to_payload()),
            Reply::into_list,
        )
    }

    pub fn credits(&self) -> i64 {
        self.credits_for_bucket(DEFAULT_BUCKET)
    }

    pub fn credits_for_bucket(&self, bucket: &str) -> i64 {
        self.orchestrator.session().credits(bucket)
    }

    pub fn total_count_for_action(&self, action: &str) -> i64 {
        self.orchestrator.session().action_count(action).total
    }

    pub fn unique_count_for_action(&self, action: &str) -> i64 {
        self.orchestrator.session().action_count(action).unique
    }

    // ---- events ----

    /// Logs a custom event.
    pub fn user_completed_action(
        &self,
        action: &str,
        metadata: Option<Map<String, Value>>,
    ) -> impl Future<Output = Result<(), SdkError>> + Send + use<> {
        let mut payload = payload_of([(keys::EVENT, action.into())]);
        if let Some(metadata) = metadata {
            payload.insert(keys::METADATA.into(), Value::Object(escape_metadata(metadata)));
        }
        settle(self.orchestrator.submit(RequestKind::CompleteAction, payload), Reply::into_done)
    }

    // ---- links ----

    /// Creates a short link. Resolves with `None` when the backend reports
    /// the link already exists. Identical properties hit the local cache.
    pub fn create_short_link(
        &self,
        properties: &LinkProperties,
    ) -> impl Future<Output = Result<Option<String>, SdkError>> + Send + use<> {
        let pending = match serde_json::to_value(properties) {
            Ok(Value::Object(payload)) => match self.orchestrator.dispatcher().cached_link(&payload) {
                Some(url) => PendingReply::ready(Ok(Reply::Url(Some(url)))),
                None => self.orchestrator.submit(RequestKind::CreateLink, payload),
            },
            Ok(_) => PendingReply::ready(Err(SdkError::Construct("link properties are not an object".into()))),
            Err(e) => PendingReply::ready(Err(SdkError::Construct(e.to_string()))),
        };
        settle(pending, Reply::into_url)
    }

    // ---- referral codes ----

    pub fn get_referral_code(
        &self,
        options: &ReferralCodeOptions,
    ) -> impl Future<Output = Result<Value, SdkError>> + Send + use<> {
        settle(
            self.orchestrator.submit(RequestKind::GetReferralCode, options.to_payload()),
            Reply::into_json,
        )
    }

    pub fn validate_referral_code(&self, code: &str) -> impl Future<Output = Result<Value, SdkError>> + Send + use<> {
        self.referral_code_request(RequestKind::ValidateReferralCode, code)
    }

    pub fn apply_referral_code(&self, code: &str) -> impl Future<Output = Result<Value, SdkError>> + Send + use<> {
        self.referral_code_request(RequestKind::ApplyReferralCode, code)
    }

    fn referral_code_request(
        &self,
        kind: RequestKind,
        code: &str,
    ) -> impl Future<Output = Result<Value, SdkError>> + Send + use<> {
        let pending = if code.is_empty() {
            PendingReply::ready(Err(SdkError::Construct("referral code must not be empty".into())))
        } else {
            self.orchestrator
                .submit(kind, payload_of([(keys::REFERRAL_CODE, code.into())]))
        };
        settle(pending, Reply::into_json)
    }

    // ---- state ----

    pub fn session_state(&self) -> SessionState {
        self.orchestrator.session().snapshot()
    }

    pub fn session_phase(&self) -> SessionPhase {
        self.orchestrator.phase()
    }

    pub fn network_state(&self) -> NetworkState {
        self.orchestrator.network_state()
    }

    /// Kinds of the queued requests, head first.
    pub fn pending_requests(&self) -> Vec<RequestKind> {
        self.orchestrator.queue().kinds()
    }

    pub fn pending_snapshot(&self) -> Vec<Request> {
        self.orchestrator.queue().snapshot()
    }

    pub fn first_referring_params(&self) -> Value {
        self.orchestrator.session().install_params()
    }

    pub fn latest_referring_params(&self) -> Value {
        self.orchestrator.session().session_params()
    }

    // ---- runtime overrides ----

    pub fn set_retry_count(&self, count: u32) -> Result<(), SdkError> {
        if count == 0 {
            return Err(ConfigError::NonPositive { field: "retry_count" }.into());
        }
        Ok(self.orchestrator.session().set_retry_count(count)?)
    }

    pub fn set_retry_interval(&self, interval: Duration) -> Result<(), SdkError> {
        if interval.is_zero() {
            return Err(ConfigError::NonPositive { field: "retry_interval" }.into());
        }
        Ok(self.orchestrator.session().set_retry_interval(interval)?)
    }

    pub fn set_network_timeout(&self, timeout: Duration) -> Result<(), SdkError> {
        if timeout.is_zero() {
            return Err(ConfigError::NonPositive { field: "timeout" }.into());
        }
        Ok(self.orchestrator.session().set_timeout(timeout)?)
    }

    /// Stops the dispatch worker and writes the queue out. Queued requests
    /// are replayed by the next `build()` over the same storage.
    pub async fn shutdown(&self) -> Result<(), SdkError> {
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            worker.shutdown_and_join().await;
        }
        self.orchestrator.queue().flush()?;
        info!(pending = self.orchestrator.queue().len(), "deeplink client shut down");
        Ok(())
    }
}

impl Drop for DeepLink {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().unwrap_or_else(PoisonError::into_inner).as_ref() {
            worker.request_shutdown();
        }
    }
}

/// Escapes newlines, carriage returns and quotes in string values.
fn escape_metadata(metadata: Map<String, Value>) -> Map<String, Value> {
    metadata
        .into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => {
                let escaped = s.replace('\n', "\\n").replace('\r', "\\r").replace('"', "\\\"");
                (k, Value::String(escaped))
            }
            other => (k, other),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_strings_are_escaped() {
        let Value::Object(raw) = json!({ "note": "a\nb\r\"c\"", "n": 3 }) else {
            unreachable!()
        };
        let escaped = escape_metadata(raw);
        assert_eq!(escaped["note"], json!("a\\nb\\r\\\"c\\\""));
        assert_eq!(escaped["n"], json!(3));
    }

    #[test]
    fn payload_of_builds_map() {
        let payload = payload_of([(keys::BUCKET, json!("default")), (keys::AMOUNT, json!(5))]);
        assert_eq!(Value::Object(payload), json!({ "bucket": "default", "amount": 5 }));
    }
}
