//! ResponseDispatcher - 完了したレスポンスをリクエスト種別ごとに処理
//!
//! - SessionStore への反映（identity id, session id, params, credits ...）
//! - 呼び出し元へ返す [`Reply`] の組み立て
//! - 短縮リンクのキャッシュ
//!
//! キューやセッションフェーズには触りません。それらへの影響は
//! [`SessionEffect`] として返し、オーケストレーターが適用します。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::domain::params::link_cache_key;
use crate::domain::{ActionCount, Request, RequestKind, SdkError, keys};

use super::session_store::SessionStore;

/// Result payload delivered to the caller of an action.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Referring params (session init: latest; identify: first).
    ReferringParams(Value),
    /// Whether locally cached counters changed.
    StateChanged(bool),
    /// Short link; `None` when the backend reports the link already exists.
    Url(Option<String>),
    List(Vec<Value>),
    Json(Value),
    Done,
}

impl Reply {
    pub fn into_params(self) -> Result<Value, SdkError> {
        match self {
            Reply::ReferringParams(v) => Ok(v),
            _ => Err(SdkError::UnexpectedReply("referring params")),
        }
    }

    pub fn into_changed(self) -> Result<bool, SdkError> {
        match self {
            Reply::StateChanged(b) => Ok(b),
            _ => Err(SdkError::UnexpectedReply("state change")),
        }
    }

    pub fn into_url(self) -> Result<Option<String>, SdkError> {
        match self {
            Reply::Url(u) => Ok(u),
            _ => Err(SdkError::UnexpectedReply("url")),
        }
    }

    pub fn into_list(self) -> Result<Vec<Value>, SdkError> {
        match self {
            Reply::List(l) => Ok(l),
            _ => Err(SdkError::UnexpectedReply("list")),
        }
    }

    pub fn into_json(self) -> Result<Value, SdkError> {
        match self {
            Reply::Json(v) => Ok(v),
            _ => Err(SdkError::UnexpectedReply("json")),
        }
    }

    pub fn into_done(self) -> Result<(), SdkError> {
        match self {
            Reply::Done => Ok(()),
            _ => Err(SdkError::UnexpectedReply("completion")),
        }
    }
}

/// What a successful response did to the session, for the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEffect {
    None,
    /// Install/open succeeded.
    Established,
    /// Identity ids changed without a new session.
    IdsChanged,
    LoggedOut,
}

pub struct ResponseDispatcher {
    session: Arc<SessionStore>,
    links: Mutex<HashMap<String, String>>,
}

impl ResponseDispatcher {
    pub fn new(session: Arc<SessionStore>) -> Self {
        Self {
            session,
            links: Mutex::new(HashMap::new()),
        }
    }

    fn links(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cached_link(&self, payload: &Map<String, Value>) -> Option<String> {
        self.links().get(&link_cache_key(payload)).cloned()
    }

    pub fn clear_link_cache(&self) {
        self.links().clear();
    }

    /// Applies an HTTP 200 response.
    pub fn on_success(&self, request: &Request, body: &Value) -> Result<(Reply, SessionEffect), SdkError> {
        let done = |reply: Reply| -> Result<(Reply, SessionEffect), SdkError> {
            Ok((reply, SessionEffect::None))
        };
        match request.kind() {
            RequestKind::RegisterInstall | RequestKind::RegisterOpen => {
                self.apply_session_start(request, body)?;
                Ok((
                    Reply::ReferringParams(self.session.session_params()),
                    SessionEffect::Established,
                ))
            }
            RequestKind::IdentifyUser => {
                self.apply_identify(request, body)?;
                Ok((
                    Reply::ReferringParams(self.session.install_params()),
                    SessionEffect::IdsChanged,
                ))
            }
            RequestKind::Logout => {
                self.apply_logout(body)?;
                Ok((Reply::Done, SessionEffect::LoggedOut))
            }
            RequestKind::GetReferralCounts => done(Reply::StateChanged(self.apply_action_counts(body)?)),
            RequestKind::GetRewards => done(Reply::StateChanged(self.apply_credits(body)?)),
            RequestKind::RedeemRewards => {
                let bucket = request.str_field(keys::BUCKET).unwrap_or("default");
                let amount = request.payload().get(keys::AMOUNT).and_then(Value::as_i64).unwrap_or(0);
                let remaining = self.session.credits(bucket) - amount;
                self.session.set_credits(bucket, remaining)?;
                done(Reply::StateChanged(true))
            }
            RequestKind::GetRewardHistory => {
                let entries = body.as_array().cloned().unwrap_or_default();
                done(Reply::List(entries))
            }
            RequestKind::CreateLink => {
                let url = body.get(keys::URL).and_then(Value::as_str).map(str::to_string);
                if let Some(url) = &url {
                    self.links().insert(link_cache_key(request.payload()), url.clone());
                }
                done(Reply::Url(url))
            }
            RequestKind::GetReferralCode => done(Reply::Json(body.clone())),
            RequestKind::ValidateReferralCode | RequestKind::ApplyReferralCode => {
                if body.get(keys::REFERRAL_CODE).is_some() {
                    done(Reply::Json(body.clone()))
                } else {
                    Err(SdkError::InvalidReferralCode)
                }
            }
            RequestKind::RegisterClose | RequestKind::CompleteAction | RequestKind::Ping => done(Reply::Done),
        }
    }

    /// HTTP 409. Only link creation treats it as a result.
    pub fn on_conflict(&self, request: &Request, status: u16) -> Result<Reply, SdkError> {
        match request.kind() {
            RequestKind::CreateLink => {
                debug!(id = %request.id(), "link already exists, resolving without url");
                Ok(Reply::Url(None))
            }
            _ => Err(SdkError::Conflict { status }),
        }
    }

    fn apply_session_start(&self, request: &Request, body: &Value) -> Result<(), SdkError> {
        let s = &self.session;
        if let Some(session_id) = str_of(body, keys::SESSION_ID) {
            s.set_session_id(Some(session_id))?;
        }
        if let Some(fingerprint) = str_of(body, keys::DEVICE_FINGERPRINT_ID) {
            s.set_device_fingerprint_id(Some(fingerprint))?;
        }
        if let Some(identity_id) = str_of(body, keys::IDENTITY_ID) {
            s.set_identity_id(Some(identity_id))?;
        }
        if let Some(link) = str_of(body, keys::LINK) {
            s.set_user_url(Some(link))?;
        }
        s.set_link_click_identifier(None)?;
        s.set_link_click_id(str_of(body, keys::LINK_CLICK_ID))?;

        let data = referring_data(body.get(keys::DATA));
        let referrable = request
            .payload()
            .get(keys::IS_REFERRABLE)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if referrable {
            match request.kind() {
                RequestKind::RegisterInstall => s.set_install_params(data.as_ref())?,
                _ => {
                    if data.is_some() {
                        s.set_install_params(data.as_ref())?;
                    }
                }
            }
        }
        s.set_referrable(false)?;
        s.set_session_params(data.as_ref())?;

        info!(
            kind = %request.kind(),
            identity_id = ?s.identity_id(),
            session_id = ?s.session_id(),
            "session established"
        );
        Ok(())
    }

    fn apply_identify(&self, request: &Request, body: &Value) -> Result<(), SdkError> {
        let s = &self.session;
        let previous = s.identity_id();
        if let Some(identity) = request.str_field(keys::IDENTITY) {
            s.set_identity(Some(identity))?;
        }
        if let Some(identity_id) = str_of(body, keys::IDENTITY_ID) {
            if previous.as_deref() != Some(identity_id) {
                self.clear_link_cache();
            }
            s.set_identity_id(Some(identity_id))?;
        }
        if let Some(link) = str_of(body, keys::LINK) {
            s.set_user_url(Some(link))?;
        }
        if let Some(first) = referring_data(body.get(keys::REFERRING_DATA)) {
            s.set_install_params(Some(&first))?;
        }
        Ok(())
    }

    fn apply_logout(&self, body: &Value) -> Result<(), SdkError> {
        let s = &self.session;
        s.set_session_id(None)?;
        s.set_identity_id(None)?;
        s.set_user_url(None)?;
        s.set_install_params(None)?;
        s.set_session_params(None)?;
        s.set_identity(None)?;
        s.clear_user_values()?;

        // the backend may hand out fresh anonymous ids
        if let Some(session_id) = str_of(body, keys::SESSION_ID) {
            s.set_session_id(Some(session_id))?;
        }
        if let Some(identity_id) = str_of(body, keys::IDENTITY_ID) {
            s.set_identity_id(Some(identity_id))?;
        }
        if let Some(link) = str_of(body, keys::LINK) {
            s.set_user_url(Some(link))?;
        }
        self.clear_link_cache();
        Ok(())
    }

    fn apply_action_counts(&self, body: &Value) -> Result<bool, SdkError> {
        let mut changed = false;
        for (action, counts) in body.as_object().into_iter().flatten() {
            let (Some(total), Some(unique)) = (
                counts.get(keys::TOTAL).and_then(Value::as_i64),
                counts.get(keys::UNIQUE).and_then(Value::as_i64),
            ) else {
                continue;
            };
            let next = ActionCount { total, unique };
            changed |= self.session.action_count(action) != next;
            self.session.set_action_count(action, next)?;
        }
        Ok(changed)
    }

    fn apply_credits(&self, body: &Value) -> Result<bool, SdkError> {
        let mut changed = false;
        for (bucket, credits) in body.as_object().into_iter().flatten() {
            let Some(credits) = credits.as_i64() else {
                continue;
            };
            changed |= self.session.credits(bucket) != credits;
            self.session.set_credits(bucket, credits)?;
        }
        Ok(changed)
    }
}

fn str_of<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Referring data arrives either as an object or as a JSON-encoded string.
fn referring_data(raw: Option<&Value>) -> Option<Value> {
    match raw? {
        Value::Object(map) if !map.is_empty() => Some(Value::Object(map.clone())),
        Value::String(s) => serde_json::from_str::<Value>(s)
            .ok()
            .filter(|v| v.as_object().is_some_and(|o| !o.is_empty())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::MemoryStore;
    use crate::ports::{IdGenerator, SystemClock, UlidGenerator};
    use chrono::Utc;
    use serde_json::json;

    fn dispatcher() -> (ResponseDispatcher, Arc<SessionStore>) {
        let session = Arc::new(SessionStore::new(Arc::new(MemoryStore::new())));
        (ResponseDispatcher::new(session.clone()), session)
    }

    fn request(kind: RequestKind, payload: Value) -> Request {
        let Value::Object(payload) = payload else {
            panic!("payload must be an object");
        };
        Request::new(UlidGenerator::new(SystemClock).generate_request_id(), kind, payload, Utc::now())
    }

    #[test]
    fn install_success_stores_ids_and_params() {
        let (d, s) = dispatcher();
        s.set_link_click_identifier(Some("abc")).unwrap();
        let req = request(RequestKind::RegisterInstall, json!({ "is_referrable": true }));
        let body = json!({
            "identity_id": "U1",
            "session_id": "S1",
            "device_fingerprint_id": "F1",
            "link": "https://bnc.lt/u1",
            "link_click_id": "L1",
            "data": "{\"+clicked_branch_link\":true,\"promo\":\"spring\"}",
        });

        let (reply, effect) = d.on_success(&req, &body).unwrap();

        assert_eq!(effect, SessionEffect::Established);
        assert_eq!(
            reply,
            Reply::ReferringParams(json!({ "+clicked_branch_link": true, "promo": "spring" }))
        );
        let state = s.snapshot();
        assert_eq!(state.identity_id.as_deref(), Some("U1"));
        assert_eq!(state.session_id.as_deref(), Some("S1"));
        assert_eq!(state.device_fingerprint_id.as_deref(), Some("F1"));
        assert_eq!(state.link_click_id.as_deref(), Some("L1"));
        assert_eq!(state.user_url.as_deref(), Some("https://bnc.lt/u1"));
        assert_eq!(state.first_referring_params["promo"], "spring");
        assert_eq!(s.link_click_identifier(), None);
    }

    #[test]
    fn open_keeps_first_params_unless_referrable() {
        let (d, s) = dispatcher();
        s.set_install_params(Some(&json!({ "first": 1 }))).unwrap();
        let req = request(RequestKind::RegisterOpen, json!({ "is_referrable": false }));

        d.on_success(&req, &json!({ "session_id": "S2", "data": { "latest": 2 } }))
            .unwrap();

        assert_eq!(s.install_params(), json!({ "first": 1 }));
        assert_eq!(s.session_params(), json!({ "latest": 2 }));
        assert_eq!(s.link_click_id(), None);
    }

    #[test]
    fn identify_changes_identity_and_drops_link_cache() {
        let (d, s) = dispatcher();
        s.set_identity_id(Some("U1")).unwrap();
        let link_req = request(RequestKind::CreateLink, json!({ "channel": "sms" }));
        d.on_success(&link_req, &json!({ "url": "https://bnc.lt/x" })).unwrap();
        assert!(d.cached_link(link_req.payload()).is_some());

        let req = request(RequestKind::IdentifyUser, json!({ "identity": "alice" }));
        let (reply, effect) = d
            .on_success(&req, &json!({ "identity_id": "U2", "referring_data": { "from": "bob" } }))
            .unwrap();

        assert_eq!(effect, SessionEffect::IdsChanged);
        assert_eq!(reply, Reply::ReferringParams(json!({ "from": "bob" })));
        assert_eq!(s.identity().as_deref(), Some("alice"));
        assert_eq!(s.identity_id().as_deref(), Some("U2"));
        assert!(d.cached_link(link_req.payload()).is_none());
    }

    #[test]
    fn logout_resets_state_then_takes_new_ids() {
        let (d, s) = dispatcher();
        s.set_identity(Some("alice")).unwrap();
        s.set_identity_id(Some("U1")).unwrap();
        s.set_session_id(Some("S1")).unwrap();
        s.set_credits("default", 10).unwrap();
        s.set_install_params(Some(&json!({ "a": 1 }))).unwrap();

        let req = request(RequestKind::Logout, json!({}));
        let (_, effect) = d
            .on_success(&req, &json!({ "session_id": "S9", "identity_id": "U9" }))
            .unwrap();

        assert_eq!(effect, SessionEffect::LoggedOut);
        assert_eq!(s.identity(), None);
        assert_eq!(s.identity_id().as_deref(), Some("U9"));
        assert_eq!(s.session_id().as_deref(), Some("S9"));
        assert_eq!(s.credits("default"), 0);
        assert!(!s.has_install_params());
    }

    #[test]
    fn counts_report_whether_anything_changed() {
        let (d, _) = dispatcher();
        let req = request(RequestKind::GetReferralCounts, json!({}));
        let body = json!({ "install": { "total": 3, "unique": 2 } });

        assert_eq!(d.on_success(&req, &body).unwrap().0, Reply::StateChanged(true));
        assert_eq!(d.on_success(&req, &body).unwrap().0, Reply::StateChanged(false));
    }

    #[test]
    fn credits_report_whether_anything_changed() {
        let (d, s) = dispatcher();
        let req = request(RequestKind::GetRewards, json!({}));

        assert_eq!(
            d.on_success(&req, &json!({ "default": 50 })).unwrap().0,
            Reply::StateChanged(true)
        );
        assert_eq!(
            d.on_success(&req, &json!({ "default": 50 })).unwrap().0,
            Reply::StateChanged(false)
        );
        assert_eq!(s.credits("default"), 50);
    }

    #[test]
    fn redeem_decrements_bucket() {
        let (d, s) = dispatcher();
        s.set_credits("default", 50).unwrap();
        let req = request(RequestKind::RedeemRewards, json!({ "bucket": "default", "amount": 20 }));

        d.on_success(&req, &json!({})).unwrap();

        assert_eq!(s.credits("default"), 30);
    }

    #[test]
    fn conflict_on_create_link_is_a_null_url() {
        let (d, _) = dispatcher();
        let link = request(RequestKind::CreateLink, json!({}));
        let event = request(RequestKind::CompleteAction, json!({}));

        assert_eq!(d.on_conflict(&link, 409), Ok(Reply::Url(None)));
        assert_eq!(d.on_conflict(&event, 409), Err(SdkError::Conflict { status: 409 }));
    }

    #[test]
    fn referral_code_without_code_is_invalid() {
        let (d, _) = dispatcher();
        let req = request(RequestKind::ValidateReferralCode, json!({ "referral_code": "X" }));

        assert_eq!(d.on_success(&req, &json!({ "error": "nope" })), Err(SdkError::InvalidReferralCode));
        assert!(d.on_success(&req, &json!({ "referral_code": "X", "amount": 5 })).is_ok());
    }

    #[test]
    fn history_is_a_list() {
        let (d, _) = dispatcher();
        let req = request(RequestKind::GetRewardHistory, json!({}));
        let (reply, _) = d.on_success(&req, &json!([{ "id": 1 }, { "id": 2 }])).unwrap();
        assert_eq!(reply.into_list().unwrap().len(), 2);
    }
}
