//! SessionStore - KV ストア上のセッション状態
//!
//! identity id / session id / referring params / credits などを
//! KeyValueStore に型付きで読み書きします。書き込みは ResponseDispatcher
//! （とクライアントの一部の setter）だけが行い、読み出しはどこからでも可。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::domain::{ActionCount, SessionIds, SessionState};
use crate::ports::{KeyValueStore, StorageError};

/// Legacy sentinel for "unset" string values.
const NO_VALUE: &str = "bnc_no_value";

const IDENTITY_ID: &str = "bnc_identity_id";
const IDENTITY: &str = "bnc_identity";
const SESSION_ID: &str = "bnc_session_id";
const DEVICE_FINGERPRINT_ID: &str = "bnc_device_fingerprint_id";
const LINK_CLICK_ID: &str = "bnc_link_click_id";
const LINK_CLICK_IDENTIFIER: &str = "bnc_link_click_identifier";
const USER_URL: &str = "bnc_user_url";
const SESSION_PARAMS: &str = "bnc_session_params";
const INSTALL_PARAMS: &str = "bnc_install_params";
const IS_REFERRABLE: &str = "bnc_is_referrable";
const BUCKETS: &str = "bnc_buckets";
const CREDIT_BASE: &str = "bnc_credit_base_";
const ACTIONS: &str = "bnc_actions";
const TOTAL_BASE: &str = "bnc_total_base_";
const UNIQUE_BASE: &str = "bnc_balance_base_";
const RETRY_COUNT: &str = "bnc_retry_count";
const RETRY_INTERVAL: &str = "bnc_retry_interval";
const TIMEOUT: &str = "bnc_timeout";

pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    fn get(&self, key: &str) -> Option<String> {
        self.kv
            .get_string(key)
            .filter(|v| !v.is_empty() && v != NO_VALUE)
    }

    fn put(&self, key: &str, value: Option<&str>) -> Result<(), StorageError> {
        match value {
            Some(v) if !v.is_empty() => self.kv.set_string(key, v),
            _ => self.kv.remove(key),
        }
    }

    fn get_json(&self, key: &str) -> Value {
        self.get(key)
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    fn put_json(&self, key: &str, value: Option<&Value>) -> Result<(), StorageError> {
        match value {
            Some(v) if v.as_object().is_some_and(|o| !o.is_empty()) => {
                self.kv.set_string(key, &v.to_string())
            }
            _ => self.kv.remove(key),
        }
    }

    fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| raw.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn add_to_list(&self, key: &str, item: &str) -> Result<(), StorageError> {
        let mut items = self.get_list(key);
        if !items.iter().any(|i| i == item) {
            items.push(item.to_string());
            self.kv.set_string(key, &items.join(","))?;
        }
        Ok(())
    }

    pub fn identity_id(&self) -> Option<String> {
        self.get(IDENTITY_ID)
    }

    pub fn set_identity_id(&self, value: Option<&str>) -> Result<(), StorageError> {
        self.put(IDENTITY_ID, value)
    }

    /// Developer-supplied user name set through `set_identity`.
    pub fn identity(&self) -> Option<String> {
        self.get(IDENTITY)
    }

    pub fn set_identity(&self, value: Option<&str>) -> Result<(), StorageError> {
        self.put(IDENTITY, value)
    }

    pub fn session_id(&self) -> Option<String> {
        self.get(SESSION_ID)
    }

    pub fn set_session_id(&self, value: Option<&str>) -> Result<(), StorageError> {
        self.put(SESSION_ID, value)
    }

    pub fn device_fingerprint_id(&self) -> Option<String> {
        self.get(DEVICE_FINGERPRINT_ID)
    }

    pub fn set_device_fingerprint_id(&self, value: Option<&str>) -> Result<(), StorageError> {
        self.put(DEVICE_FINGERPRINT_ID, value)
    }

    pub fn link_click_id(&self) -> Option<String> {
        self.get(LINK_CLICK_ID)
    }

    pub fn set_link_click_id(&self, value: Option<&str>) -> Result<(), StorageError> {
        self.put(LINK_CLICK_ID, value)
    }

    /// Click identifier taken from the deep link, sent with the next
    /// install/open and cleared once that succeeds.
    pub fn link_click_identifier(&self) -> Option<String> {
        self.get(LINK_CLICK_IDENTIFIER)
    }

    pub fn set_link_click_identifier(&self, value: Option<&str>) -> Result<(), StorageError> {
        self.put(LINK_CLICK_IDENTIFIER, value)
    }

    pub fn user_url(&self) -> Option<String> {
        self.get(USER_URL)
    }

    pub fn set_user_url(&self, value: Option<&str>) -> Result<(), StorageError> {
        self.put(USER_URL, value)
    }

    /// Latest referring params (this session).
    pub fn session_params(&self) -> Value {
        self.get_json(SESSION_PARAMS)
    }

    pub fn set_session_params(&self, value: Option<&Value>) -> Result<(), StorageError> {
        self.put_json(SESSION_PARAMS, value)
    }

    /// First referring params (install-time).
    pub fn install_params(&self) -> Value {
        self.get_json(INSTALL_PARAMS)
    }

    pub fn has_install_params(&self) -> bool {
        self.install_params().as_object().is_some_and(|o| !o.is_empty())
    }

    pub fn set_install_params(&self, value: Option<&Value>) -> Result<(), StorageError> {
        self.put_json(INSTALL_PARAMS, value)
    }

    pub fn is_referrable(&self) -> bool {
        self.kv.get_bool(IS_REFERRABLE).unwrap_or(false)
    }

    pub fn set_referrable(&self, value: bool) -> Result<(), StorageError> {
        self.kv.set_bool(IS_REFERRABLE, value)
    }

    pub fn credits(&self, bucket: &str) -> i64 {
        self.kv.get_int(&format!("{CREDIT_BASE}{bucket}")).unwrap_or(0)
    }

    pub fn set_credits(&self, bucket: &str, credits: i64) -> Result<(), StorageError> {
        self.add_to_list(BUCKETS, bucket)?;
        self.kv.set_int(&format!("{CREDIT_BASE}{bucket}"), credits)
    }

    pub fn buckets(&self) -> Vec<String> {
        self.get_list(BUCKETS)
    }

    pub fn action_count(&self, action: &str) -> ActionCount {
        ActionCount {
            total: self.kv.get_int(&format!("{TOTAL_BASE}{action}")).unwrap_or(0),
            unique: self.kv.get_int(&format!("{UNIQUE_BASE}{action}")).unwrap_or(0),
        }
    }

    pub fn set_action_count(&self, action: &str, count: ActionCount) -> Result<(), StorageError> {
        self.add_to_list(ACTIONS, action)?;
        self.kv.set_int(&format!("{TOTAL_BASE}{action}"), count.total)?;
        self.kv.set_int(&format!("{UNIQUE_BASE}{action}"), count.unique)
    }

    pub fn actions(&self) -> Vec<String> {
        self.get_list(ACTIONS)
    }

    /// Resets credit and action counters to defaults.
    pub fn clear_user_values(&self) -> Result<(), StorageError> {
        for bucket in self.buckets() {
            self.kv.remove(&format!("{CREDIT_BASE}{bucket}"))?;
        }
        self.kv.remove(BUCKETS)?;
        for action in self.actions() {
            self.kv.remove(&format!("{TOTAL_BASE}{action}"))?;
            self.kv.remove(&format!("{UNIQUE_BASE}{action}"))?;
        }
        self.kv.remove(ACTIONS)
    }

    pub fn retry_count(&self) -> Option<u32> {
        self.kv.get_int(RETRY_COUNT).and_then(|n| u32::try_from(n).ok())
    }

    pub fn set_retry_count(&self, count: u32) -> Result<(), StorageError> {
        self.kv.set_int(RETRY_COUNT, i64::from(count))
    }

    pub fn retry_interval(&self) -> Option<Duration> {
        self.kv
            .get_int(RETRY_INTERVAL)
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms as u64))
    }

    pub fn set_retry_interval(&self, interval: Duration) -> Result<(), StorageError> {
        self.kv.set_int(RETRY_INTERVAL, interval.as_millis() as i64)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.kv
            .get_int(TIMEOUT)
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms as u64))
    }

    pub fn set_timeout(&self, timeout: Duration) -> Result<(), StorageError> {
        self.kv.set_int(TIMEOUT, timeout.as_millis() as i64)
    }

    pub fn ids(&self) -> SessionIds {
        SessionIds {
            identity_id: self.identity_id(),
            session_id: self.session_id(),
            device_fingerprint_id: self.device_fingerprint_id(),
            link_click_id: self.link_click_id(),
        }
    }

    pub fn snapshot(&self) -> SessionState {
        let credits: BTreeMap<String, i64> = self
            .buckets()
            .into_iter()
            .map(|b| {
                let c = self.credits(&b);
                (b, c)
            })
            .collect();
        let action_counts: BTreeMap<String, ActionCount> = self
            .actions()
            .into_iter()
            .map(|a| {
                let c = self.action_count(&a);
                (a, c)
            })
            .collect();
        SessionState {
            identity_id: self.identity_id(),
            session_id: self.session_id(),
            device_fingerprint_id: self.device_fingerprint_id(),
            link_click_id: self.link_click_id(),
            identity: self.identity(),
            user_url: self.user_url(),
            first_referring_params: self.install_params(),
            latest_referring_params: self.session_params(),
            is_referrable: self.is_referrable(),
            credits,
            action_counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::MemoryStore;
    use serde_json::json;

    fn store() -> (SessionStore, Arc<MemoryStore>) {
        let kv = Arc::new(MemoryStore::new());
        (SessionStore::new(kv.clone()), kv)
    }

    #[test]
    fn legacy_sentinel_reads_as_unset() {
        let (session, kv) = store();
        kv.set_string("bnc_identity_id", "bnc_no_value").unwrap();
        assert_eq!(session.identity_id(), None);

        session.set_identity_id(Some("U1")).unwrap();
        assert_eq!(session.identity_id().as_deref(), Some("U1"));

        session.set_identity_id(None).unwrap();
        assert!(!kv.contains("bnc_identity_id"));
    }

    #[test]
    fn params_default_to_empty_object() {
        let (session, _) = store();
        assert_eq!(session.install_params(), json!({}));
        assert!(!session.has_install_params());

        session.set_install_params(Some(&json!({ "+clicked_branch_link": true }))).unwrap();
        assert!(session.has_install_params());

        session.set_install_params(Some(&json!({}))).unwrap();
        assert!(!session.has_install_params());
    }

    #[test]
    fn counters_track_their_keys_and_clear() {
        let (session, _) = store();
        session.set_credits("default", 50).unwrap();
        session.set_credits("gold", 3).unwrap();
        session
            .set_action_count("buy", ActionCount { total: 4, unique: 2 })
            .unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.credits.get("default"), Some(&50));
        assert_eq!(snapshot.action_counts["buy"], ActionCount { total: 4, unique: 2 });

        session.clear_user_values().unwrap();
        assert_eq!(session.credits("default"), 0);
        assert!(session.buckets().is_empty());
        assert!(session.actions().is_empty());
    }

    #[test]
    fn ids_snapshot() {
        let (session, _) = store();
        session.set_identity_id(Some("U1")).unwrap();
        session.set_session_id(Some("S1")).unwrap();
        assert!(!session.ids().is_complete());

        session.set_device_fingerprint_id(Some("F1")).unwrap();
        assert!(session.ids().is_complete());
    }
}
