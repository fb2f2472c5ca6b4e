//! Request: one pending API call.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::ids::RequestId;
use super::keys;
use super::kind::RequestKind;
use super::session::SessionIds;

/// A queued API call.
///
/// `kind` is fixed at construction. The payload is mutable only through
/// [`Request::refresh_session_fields`] and the `waiting` flag, so a queued
/// request always reflects the current session ids until it is sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    id: RequestId,
    kind: RequestKind,
    payload: Map<String, Value>,
    waiting: bool,
    created_at: DateTime<Utc>,
}

impl Request {
    pub fn new(
        id: RequestId,
        kind: RequestKind,
        payload: Map<String, Value>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            payload,
            waiting: false,
            created_at,
        }
    }

    pub(crate) fn restored(
        id: RequestId,
        kind: RequestKind,
        payload: Map<String, Value>,
        waiting: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            payload,
            waiting,
            created_at,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn set_waiting(&mut self, waiting: bool) {
        self.waiting = waiting;
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Rewrites identity/session/fingerprint fields to `ids`.
    ///
    /// Unknown ids are written as JSON null so the field is always present.
    /// `link_click_id` is only written once one is known.
    pub fn refresh_session_fields(&mut self, ids: &SessionIds) {
        if !self.kind.carries_session_fields() {
            return;
        }
        let opt = |v: &Option<String>| v.clone().map(Value::String).unwrap_or(Value::Null);
        self.payload
            .insert(keys::IDENTITY_ID.to_string(), opt(&ids.identity_id));
        self.payload
            .insert(keys::SESSION_ID.to_string(), opt(&ids.session_id));
        self.payload.insert(
            keys::DEVICE_FINGERPRINT_ID.to_string(),
            opt(&ids.device_fingerprint_id),
        );
        if let Some(link_click_id) = &ids.link_click_id {
            self.payload.insert(
                keys::LINK_CLICK_ID.to_string(),
                Value::String(link_click_id.clone()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use ulid::Ulid;

    fn request(kind: RequestKind) -> Request {
        let payload = json!({ "event": "purchase" }).as_object().cloned().unwrap();
        Request::new(RequestId::from_ulid(Ulid::new()), kind, payload, Utc::now())
    }

    #[test]
    fn refresh_writes_placeholders_then_real_ids() {
        let mut req = request(RequestKind::CompleteAction);
        req.refresh_session_fields(&SessionIds::default());
        assert_eq!(req.payload()["identity_id"], Value::Null);
        assert!(!req.payload().contains_key("link_click_id"));

        req.refresh_session_fields(&SessionIds {
            identity_id: Some("U1".into()),
            session_id: Some("S1".into()),
            device_fingerprint_id: Some("F1".into()),
            link_click_id: Some("L1".into()),
        });
        assert_eq!(req.str_field("identity_id"), Some("U1"));
        assert_eq!(req.str_field("session_id"), Some("S1"));
        assert_eq!(req.str_field("device_fingerprint_id"), Some("F1"));
        assert_eq!(req.str_field("link_click_id"), Some("L1"));
        assert_eq!(req.str_field("event"), Some("purchase"));
    }

    #[test]
    fn install_payload_is_left_alone() {
        let mut req = request(RequestKind::RegisterInstall);
        let before = req.payload().clone();
        req.refresh_session_fields(&SessionIds {
            identity_id: Some("U1".into()),
            ..SessionIds::default()
        });
        assert_eq!(req.payload(), &before);
    }
}
