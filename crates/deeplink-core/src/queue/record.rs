//! Request record: the persisted form of a queued request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Request, RequestId, RequestKind};
use crate::ports::{Clock, IdGenerator};

/// One element of the persisted queue array.
///
/// Design:
/// - `REQ_TAG` + `REQ_POST` are the minimum a record needs to come back.
/// - Id, creation time and waiting flag are optional on read; missing ones
///   are regenerated so older or hand-edited records still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    #[serde(rename = "REQ_TAG", default)]
    pub tag: String,

    #[serde(rename = "REQ_POST", default)]
    pub post: Value,

    #[serde(rename = "REQ_ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "REQ_CREATED", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(rename = "REQ_WAITING", default)]
    pub waiting: bool,
}

impl RequestRecord {
    pub fn from_request(request: &Request) -> Self {
        Self {
            tag: request.kind().tag().to_string(),
            post: Value::Object(request.payload().clone()),
            id: Some(request.id().as_ulid().to_string()),
            created_at: Some(request.created_at()),
            waiting: request.is_waiting(),
        }
    }

    /// Rebuilds a request. `None` when the tag is empty or unknown, the kind
    /// is not persistable, or the payload is not a JSON object.
    pub fn into_request(self, ids: &dyn IdGenerator, clock: &dyn Clock) -> Option<Request> {
        let kind = RequestKind::from_tag(&self.tag)?;
        if !kind.is_persistable() {
            return None;
        }
        let Value::Object(payload) = self.post else {
            return None;
        };
        let id = self
            .id
            .as_deref()
            .and_then(RequestId::parse)
            .unwrap_or_else(|| ids.generate_request_id());
        let created_at = self.created_at.unwrap_or_else(|| clock.now());
        Some(Request::restored(id, kind, payload, self.waiting, created_at))
    }
}
