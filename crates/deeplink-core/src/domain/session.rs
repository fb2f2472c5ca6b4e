//! Session model: orchestrator phases and the locally cached session state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session lifecycle phase.
///
/// ```text
/// Uninitialized --init--> Initializing --install/open ok--> Initialized
///       ^                      |                                 |
///       +----- failure --------+                                 |
///       +------------------------- close ------------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    Uninitialized,
    Initializing,
    Initialized,
}

/// Whether the dispatch loop believes the backend is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkState {
    Available,
    /// Retries were exhausted; automatic dispatch is paused.
    Lost,
}

/// Ids that queued requests reference and that change underneath them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIds {
    pub identity_id: Option<String>,
    pub session_id: Option<String>,
    pub device_fingerprint_id: Option<String>,
    pub link_click_id: Option<String>,
}

impl SessionIds {
    /// Identity, session and fingerprint ids are all known.
    pub fn is_complete(&self) -> bool {
        self.identity_id.is_some() && self.session_id.is_some() && self.device_fingerprint_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCount {
    pub total: i64,
    pub unique: i64,
}

/// Point-in-time copy of the installation-scoped session state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub identity_id: Option<String>,
    pub session_id: Option<String>,
    pub device_fingerprint_id: Option<String>,
    pub link_click_id: Option<String>,
    pub identity: Option<String>,
    pub user_url: Option<String>,
    pub first_referring_params: Value,
    pub latest_referring_params: Value,
    pub is_referrable: bool,
    pub credits: BTreeMap<String, i64>,
    pub action_counts: BTreeMap<String, ActionCount>,
}

impl SessionState {
    pub fn ids(&self) -> SessionIds {
        SessionIds {
            identity_id: self.identity_id.clone(),
            session_id: self.session_id.clone(),
            device_fingerprint_id: self.device_fingerprint_id.clone(),
            link_click_id: self.link_click_id.clone(),
        }
    }
}
