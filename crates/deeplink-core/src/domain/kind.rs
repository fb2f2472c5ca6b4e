//! Request kinds: the closed set of API calls the SDK can queue.
//!
//! A kind fixes everything about a request that never changes while it sits
//! in the queue: its persisted tag, HTTP method and path, and how it relates
//! to the session lifecycle.

use serde::{Deserialize, Serialize};

/// HTTP verb used for a request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    RegisterInstall,
    RegisterOpen,
    RegisterClose,
    IdentifyUser,
    Logout,
    GetReferralCounts,
    GetRewards,
    RedeemRewards,
    GetRewardHistory,
    CompleteAction,
    CreateLink,
    GetReferralCode,
    ValidateReferralCode,
    ApplyReferralCode,
    Ping,
}

impl RequestKind {
    pub const ALL: [RequestKind; 15] = [
        RequestKind::RegisterInstall,
        RequestKind::RegisterOpen,
        RequestKind::RegisterClose,
        RequestKind::IdentifyUser,
        RequestKind::Logout,
        RequestKind::GetReferralCounts,
        RequestKind::GetRewards,
        RequestKind::RedeemRewards,
        RequestKind::GetRewardHistory,
        RequestKind::CompleteAction,
        RequestKind::CreateLink,
        RequestKind::GetReferralCode,
        RequestKind::ValidateReferralCode,
        RequestKind::ApplyReferralCode,
        RequestKind::Ping,
    ];

    /// Tag written into persisted queue records (`REQ_TAG`).
    pub fn tag(self) -> &'static str {
        match self {
            RequestKind::RegisterInstall => "register_install",
            RequestKind::RegisterOpen => "register_open",
            RequestKind::RegisterClose => "register_close",
            RequestKind::IdentifyUser => "identify_user",
            RequestKind::Logout => "logout",
            RequestKind::GetReferralCounts => "get_referral_counts",
            RequestKind::GetRewards => "get_rewards",
            RequestKind::RedeemRewards => "redeem_rewards",
            RequestKind::GetRewardHistory => "get_reward_history",
            RequestKind::CompleteAction => "complete_action",
            RequestKind::CreateLink => "create_link",
            RequestKind::GetReferralCode => "get_referral_code",
            RequestKind::ValidateReferralCode => "validate_referral_code",
            RequestKind::ApplyReferralCode => "apply_referral_code",
            RequestKind::Ping => "ping",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// API path relative to the base URL. `None` for requests that never hit
    /// the network.
    ///
    /// Paths ending in `/` take a suffix computed at send time
    /// (identity id or referral code).
    pub fn path(self) -> Option<&'static str> {
        let path = match self {
            RequestKind::RegisterInstall => "v1/install",
            RequestKind::RegisterOpen => "v1/open",
            RequestKind::RegisterClose => "v1/close",
            RequestKind::IdentifyUser => "v1/profile",
            RequestKind::Logout => "v1/logout",
            RequestKind::GetReferralCounts => "v1/referrals/",
            RequestKind::GetRewards => "v1/credits/",
            RequestKind::RedeemRewards => "v1/redeem",
            RequestKind::GetRewardHistory => "v1/credithistory",
            RequestKind::CompleteAction => "v1/event",
            RequestKind::CreateLink => "v1/url",
            RequestKind::GetReferralCode => "v1/referralcode",
            RequestKind::ValidateReferralCode => "v1/referralcode/",
            RequestKind::ApplyReferralCode => "v1/applycode/",
            RequestKind::Ping => return None,
        };
        Some(path)
    }

    pub fn method(self) -> HttpMethod {
        match self {
            RequestKind::GetReferralCounts | RequestKind::GetRewards => HttpMethod::Get,
            _ => HttpMethod::Post,
        }
    }

    /// Install or open: the requests that establish a session.
    pub fn is_session_init(self) -> bool {
        matches!(self, RequestKind::RegisterInstall | RequestKind::RegisterOpen)
    }

    /// Kinds allowed to dispatch before a session is established.
    pub fn bypasses_session_check(self) -> bool {
        matches!(
            self,
            RequestKind::RegisterInstall
                | RequestKind::RegisterOpen
                | RequestKind::RegisterClose
                | RequestKind::Ping
        )
    }

    pub fn requires_session(self) -> bool {
        !self.bypasses_session_check()
    }

    /// Whether the payload carries identity/session/fingerprint ids that must
    /// track the current session state while queued.
    pub fn carries_session_fields(self) -> bool {
        !matches!(self, RequestKind::RegisterInstall | RequestKind::Ping)
    }

    /// Ping is a local wake-up and is never written to storage.
    pub fn is_persistable(self) -> bool {
        self != RequestKind::Ping
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}
