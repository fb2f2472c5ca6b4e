//! Errors delivered to callers.
//!
//! Every action resolves to `Result<_, SdkError>`. Nothing here is raised
//! across the public API as a panic; transport and storage problems are
//! folded into these variants.

use crate::config::ConfigError;
use crate::ports::StorageError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SdkError {
    #[error("no session: the request needs an established session")]
    NoSession,

    #[error("backend unreachable (no connectivity)")]
    NoConnectivity,

    #[error("request timed out")]
    Timeout,

    #[error("server error status={status}")]
    ServerError { status: u16 },

    #[error("request rejected status={status}: {message}")]
    ClientError { status: u16, message: String },

    #[error("conflict status={status}")]
    Conflict { status: u16 },

    #[error("could not construct request: {0}")]
    Construct(String),

    #[error("invalid referral code")]
    InvalidReferralCode,

    #[error("redeem rewards failed: {0}")]
    RedeemRewards(String),

    #[error("request evicted: queue is full")]
    QueueFull,

    #[error("request dropped before a result was delivered")]
    Cancelled,

    #[error("unexpected reply for {0}")]
    UnexpectedReply(&'static str),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
