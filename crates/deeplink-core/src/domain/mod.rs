//! Domain model (ids, request kinds, requests, outcomes, session state, errors).

pub mod decision;
pub mod errors;
pub mod ids;
pub mod keys;
pub mod kind;
pub mod outcome;
pub mod params;
pub mod request;
pub mod retry;
pub mod session;

pub use decision::{Decider, Decision, DefaultDecider};
pub use errors::SdkError;
pub use ids::{Id, IdMarker, RequestId};
pub use kind::{HttpMethod, RequestKind};
pub use outcome::{FinalOutcome, NetworkOutcome, TransientReason};
pub use params::{
    CalculationType, CodeLocation, CreditHistoryQuery, HistoryOrder, InitOptions,
    LinkProperties, ReferralCodeOptions,
};
pub use request::Request;
pub use retry::RetryPolicy;
pub use session::{ActionCount, NetworkState, SessionIds, SessionPhase, SessionState};
