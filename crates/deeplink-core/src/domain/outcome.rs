//! Network outcome: the uniform shape of one backend call.
//!
//! Design:
//! - The executor maps every transport result into exactly one variant.
//! - Only `TransientFailure` is retryable; the retry budget lives with the
//!   orchestrator, not here.

use serde_json::Value;

use super::errors::SdkError;

/// Why a call failed in a way that may succeed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientReason {
    Timeout,
    NoConnectivity,
    ServerError { status: u16 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum NetworkOutcome {
    /// HTTP 200. The body is parsed JSON (`Null` when empty, a JSON string
    /// when the body is not JSON).
    Success { status: u16, body: Value },

    /// 4xx other than 409; never retried.
    ClientError { status: u16, body: String },

    /// 409; handled per kind by the response dispatcher.
    Conflict { status: u16 },

    TransientFailure(TransientReason),
}

impl NetworkOutcome {
    /// Classifies an HTTP status. `400..500` is the client range, 500 and up
    /// (and any other non-200 code) is a server error.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            200 => NetworkOutcome::Success {
                status,
                body: parse_body(body),
            },
            409 => NetworkOutcome::Conflict { status },
            400..=499 => NetworkOutcome::ClientError {
                status,
                body: body.to_string(),
            },
            _ => NetworkOutcome::TransientFailure(TransientReason::ServerError { status }),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, NetworkOutcome::TransientFailure(_))
    }

    /// Splits off the retryable case.
    pub fn into_final(self) -> Result<FinalOutcome, TransientReason> {
        match self {
            NetworkOutcome::Success { status, body } => Ok(FinalOutcome::Success { status, body }),
            NetworkOutcome::ClientError { status, body } => Ok(FinalOutcome::ClientError { status, body }),
            NetworkOutcome::Conflict { status } => Ok(FinalOutcome::Conflict { status }),
            NetworkOutcome::TransientFailure(reason) => Err(reason),
        }
    }
}

/// An outcome that will not change by sending again.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalOutcome {
    Success { status: u16, body: Value },
    ClientError { status: u16, body: String },
    Conflict { status: u16 },
}

fn parse_body(body: &str) -> Value {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(body.to_string()))
}

impl From<TransientReason> for SdkError {
    fn from(reason: TransientReason) -> Self {
        match reason {
            TransientReason::Timeout => SdkError::Timeout,
            TransientReason::NoConnectivity => SdkError::NoConnectivity,
            TransientReason::ServerError { status } => SdkError::ServerError { status },
        }
    }
}
