//! Decision model: what to do after a transient failure.
//!
//! The Decider is a pure function of the failure count and the reason; the
//! orchestrator carries out the decision (sleep and resend, or fail the
//! request and pause dispatch).

use std::time::Duration;

use super::outcome::TransientReason;
use super::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Resend the same head-of-line request after `delay`.
    Retry { delay: Duration, reason: String },

    /// Retry budget exhausted; surface the failure.
    GiveUp { reason: String },
}

pub trait Decider: Send + Sync {
    /// `failures` counts consecutive failed sends of the same request,
    /// including the one that just happened.
    fn decide(&self, failures: u32, reason: &TransientReason) -> Decision;
}

#[derive(Debug, Clone)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, failures: u32, reason: &TransientReason) -> Decision {
        let max = self.retry_policy.max_retries;
        if failures > max {
            Decision::GiveUp {
                reason: format!("{reason:?}: retries exhausted ({max}/{max})"),
            }
        } else {
            let delay = self.retry_policy.next_delay(failures);
            Decision::Retry {
                delay,
                reason: format!("{reason:?}: retry {failures}/{max} after {delay:?}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::first(1, true)]
    #[case::fifth(5, true)]
    #[case::sixth(6, false)]
    fn gives_up_after_max_retries(#[case] failures: u32, #[case] retries: bool) {
        let decider = DefaultDecider::new(RetryPolicy::default());
        let decision = decider.decide(failures, &TransientReason::Timeout);
        assert_eq!(matches!(decision, Decision::Retry { .. }), retries);
    }

    #[test]
    fn zero_retries_gives_up_immediately() {
        let decider = DefaultDecider::new(RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        });
        assert!(matches!(
            decider.decide(1, &TransientReason::NoConnectivity),
            Decision::GiveUp { .. }
        ));
    }
}
