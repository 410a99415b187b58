//! Tunnel connection retry policy
//!
//! The policy only decides; the manager applies any remediation it returns
//! before the next attempt.

use std::time::Duration;

use xdl_core::prelude::*;
use xdl_process::ngrok::{error_code, ERROR_ALREADY_BOUND};

pub const MAX_ATTEMPTS: u32 = 3;
pub const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Corrective action to take before retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    /// Kill the tunnel agent recorded for this project (or the provider's own)
    KillRecordedTunnel,
    /// Replace the project's URL randomness so the hostnames change
    RegenerateRandomness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { remediation: Option<Remediation> },
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            backoff: RETRY_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Decide after the `attempt`-th (1-based) failure
    pub fn decide(&self, attempt: u32, error: &Error) -> RetryDecision {
        if attempt >= self.max_attempts || !error.is_recoverable() {
            return RetryDecision::GiveUp;
        }
        let remediation = if is_already_bound(error) {
            match attempt {
                1 => Some(Remediation::KillRecordedTunnel),
                _ => Some(Remediation::RegenerateRandomness),
            }
        } else {
            None
        };
        RetryDecision::Retry { remediation }
    }
}

/// Whether the provider reported the hostname as bound elsewhere
pub fn is_already_bound(error: &Error) -> bool {
    match error {
        Error::Tunnel {
            payload: Some(payload),
            ..
        } => error_code(payload) == Some(ERROR_ALREADY_BOUND),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bound() -> Error {
        Error::tunnel_with_payload("already bound", json!({"error_code": 103}))
    }

    #[test]
    fn test_already_bound_remediations() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(1, &bound()),
            RetryDecision::Retry {
                remediation: Some(Remediation::KillRecordedTunnel)
            }
        );
        assert_eq!(
            policy.decide(2, &bound()),
            RetryDecision::Retry {
                remediation: Some(Remediation::RegenerateRandomness)
            }
        );
        assert_eq!(policy.decide(3, &bound()), RetryDecision::GiveUp);
    }

    #[test]
    fn test_plain_failures_retry_without_remediation() {
        let policy = RetryPolicy::default();
        let err = Error::tunnel("flaky");
        assert_eq!(
            policy.decide(1, &err),
            RetryDecision::Retry { remediation: None }
        );
        assert_eq!(policy.decide(3, &err), RetryDecision::GiveUp);
    }

    #[test]
    fn test_non_recoverable_gives_up() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(1, &Error::NotLoggedIn),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_other_codes_are_not_bound() {
        let err = Error::tunnel_with_payload("nope", json!({"error_code": 102}));
        assert!(!is_already_bound(&err));
        assert!(is_already_bound(&bound()));
    }
}
