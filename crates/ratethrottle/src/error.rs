//! Error kinds surfaced by the engine.

use std::fmt;

/// Errors the engine can return from its public operations.
///
/// The engine never swallows an error: every fallible operation returns
/// either a [`crate::verdict::Verdict`] or one of these variants. Backend
/// errors are the only variant that can also be handled transparently (via
/// the fail-open/fail-closed policy) rather than surfaced to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum RateThrottleError {
    /// `Check` or an administrative call referenced a rule name that is not
    /// registered.
    RuleNotFound {
        /// The rule name that was looked up.
        name: String,
    },
    /// A rule failed validation on registration (e.g. `limit == 0`,
    /// `window == 0`, or `burst < limit`).
    InvalidRule {
        /// Human-readable reason the rule was rejected.
        reason: String,
    },
    /// The rule's scope requires metadata the caller did not supply (e.g.
    /// `scope = endpoint` with no `metadata.endpoint`).
    MissingScopeData {
        /// The scope that required the missing field.
        scope: String,
    },
    /// The backend failed or timed out.
    BackendUnavailable {
        /// Underlying backend failure description.
        reason: String,
    },
    /// The shorthand rate string (`"<N>/<unit>"`) failed to parse.
    InvalidRate {
        /// The input string that failed to parse.
        input: String,
    },
    /// Optional variant for adapters that prefer raising over reading a
    /// denied [`crate::verdict::Verdict`]. The engine itself never returns
    /// this from `Check`; it exists purely for adapter convenience via
    /// [`crate::verdict::Verdict::into_result`].
    RateLimitExceeded {
        /// The rule's limit.
        limit: u64,
        /// Remaining permits in the current window (0 when denied).
        remaining: u64,
        /// Absolute epoch-seconds at which the window resets.
        reset_time: u64,
        /// Seconds until the caller may retry.
        retry_after: u64,
    },
}

impl fmt::Display for RateThrottleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateThrottleError::RuleNotFound { name } => {
                write!(f, "rate limit rule not found: {name}")
            }
            RateThrottleError::InvalidRule { reason } => {
                write!(f, "invalid rule: {reason}")
            }
            RateThrottleError::MissingScopeData { scope } => {
                write!(f, "scope `{scope}` requires metadata that was not supplied")
            }
            RateThrottleError::BackendUnavailable { reason } => {
                write!(f, "backend unavailable: {reason}")
            }
            RateThrottleError::InvalidRate { input } => {
                write!(f, "invalid rate shorthand: {input}")
            }
            RateThrottleError::RateLimitExceeded {
                limit,
                remaining,
                reset_time,
                retry_after,
            } => {
                write!(
                    f,
                    "rate limit exceeded: {remaining}/{limit} remaining, resets at {reset_time}, retry after {retry_after}s"
                )
            }
        }
    }
}

impl std::error::Error for RateThrottleError {}

pub type Result<T> = std::result::Result<T, RateThrottleError>;
