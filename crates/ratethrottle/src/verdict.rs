//! The immutable result of a `Check` call.

use crate::error::RateThrottleError;

/// Returned synchronously from [`crate::engine::Engine::check`]. Carries
/// everything an adapter needs to answer the caller, including the fields an
/// HTTP adapter would map onto `X-RateLimit-*` / `Retry-After` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Verdict {
    pub allowed: bool,
    pub remaining: u64,
    pub limit: u64,
    /// Absolute epoch-seconds at which the window (or block) resets.
    pub reset_time: u64,
    /// Seconds until retry becomes viable; 0 when `allowed`.
    pub retry_after: u64,
    /// Whether this denial is a hold-block rather than a transient strategy
    /// denial.
    pub blocked: bool,
}

impl Verdict {
    /// An allow-bypass verdict: full remaining, not blocked. Used for
    /// allow-set membership and `condition == false` short-circuits.
    pub fn bypass(limit: u64, reset_time: u64) -> Self {
        Verdict {
            allowed: true,
            remaining: limit,
            limit,
            reset_time,
            retry_after: 0,
            blocked: false,
        }
    }

    /// Converts a denied verdict into [`RateThrottleError::RateLimitExceeded`]
    /// for adapters that prefer raising over branching on `allowed`. Returns
    /// `Ok(self)` when the verdict allowed the request.
    pub fn into_result(self) -> Result<Self, RateThrottleError> {
        if self.allowed {
            Ok(self)
        } else {
            Err(RateThrottleError::RateLimitExceeded {
                limit: self.limit,
                remaining: self.remaining,
                reset_time: self.reset_time,
                retry_after: self.retry_after,
            })
        }
    }
}
