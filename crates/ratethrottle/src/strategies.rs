//! The four admission-decision algorithms. Each is a pure function over
//! [`crate::backend::Backend`] state; none of them know about access
//! control or blocks — that is the [`crate::engine::Engine`]'s job.
//!
//! Dispatch is the closed `match` in [`evaluate`], keyed off
//! [`crate::rule::Strategy`] — never a string lookup. Grounded on the
//! teacher's `RateLimiterStateInner` enum in the original `limiter.rs`,
//! which dispatches `Fixed`/`SlidingLog`/`SlidingCounter` the same way.

use std::time::Duration;

use crate::backend::{decode_pair, encode_pair, Backend, BackendResult};
use crate::rule::{Rule, Strategy};

/// Extra seconds of TTL tacked onto strategy state so a key outlives the
/// window it tracks by a safety margin (`spec.md` §4.2).
const SAFETY_MARGIN_SECS: f64 = 2.0;

/// Raw result of a strategy evaluation, before the engine folds in access
/// control, blocks, and bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct StrategyOutcome {
    pub allowed: bool,
    pub remaining: u64,
    /// Absolute epoch-seconds the current window (or bucket) resets at.
    pub reset_time: u64,
    pub retry_after: u64,
}

/// Evaluates `rule`'s strategy against the bucket state at `key`, as of
/// `now` (fractional epoch seconds).
pub(crate) async fn evaluate(
    rule: &Rule,
    key: &str,
    now: f64,
    backend: &dyn Backend,
) -> BackendResult<StrategyOutcome> {
    match rule.strategy {
        Strategy::TokenBucket => token_bucket(rule, key, now, backend).await,
        Strategy::LeakyBucket => leaky_bucket(rule, key, now, backend).await,
        Strategy::FixedWindow => fixed_window(rule, key, now, backend).await,
        Strategy::SlidingWindow => sliding_window_log(rule, key, now, backend).await,
    }
}

fn state_ttl(window_secs: f64, block_secs: f64) -> Duration {
    Duration::from_secs_f64(window_secs + block_secs + SAFETY_MARGIN_SECS)
}

async fn token_bucket(
    rule: &Rule,
    key: &str,
    now: f64,
    backend: &dyn Backend,
) -> BackendResult<StrategyOutcome> {
    let limit = rule.limit as f64;
    let window = rule.window.as_secs_f64();
    let burst = rule.burst as f64;
    let rate = limit / window;
    let ttl = state_ttl(window, rule.block_duration.as_secs_f64());

    loop {
        let current = backend.get(key).await?;
        let (tokens, last_refill) = current
            .as_deref()
            .and_then(decode_pair)
            .unwrap_or((burst, now));
        // Clamp backwards-moving clocks: never refill against a timestamp
        // later than `now`.
        let now = now.max(last_refill);
        let elapsed = now - last_refill;
        let refilled = (tokens + elapsed * rate).min(burst);

        let (allowed, new_tokens, retry_after) = if refilled >= 1.0 {
            (true, refilled - 1.0, 0u64)
        } else {
            let deficit = 1.0 - refilled;
            (false, refilled, ((deficit * window / limit).ceil().max(1.0)) as u64)
        };

        let new_bytes = encode_pair(new_tokens, now);
        if backend.compare_and_swap(key, current, new_bytes, ttl).await? {
            let remaining = new_tokens.floor().max(0.0) as u64;
            let reset_time = now + (burst - new_tokens) * window / limit;
            return Ok(StrategyOutcome {
                allowed,
                remaining,
                reset_time: reset_time as u64,
                retry_after,
            });
        }
        // Lost the CAS race to a concurrent caller; retry against fresh state.
    }
}

async fn leaky_bucket(
    rule: &Rule,
    key: &str,
    now: f64,
    backend: &dyn Backend,
) -> BackendResult<StrategyOutcome> {
    let capacity = rule.limit as f64;
    let window = rule.window.as_secs_f64();
    let drain_rate = capacity / window;
    let ttl = state_ttl(window, rule.block_duration.as_secs_f64());

    loop {
        let current = backend.get(key).await?;
        let (level, last_drain) = current
            .as_deref()
            .and_then(decode_pair)
            .unwrap_or((0.0, now));
        let now = now.max(last_drain);
        let drained = (now - last_drain) * drain_rate;
        let level = (level - drained).max(0.0);

        let (allowed, new_level, retry_after) = if level + 1.0 <= capacity {
            (true, level + 1.0, 0u64)
        } else {
            let overflow = level + 1.0 - capacity;
            (false, level, ((overflow * window / capacity).ceil().max(1.0)) as u64)
        };

        let new_bytes = encode_pair(new_level, now);
        if backend.compare_and_swap(key, current, new_bytes, ttl).await? {
            let remaining = (capacity - new_level).floor().max(0.0) as u64;
            let reset_time = now + new_level * window / capacity;
            return Ok(StrategyOutcome {
                allowed,
                remaining,
                reset_time: reset_time as u64,
                retry_after,
            });
        }
    }
}

async fn fixed_window(
    rule: &Rule,
    key: &str,
    now: f64,
    backend: &dyn Backend,
) -> BackendResult<StrategyOutcome> {
    let window = rule.window.as_secs_f64();
    let window_id = (now / window).floor() as u64;
    let windowed_key = format!("{key}:{window_id}");

    let new_count = backend
        .increment(&windowed_key, 1, Duration::from_secs_f64(window))
        .await?;
    let new_count = new_count.max(0) as u64;

    let allowed = new_count <= rule.limit;
    let remaining = rule.limit.saturating_sub(new_count);
    let reset_time = (window_id + 1) as f64 * window;
    let retry_after = if allowed {
        0
    } else {
        (reset_time - now).ceil().max(1.0) as u64
    };

    Ok(StrategyOutcome {
        allowed,
        remaining,
        reset_time: reset_time as u64,
        retry_after,
    })
}

async fn sliding_window_log(
    rule: &Rule,
    key: &str,
    now: f64,
    backend: &dyn Backend,
) -> BackendResult<StrategyOutcome> {
    let window = rule.window.as_secs_f64();
    let cutoff = now - window;

    backend.trim_before(key, cutoff).await?;
    let count = backend.count_after(key, cutoff).await?;

    if count < rule.limit {
        let ttl = Duration::from_secs_f64(window + SAFETY_MARGIN_SECS);
        backend.append_timestamp(key, now, ttl).await?;
        Ok(StrategyOutcome {
            allowed: true,
            remaining: rule.limit - count - 1,
            reset_time: (now + window) as u64,
            retry_after: 0,
        })
    } else {
        let oldest = backend.oldest_after(key, cutoff).await?.unwrap_or(now);
        let retry_after = ((oldest + window - now).ceil().max(1.0)) as u64;
        Ok(StrategyOutcome {
            allowed: false,
            remaining: 0,
            reset_time: (oldest + window) as u64,
            retry_after,
        })
    }
}
