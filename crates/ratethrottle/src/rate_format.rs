//! The human-facing `"<N>/<unit>"` shorthand (`spec.md` §6). Consumed by
//! adapters, produced nowhere by the core itself — kept here purely so
//! adapters share one parser/formatter pair instead of reinventing it.

use std::time::Duration;

use crate::error::RateThrottleError;

/// Parses `"<N>/<unit>"` (`unit` ∈ `second`/`minute`/`hour`/`day`,
/// case-insensitive, whitespace stripped) into `(limit, window)`.
pub fn parse_rate(input: &str) -> Result<(u64, Duration), RateThrottleError> {
    let stripped: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let invalid = || RateThrottleError::InvalidRate {
        input: input.to_string(),
    };

    let (count_str, unit_str) = stripped.split_once('/').ok_or_else(invalid)?;
    let count: u64 = count_str.parse().map_err(|_| invalid())?;
    if count == 0 {
        return Err(invalid());
    }

    let window_secs = match unit_str.to_ascii_lowercase().as_str() {
        "second" | "seconds" | "sec" | "secs" | "s" => 1,
        "minute" | "minutes" | "min" | "mins" | "m" => 60,
        "hour" | "hours" | "hr" | "hrs" | "h" => 3_600,
        "day" | "days" | "d" => 86_400,
        _ => return Err(invalid()),
    };

    Ok((count, Duration::from_secs(window_secs)))
}

/// The canonical unit name for a window length, used by [`format_rate`].
fn canonical_unit(window: Duration) -> (&'static str, u64) {
    let secs = window.as_secs();
    if secs != 0 && secs % 86_400 == 0 {
        ("day", 86_400)
    } else if secs != 0 && secs % 3_600 == 0 {
        ("hour", 3_600)
    } else if secs != 0 && secs % 60 == 0 {
        ("minute", 60)
    } else {
        ("second", 1)
    }
}

/// Formats `(limit, window)` back into the canonical `"<N>/<unit>"` form —
/// always the largest whole unit the window divides evenly into, so
/// `parse_rate(format_rate(n, w))` round-trips to the same canonical string
/// (`spec.md` §8, property 10).
pub fn format_rate(limit: u64, window: Duration) -> String {
    let secs = window.as_secs().max(1);
    let (unit, unit_secs) = canonical_unit(Duration::from_secs(secs));
    let per_unit = limit * unit_secs / secs.max(1);
    // When the window isn't a whole multiple of any named unit, fall back
    // to expressing it per-second rather than losing precision.
    if unit_secs == 1 || secs % unit_secs == 0 {
        format!("{per_unit}/{unit}")
    } else {
        format!("{limit}/second")
    }
}
