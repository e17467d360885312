//! Named rules plus the resolver from `(identifier, rule, metadata)` to a
//! composite bucket key (`spec.md` §4.4).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::RateThrottleError;
use crate::rule::Rule;

/// `"rt:<rule.name>:<scope>:<scope_value>"` — the key strategies persist
/// bucket state under.
pub(crate) fn bucket_key(rule_name: &str, scope: &str, scope_value: &str) -> String {
    format!("rt:{rule_name}:{scope}:{scope_value}")
}

/// `"rt:block:<rule.name>:<identifier>"` — holds the absolute
/// `blocked_until` epoch-seconds timestamp once a rule escalates a
/// violation into a hold block.
pub(crate) fn block_key(rule_name: &str, identifier: &str) -> String {
    format!("rt:block:{rule_name}:{identifier}")
}

/// `"rt:violated:<rule.name>:<identifier>"` — dedup marker, TTL'd to the
/// rule's `block_duration`, ensuring a contiguous block interval is only
/// ever recorded as one violation.
pub(crate) fn violation_marker_key(rule_name: &str, identifier: &str) -> String {
    format!("rt:violated:{rule_name}:{identifier}")
}

/// `"rt:denied:<rule.name>:<identifier>"` — dedup marker for the deny-list
/// short-circuit, TTL'd to the remaining deny duration, so a sustained deny
/// (e.g. the traffic analyzer's auto-block) is only ever recorded as one
/// violation for its contiguous interval, mirroring `violation_marker_key`.
pub(crate) fn deny_marker_key(rule_name: &str, identifier: &str) -> String {
    format!("rt:denied:{rule_name}:{identifier}")
}

/// `RwLock<HashMap<...>>` per `spec.md` §5's many-readers/one-writer
/// guidance for shared resources; the same shape as the teacher's
/// `Arc<RateLimiterConfig>`/`CircuitBreakerConfig` shared state.
#[derive(Default)]
pub struct RuleRegistry {
    rules: RwLock<HashMap<String, Arc<Rule>>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `rule`, replacing any existing rule of the same name.
    /// Rules are validated by [`crate::rule::RuleBuilder::build`] before
    /// they ever reach here, so this cannot fail — it exists as a `Result`
    /// to leave room for a future uniqueness policy without breaking
    /// callers.
    pub fn add_rule(&self, rule: Rule) -> Result<(), RateThrottleError> {
        self.rules
            .write()
            .expect("rule registry lock poisoned")
            .insert(rule.name.clone(), Arc::new(rule));
        Ok(())
    }

    pub fn remove_rule(&self, name: &str) -> bool {
        self.rules
            .write()
            .expect("rule registry lock poisoned")
            .remove(name)
            .is_some()
    }

    pub fn get_rule(&self, name: &str) -> Option<Arc<Rule>> {
        self.rules
            .read()
            .expect("rule registry lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn list_rules(&self) -> Vec<Arc<Rule>> {
        self.rules
            .read()
            .expect("rule registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}
