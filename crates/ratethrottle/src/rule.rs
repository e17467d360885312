//! Rules: named admission policies registered with a [`crate::registry::RuleRegistry`].

use std::sync::Arc;
use std::time::Duration;

use crate::error::RateThrottleError;
use crate::metadata::Metadata;

/// One of the four admission-decision algorithms a [`Rule`] can dispatch to.
///
/// Dispatch over this type is a closed `match`, never a string lookup — see
/// [`crate::strategies::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    TokenBucket,
    LeakyBucket,
    FixedWindow,
    SlidingWindow,
}

/// The dimension a rule's counts are aggregated along.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Ip,
    User,
    Endpoint,
    Global,
    Custom,
}

impl Scope {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Scope::Ip => "ip",
            Scope::User => "user",
            Scope::Endpoint => "endpoint",
            Scope::Global => "global",
            Scope::Custom => "custom",
        }
    }

    /// Resolves `(identifier, metadata)` to the scope-value component of a
    /// bucket key.
    pub(crate) fn resolve<'a>(
        &self,
        identifier: &'a str,
        metadata: Option<&'a Metadata>,
    ) -> Result<&'a str, RateThrottleError> {
        match self {
            Scope::Ip | Scope::User | Scope::Custom => Ok(identifier),
            Scope::Global => Ok("*"),
            Scope::Endpoint => metadata
                .and_then(|m| m.endpoint.as_deref())
                .ok_or_else(|| RateThrottleError::MissingScopeData {
                    scope: self.as_str().to_string(),
                }),
        }
    }
}

/// A condition predicate evaluated before accounting; returning `false`
/// bypasses the rule entirely (the request is allowed, nothing is counted).
pub type Condition = Arc<dyn Fn(&str, Option<&Metadata>) -> bool + Send + Sync>;

/// A named admission policy: limit, window, strategy, scope, and optional
/// block duration. Rules are immutable once registered.
#[derive(Clone)]
pub struct Rule {
    pub name: String,
    pub limit: u64,
    pub window: Duration,
    pub strategy: Strategy,
    pub scope: Scope,
    /// Token-bucket burst capacity. Defaults to `limit` when unset.
    pub burst: u64,
    /// Duration a violation is escalated into a hold block for. Zero means
    /// strategy denials never escalate past `DENY_TRANSIENT`.
    pub block_duration: Duration,
    pub condition: Option<Condition>,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("limit", &self.limit)
            .field("window", &self.window)
            .field("strategy", &self.strategy)
            .field("scope", &self.scope)
            .field("burst", &self.burst)
            .field("block_duration", &self.block_duration)
            .field("condition", &self.condition.is_some())
            .finish()
    }
}

impl Rule {
    /// Starts building a rule named `name` with the given `limit` and
    /// `window`. `burst` defaults to `limit`, `block_duration` to zero,
    /// `scope` to [`Scope::Ip`], `strategy` to [`Strategy::TokenBucket`].
    pub fn builder(name: impl Into<String>, limit: u64, window: Duration) -> RuleBuilder {
        RuleBuilder::new(name, limit, window)
    }
}

/// Builder for [`Rule`], following the same chained-setter-plus-`build()`
/// pattern used throughout this workspace's configuration types.
pub struct RuleBuilder {
    name: String,
    limit: u64,
    window: Duration,
    strategy: Strategy,
    scope: Scope,
    burst: Option<u64>,
    block_duration: Duration,
    condition: Option<Condition>,
}

impl RuleBuilder {
    fn new(name: impl Into<String>, limit: u64, window: Duration) -> Self {
        Self {
            name: name.into(),
            limit,
            window,
            strategy: Strategy::TokenBucket,
            scope: Scope::Ip,
            burst: None,
            block_duration: Duration::ZERO,
            condition: None,
        }
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Token-bucket burst capacity. Ignored by other strategies.
    pub fn burst(mut self, burst: u64) -> Self {
        self.burst = Some(burst);
        self
    }

    pub fn block_duration(mut self, duration: Duration) -> Self {
        self.block_duration = duration;
        self
    }

    pub fn condition<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str, Option<&Metadata>) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(predicate));
        self
    }

    /// Validates and constructs the [`Rule`].
    ///
    /// # Errors
    /// Returns [`RateThrottleError::InvalidRule`] if `limit == 0`,
    /// `window == 0`, or an explicit `burst < limit`.
    pub fn build(self) -> Result<Rule, RateThrottleError> {
        if self.limit == 0 {
            return Err(RateThrottleError::InvalidRule {
                reason: "limit must be greater than zero".to_string(),
            });
        }
        if self.window.is_zero() {
            return Err(RateThrottleError::InvalidRule {
                reason: "window must be greater than zero".to_string(),
            });
        }
        let burst = self.burst.unwrap_or(self.limit);
        if burst < self.limit {
            return Err(RateThrottleError::InvalidRule {
                reason: "burst must be >= limit".to_string(),
            });
        }
        Ok(Rule {
            name: self.name,
            limit: self.limit,
            window: self.window,
            strategy: self.strategy,
            scope: self.scope,
            burst,
            block_duration: self.block_duration,
            condition: self.condition,
        })
    }
}
