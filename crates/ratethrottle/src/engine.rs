//! Orchestrates access-control gate → block-state gate → strategy
//! evaluation → bookkeeping behind the single [`Engine::check`] operation
//! (`spec.md` §4.5).

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ratethrottle_core::events::EventListener;

use crate::access::{AccessControl, InProcessAccessControl};
use crate::analyzer::{AnalyzerConfig, TrafficAnalyzer, TrafficPattern};
use crate::backend::Backend;
use crate::error::RateThrottleError;
use crate::metadata::Metadata;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::registry::{self, RuleRegistry};
use crate::rule::Rule;
use crate::strategies;
use crate::verdict::Verdict;
use crate::violation::{Violation, ViolationKind, ViolationLog};

/// How `Check` behaves when the backend is unavailable (`spec.md` §4.1,
/// §7). Default is fail-open with a `backend_errors` metric increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPolicy {
    FailOpen,
    FailClosed,
}

impl Default for FailPolicy {
    fn default() -> Self {
        FailPolicy::FailOpen
    }
}

/// Construction-time configuration for an [`Engine`].
pub struct EngineConfig {
    pub fail_policy: FailPolicy,
    pub violation_capacity: usize,
    pub analyzer: AnalyzerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fail_policy: FailPolicy::FailOpen,
            violation_capacity: 1_000,
            analyzer: AnalyzerConfig::default(),
        }
    }
}

pub(crate) fn now_secs_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// The engine: rule registry, access control, backend, violation/metrics
/// accounting, and the traffic analyzer, wired together behind `Check`.
///
/// Every component here is owned, not a singleton (`spec.md` §9) — callers
/// that want one construct an `Engine` once at startup and share it (e.g.
/// behind an `Arc`).
pub struct Engine {
    backend: Arc<dyn Backend>,
    access: Arc<dyn AccessControl>,
    registry: RuleRegistry,
    metrics: Metrics,
    violations: Arc<ViolationLog>,
    analyzer: Arc<TrafficAnalyzer>,
    fail_policy: FailPolicy,
}

impl Engine {
    /// Builds an engine over `backend` with an in-process access-control
    /// store. Use [`Engine::with_access`] to share allow/deny state across
    /// instances via the backend instead.
    pub fn new(backend: Arc<dyn Backend>, config: EngineConfig) -> Self {
        Self::with_access(backend, Arc::new(InProcessAccessControl::new()), config)
    }

    pub fn with_access(
        backend: Arc<dyn Backend>,
        access: Arc<dyn AccessControl>,
        config: EngineConfig,
    ) -> Self {
        let violations = Arc::new(ViolationLog::new(config.violation_capacity));
        let analyzer = TrafficAnalyzer::new(config.analyzer, Arc::clone(&access), Arc::clone(&violations));

        Self {
            backend,
            access,
            registry: RuleRegistry::new(),
            metrics: Metrics::new(),
            violations,
            analyzer,
            fail_policy: config.fail_policy,
        }
    }

    // ---- Rule administration (`spec.md` §6) ----

    pub fn add_rule(&self, rule: Rule) -> Result<(), RateThrottleError> {
        self.registry.add_rule(rule)
    }

    pub fn remove_rule(&self, name: &str) -> bool {
        self.registry.remove_rule(name)
    }

    pub fn get_rule(&self, name: &str) -> Option<Arc<Rule>> {
        self.registry.get_rule(name)
    }

    pub fn list_rules(&self) -> Vec<Arc<Rule>> {
        self.registry.list_rules()
    }

    // ---- Access control administration ----

    pub async fn add_allow(&self, identifier: &str) -> Result<(), RateThrottleError> {
        self.access.add_allow(identifier).await.map_err(backend_err)
    }

    pub async fn remove_allow(&self, identifier: &str) -> Result<(), RateThrottleError> {
        self.access.remove_allow(identifier).await.map_err(backend_err)
    }

    pub async fn is_allowed(&self, identifier: &str) -> Result<bool, RateThrottleError> {
        self.access.is_allowed(identifier).await.map_err(backend_err)
    }

    pub async fn add_deny(&self, identifier: &str, ttl: Duration) -> Result<(), RateThrottleError> {
        self.access.add_deny(identifier, ttl).await.map_err(backend_err)
    }

    pub async fn remove_deny(&self, identifier: &str) -> Result<(), RateThrottleError> {
        self.access.remove_deny(identifier).await.map_err(backend_err)
    }

    pub async fn is_denied(&self, identifier: &str) -> Result<(bool, Option<u64>), RateThrottleError> {
        self.access.is_denied(identifier).await.map_err(backend_err)
    }

    // ---- Observability ----

    pub fn register_observer<F>(&self, f: F)
    where
        F: Fn(&Violation) + Send + Sync + 'static,
    {
        self.violations.register_observer(f);
    }

    pub fn register_listener<L>(&self, listener: L)
    where
        L: EventListener<Violation> + 'static,
    {
        self.violations.register_listener(listener);
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
        self.violations.clear();
    }

    pub fn recent_violations(&self) -> Vec<Violation> {
        self.violations.recent()
    }

    /// Forces a synchronous traffic-analyzer pass, bypassing the async tally
    /// queue — the "synchronous option for tests" `spec.md` §9 calls for.
    pub async fn analyze(&self, identifier: &str, endpoint: Option<String>) -> TrafficPattern {
        self.analyzer.analyze_now(identifier, endpoint, now_secs_f64()).await
    }

    // ---- The hot path ----

    /// Evaluates `rule_name` for `identifier`, consulting access control,
    /// any active block, and finally the rule's strategy, in that order
    /// (`spec.md` §4.5 steps 1-10).
    pub async fn check(
        &self,
        identifier: &str,
        rule_name: &str,
        metadata: Option<Metadata>,
    ) -> Result<Verdict, RateThrottleError> {
        let rule = self
            .registry
            .get_rule(rule_name)
            .ok_or_else(|| RateThrottleError::RuleNotFound {
                name: rule_name.to_string(),
            })?;

        let now = now_secs_f64();
        let window_secs = rule.window.as_secs_f64();

        // Step 2: condition predicate bypass.
        if let Some(condition) = &rule.condition {
            if !condition(identifier, metadata.as_ref()) {
                return Ok(Verdict::bypass(rule.limit, (now + window_secs) as u64));
            }
        }

        // Step 3: allow-list bypass.
        match self.access.is_allowed(identifier).await {
            Ok(true) => return Ok(Verdict::bypass(rule.limit, (now + window_secs) as u64)),
            Ok(false) => {}
            Err(_) => {
                self.metrics.record_backend_error();
                return Ok(self.fail_policy_verdict(&rule, now));
            }
        }

        // Step 4: deny-list short-circuit.
        match self.access.is_denied(identifier).await {
            Ok((true, expiry)) => {
                let expiry = expiry.unwrap_or((now as u64) + 1);
                let retry_after = expiry.saturating_sub(now as u64).max(1);
                let verdict = Verdict {
                    allowed: false,
                    remaining: 0,
                    limit: rule.limit,
                    reset_time: expiry,
                    retry_after,
                    blocked: true,
                };
                self.metrics.record_blocked();

                // Dedup against the same contiguous deny interval, the way
                // step 7's `rt:violated:*` marker does for strategy
                // escalation — otherwise sustained traffic against an active
                // deny entry floods observers with one violation per call.
                let marker_key = registry::deny_marker_key(&rule.name, identifier);
                let already_marked = self.backend.exists(&marker_key).await.unwrap_or(false);
                if !already_marked {
                    let marker_ttl = Duration::from_secs(retry_after.max(1));
                    let _ = self.backend.set(&marker_key, vec![1], marker_ttl).await;
                    self.metrics.record_violation();
                    self.violations.record(Violation::new(
                        identifier,
                        &rule.name,
                        rule.limit + 1,
                        rule.limit,
                        rule.scope.as_str(),
                        retry_after,
                        metadata.clone().unwrap_or_default(),
                        ViolationKind::Deny,
                    ));
                }
                self.trigger_analyzer(identifier, &metadata);
                return Ok(verdict);
            }
            Ok((false, _)) => {}
            Err(_) => {
                self.metrics.record_backend_error();
                return Ok(self.fail_policy_verdict(&rule, now));
            }
        }

        // Step 5: existing hold-block gate.
        let block_key = registry::block_key(&rule.name, identifier);
        match self.backend.get(&block_key).await {
            Ok(Some(bytes)) if bytes.len() == 8 => {
                let blocked_until = u64::from_le_bytes(bytes.try_into().unwrap());
                if (blocked_until as f64) > now {
                    let retry_after = (blocked_until as f64 - now).ceil().max(1.0) as u64;
                    let verdict = Verdict {
                        allowed: false,
                        remaining: 0,
                        limit: rule.limit,
                        reset_time: blocked_until,
                        retry_after,
                        blocked: true,
                    };
                    self.metrics.record_blocked();
                    self.trigger_analyzer(identifier, &metadata);
                    return Ok(verdict);
                }
            }
            Ok(_) => {}
            Err(_) => {
                self.metrics.record_backend_error();
                return Ok(self.fail_policy_verdict(&rule, now));
            }
        }

        // Step 6: strategy dispatch.
        let scope_value = rule.scope.resolve(identifier, metadata.as_ref())?;
        let bucket_key = registry::bucket_key(&rule.name, rule.scope.as_str(), scope_value);
        let outcome = match strategies::evaluate(&rule, &bucket_key, now, self.backend.as_ref()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.metrics.record_backend_error();
                return Ok(self.fail_policy_verdict(&rule, now));
            }
        };

        let verdict = if outcome.allowed {
            self.metrics.record_allowed();
            Verdict {
                allowed: true,
                remaining: outcome.remaining,
                limit: rule.limit,
                reset_time: outcome.reset_time,
                retry_after: 0,
                blocked: false,
            }
        } else {
            // Step 7: escalate into a hold block on first denial, if configured.
            let blocked = if rule.block_duration > Duration::ZERO {
                let marker_key = registry::violation_marker_key(&rule.name, identifier);
                let already_marked = self.backend.exists(&marker_key).await.unwrap_or(false);
                if !already_marked {
                    let blocked_until = now + rule.block_duration.as_secs_f64();
                    let _ = self
                        .backend
                        .set(&block_key, blocked_until.to_le_bytes().to_vec(), rule.block_duration)
                        .await;
                    let _ = self
                        .backend
                        .set(&marker_key, vec![1], rule.block_duration)
                        .await;
                    self.metrics.record_violation();
                    self.violations.record(Violation::new(
                        identifier,
                        &rule.name,
                        rule.limit + 1,
                        rule.limit,
                        rule.scope.as_str(),
                        rule.block_duration.as_secs(),
                        metadata.clone().unwrap_or_default(),
                        ViolationKind::Strategy,
                    ));
                }
                true
            } else {
                false
            };

            self.metrics.record_blocked();
            let retry_after = if blocked {
                rule.block_duration.as_secs().max(outcome.retry_after)
            } else {
                outcome.retry_after
            };
            Verdict {
                allowed: false,
                remaining: outcome.remaining,
                limit: rule.limit,
                reset_time: outcome.reset_time,
                retry_after,
                blocked,
            }
        };

        // Step 9: kick the traffic analyzer asynchronously; it may issue its
        // own `AddDeny` that a later `Check` observes via the block gate.
        self.trigger_analyzer(identifier, &metadata);

        #[cfg(feature = "tracing")]
        tracing::trace!(rule = %rule.name, allowed = verdict.allowed, blocked = verdict.blocked, "rate throttle check");
        #[cfg(feature = "metrics")]
        metrics::counter!(
            "ratethrottle_checks_total",
            "rule" => rule.name.clone(),
            "outcome" => if verdict.allowed { "allowed" } else { "denied" }
        )
        .increment(1);

        Ok(verdict)
    }

    fn trigger_analyzer(&self, identifier: &str, metadata: &Option<Metadata>) {
        let endpoint = metadata.as_ref().and_then(|m| m.endpoint.clone());
        self.analyzer.record(identifier, endpoint, now_secs_f64());
    }

    fn fail_policy_verdict(&self, rule: &Rule, now: f64) -> Verdict {
        #[cfg(feature = "tracing")]
        tracing::warn!(rule = %rule.name, policy = ?self.fail_policy, "backend unavailable, applying fail policy");
        match self.fail_policy {
            FailPolicy::FailOpen => Verdict {
                allowed: true,
                remaining: rule.limit,
                limit: rule.limit,
                reset_time: (now + rule.window.as_secs_f64()) as u64,
                retry_after: 0,
                blocked: false,
            },
            FailPolicy::FailClosed => Verdict {
                allowed: false,
                remaining: 0,
                limit: rule.limit,
                reset_time: now as u64,
                retry_after: 1,
                blocked: false,
            },
        }
    }
}

fn backend_err(err: crate::backend::BackendError) -> RateThrottleError {
    RateThrottleError::BackendUnavailable {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::rule::{Rule, Scope, Strategy};

    fn engine() -> Engine {
        Engine::new(MemoryBackend::new(), EngineConfig::default())
    }

    #[tokio::test]
    async fn unknown_rule_errors() {
        let engine = engine();
        let err = engine.check("id", "missing", None).await.unwrap_err();
        assert!(matches!(err, RateThrottleError::RuleNotFound { .. }));
    }

    #[tokio::test]
    async fn allow_list_bypasses_accounting() {
        let engine = engine();
        engine
            .add_rule(Rule::builder("r", 1, Duration::from_secs(10)).build().unwrap())
            .unwrap();
        engine.add_allow("vip").await.unwrap();

        for _ in 0..5 {
            let verdict = engine.check("vip", "r", None).await.unwrap();
            assert!(verdict.allowed);
            assert!(!verdict.blocked);
        }
        assert_eq!(engine.metrics().total_violations, 0);
    }

    #[tokio::test]
    async fn deny_list_short_circuits() {
        let engine = engine();
        engine
            .add_rule(Rule::builder("r", 10, Duration::from_secs(10)).build().unwrap())
            .unwrap();
        engine.add_deny("mallory", Duration::from_secs(60)).await.unwrap();

        let verdict = engine.check("mallory", "r", None).await.unwrap();
        assert!(!verdict.allowed);
        assert!(verdict.blocked);
        assert!(verdict.retry_after >= 1);
    }

    #[tokio::test]
    async fn allow_wins_over_deny() {
        let engine = engine();
        engine
            .add_rule(Rule::builder("r", 10, Duration::from_secs(10)).build().unwrap())
            .unwrap();
        engine.add_allow("x").await.unwrap();
        engine.add_deny("x", Duration::from_secs(60)).await.unwrap();

        let verdict = engine.check("x", "r", None).await.unwrap();
        assert!(verdict.allowed);
        assert!(!verdict.blocked);
    }

    #[tokio::test]
    async fn block_duration_holds_until_expiry() {
        let engine = engine();
        engine
            .add_rule(
                Rule::builder("r", 2, Duration::from_secs(10))
                    .strategy(Strategy::FixedWindow)
                    .scope(Scope::Ip)
                    .block_duration(Duration::from_secs(60))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        assert!(engine.check("a", "r", None).await.unwrap().allowed);
        assert!(engine.check("a", "r", None).await.unwrap().allowed);
        let third = engine.check("a", "r", None).await.unwrap();
        assert!(!third.allowed);
        assert!(third.blocked);

        // Still blocked on the very next call, regardless of strategy state.
        let fourth = engine.check("a", "r", None).await.unwrap();
        assert!(!fourth.allowed);
        assert!(fourth.blocked);

        assert_eq!(engine.metrics().total_violations, 1);
    }

    #[tokio::test]
    async fn missing_scope_data_errors() {
        let engine = engine();
        engine
            .add_rule(
                Rule::builder("r", 10, Duration::from_secs(10))
                    .scope(Scope::Endpoint)
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let err = engine.check("id", "r", None).await.unwrap_err();
        assert!(matches!(err, RateThrottleError::MissingScopeData { .. }));
    }

    #[tokio::test]
    async fn condition_false_bypasses_without_accounting() {
        let engine = engine();
        engine
            .add_rule(
                Rule::builder("r", 1, Duration::from_secs(10))
                    .condition(|_id, meta| meta.and_then(|m| m.method.as_deref()) != Some("GET"))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let meta = Metadata::new().with_method("GET");
        let verdict = engine.check("id", "r", Some(meta)).await.unwrap();
        assert!(verdict.allowed);
        assert_eq!(engine.metrics().total_requests, 0);
    }
}
