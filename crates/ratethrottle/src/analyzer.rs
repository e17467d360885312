//! Per-identifier traffic-shape analysis that promotes sustained abuse into
//! temporary blocks (`spec.md` §4.7).
//!
//! Request tallies are pushed through a bounded `mpsc` channel into a
//! detached task that owns the rolling-window state, rather than every
//! `Check` call taking a lock on analyzer state directly — grounded on the
//! tally-loop shape in the sui-core traffic controller
//! (`TrafficController::spawn`/`run_tally_loop`). [`TrafficAnalyzer::record`]
//! is the asynchronous entry point `spec.md` §9 recommends for the hot
//! path; [`TrafficAnalyzer::analyze_now`] is the synchronous path used by
//! tests and by [`crate::engine::Engine::analyze`]'s forced pass.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::access::AccessControl;
use crate::metadata::Metadata;
use crate::violation::{Violation, ViolationKind};

/// Bound on buffered tallies per channel; a full channel means `record`
/// silently drops the tally rather than applying backpressure to `Check`
/// (the analyzer's output is strictly additive, so a dropped sample is lossy
/// but never unsound).
const CHANNEL_CAPACITY: usize = 4_096;
/// Per-identifier cap on buffered `(ts, endpoint)` samples (`spec.md` §4.7).
const MAX_SAMPLES_PER_IDENTIFIER: usize = 10_000;

/// Tunables for the suspicion-score fusion. Defaults match `spec.md` §4.7
/// exactly; `spec.md` §9 leaves the weights as an Open Question resolved by
/// exposing them here as configuration (see `DESIGN.md`).
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Rolling window length, `W_a`.
    pub window: Duration,
    /// Sub-window length `burst_count` is measured over.
    pub burst_window: Duration,
    /// Request-count threshold; triggers when `count > threshold` over
    /// `window` (equivalently, rate exceeds `threshold / window`).
    pub threshold: u64,
    pub max_unique_endpoints: u64,
    pub burst_threshold: u64,
    /// Bot-regularity threshold, seconds.
    pub min_interval_threshold: f64,
    pub suspicious_threshold: f64,
    pub auto_block: bool,
    pub block_duration: Duration,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            burst_window: Duration::from_secs(10),
            threshold: 100,
            max_unique_endpoints: 20,
            burst_threshold: 30,
            min_interval_threshold: 0.05,
            suspicious_threshold: 0.5,
            auto_block: true,
            block_duration: Duration::from_secs(300),
        }
    }
}

/// Recomputed on each analyzer pass over the rolling window (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrafficPattern {
    pub request_rate: f64,
    pub unique_endpoints: u64,
    pub min_interarrival: Option<f64>,
    pub burst_count: u64,
    pub suspicion_score: f64,
    pub is_suspicious: bool,
}

impl TrafficPattern {
    fn empty() -> Self {
        Self {
            request_rate: 0.0,
            unique_endpoints: 0,
            min_interarrival: None,
            burst_count: 0,
            suspicion_score: 0.0,
            is_suspicious: false,
        }
    }
}

struct Sample {
    ts: f64,
    endpoint: Option<String>,
}

struct TallyMsg {
    identifier: String,
    endpoint: Option<String>,
    ts: f64,
}

fn window_stats(samples: &VecDeque<Sample>, config: &AnalyzerConfig) -> TrafficPattern {
    if samples.is_empty() {
        return TrafficPattern::empty();
    }

    let window_secs = config.window.as_secs_f64().max(f64::EPSILON);
    let count = samples.len() as u64;
    let request_rate = count as f64 / window_secs;

    let unique_endpoints = samples
        .iter()
        .filter_map(|s| s.endpoint.as_deref())
        .collect::<HashSet<_>>()
        .len() as u64;

    let min_interarrival = samples
        .iter()
        .zip(samples.iter().skip(1))
        .map(|(a, b)| b.ts - a.ts)
        .fold(None, |min, gap| match min {
            None => Some(gap),
            Some(m) if gap < m => Some(gap),
            m => m,
        });

    let burst_secs = config.burst_window.as_secs_f64().max(f64::EPSILON);
    let latest_ts = samples.back().map(|s| s.ts).unwrap_or(0.0);
    let burst_count = max_count_in_any_subwindow(samples, burst_secs, latest_ts);

    let mut score = 0.0;
    if count > config.threshold {
        score += 0.35;
    }
    if unique_endpoints > config.max_unique_endpoints {
        score += 0.25;
    }
    if burst_count > config.burst_threshold {
        score += 0.20;
    }
    if let Some(gap) = min_interarrival {
        if gap < config.min_interval_threshold {
            score += 0.20;
        }
    }
    let score = score.min(1.0);

    TrafficPattern {
        request_rate,
        unique_endpoints,
        min_interarrival,
        burst_count,
        suspicion_score: score,
        is_suspicious: score >= config.suspicious_threshold,
    }
}

/// Densest count of samples within any `burst_secs`-wide sub-window ending
/// at or before `end_ts`. Sliding-window-maximum over a sorted timestamp
/// list, computed in O(n) with a two-pointer scan.
fn max_count_in_any_subwindow(samples: &VecDeque<Sample>, burst_secs: f64, end_ts: f64) -> u64 {
    let _ = end_ts;
    let mut max_count = 0u64;
    let mut start = 0usize;
    for end in 0..samples.len() {
        while samples[end].ts - samples[start].ts > burst_secs {
            start += 1;
        }
        max_count = max_count.max((end - start + 1) as u64);
    }
    max_count
}

struct AnalyzerState {
    per_identifier: HashMap<String, VecDeque<Sample>>,
}

impl AnalyzerState {
    fn new() -> Self {
        Self {
            per_identifier: HashMap::new(),
        }
    }

    fn record(&mut self, identifier: &str, endpoint: Option<String>, ts: f64, window: Duration) {
        let samples = self.per_identifier.entry(identifier.to_string()).or_default();
        samples.push_back(Sample { ts, endpoint });
        if samples.len() > MAX_SAMPLES_PER_IDENTIFIER {
            samples.pop_front();
        }
        let cutoff = ts - window.as_secs_f64();
        while samples.front().is_some_and(|s| s.ts < cutoff) {
            samples.pop_front();
        }
    }

    fn analyze(&self, identifier: &str, config: &AnalyzerConfig) -> TrafficPattern {
        match self.per_identifier.get(identifier) {
            Some(samples) => window_stats(samples, config),
            None => TrafficPattern::empty(),
        }
    }
}

/// Owns the rolling per-identifier windows and drives auto-block decisions.
/// A leaf component shared by reference with the engine, never holding a
/// back-pointer to it (`spec.md` §9).
pub struct TrafficAnalyzer {
    config: AnalyzerConfig,
    state: Arc<Mutex<AnalyzerState>>,
    access: Arc<dyn AccessControl>,
    violations: Arc<crate::violation::ViolationLog>,
    sender: mpsc::Sender<TallyMsg>,
}

impl TrafficAnalyzer {
    pub fn new(
        config: AnalyzerConfig,
        access: Arc<dyn AccessControl>,
        violations: Arc<crate::violation::ViolationLog>,
    ) -> Arc<Self> {
        let (sender, mut receiver) = mpsc::channel::<TallyMsg>(CHANNEL_CAPACITY);
        let state = Arc::new(Mutex::new(AnalyzerState::new()));

        let analyzer = Arc::new(Self {
            config,
            state,
            access,
            violations,
            sender,
        });

        let task_analyzer = Arc::clone(&analyzer);
        tokio::spawn(async move {
            while let Some(msg) = receiver.recv().await {
                task_analyzer.apply_tally(&msg.identifier, msg.endpoint, msg.ts).await;
            }
        });

        analyzer
    }

    /// Asynchronous entry point for the engine's hot path: enqueues the
    /// tally and returns immediately without waiting for the background
    /// task to process it. Cancel-safe — if the receiving task is ever
    /// dropped, no invariant is violated; the identifier simply stops
    /// accumulating samples.
    pub fn record(&self, identifier: &str, endpoint: Option<String>, now: f64) {
        let _ = self.sender.try_send(TallyMsg {
            identifier: identifier.to_string(),
            endpoint,
            ts: now,
        });
    }

    /// Synchronous pass: records the sample and evaluates suspicion
    /// in-line, without going through the channel. Used by
    /// [`crate::engine::Engine::analyze`] and by tests that need a
    /// deterministic read of the resulting pattern.
    pub async fn analyze_now(
        &self,
        identifier: &str,
        endpoint: Option<String>,
        now: f64,
    ) -> TrafficPattern {
        self.apply_tally(identifier, endpoint, now).await
    }

    async fn apply_tally(&self, identifier: &str, endpoint: Option<String>, now: f64) -> TrafficPattern {
        let pattern = {
            let mut state = self.state.lock().expect("analyzer state lock poisoned");
            state.record(identifier, endpoint, now, self.config.window);
            state.analyze(identifier, &self.config)
        };

        if pattern.is_suspicious && self.config.auto_block {
            let _ = self
                .access
                .add_deny(identifier, self.config.block_duration)
                .await;
            self.violations.record(Violation::new(
                identifier,
                "traffic-analyzer",
                pattern.unique_endpoints.max(1),
                self.config.threshold,
                "global",
                self.config.block_duration.as_secs(),
                Metadata::default(),
                ViolationKind::Ddos,
            ));
        }

        pattern
    }

    pub fn statistics(&self, identifier: &str) -> TrafficPattern {
        let state = self.state.lock().expect("analyzer state lock poisoned");
        state.analyze(identifier, &self.config)
    }

    pub async fn is_blocked(&self, identifier: &str) -> bool {
        self.access.is_denied(identifier).await.map(|(d, _)| d).unwrap_or(false)
    }

    pub async fn unblock(&self, identifier: &str) {
        let _ = self.access.remove_deny(identifier).await;
    }

    pub async fn block(&self, identifier: &str, duration: Duration) {
        let _ = self.access.add_deny(identifier, duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::InProcessAccessControl;
    use crate::violation::ViolationLog;

    fn analyzer(config: AnalyzerConfig) -> Arc<TrafficAnalyzer> {
        let access: Arc<dyn AccessControl> = Arc::new(InProcessAccessControl::new());
        let violations = Arc::new(ViolationLog::with_default_capacity());
        TrafficAnalyzer::new(config, access, violations)
    }

    #[tokio::test]
    async fn ddos_escalation_auto_blocks() {
        let config = AnalyzerConfig {
            window: Duration::from_secs(10),
            threshold: 100,
            max_unique_endpoints: 1_000,
            burst_threshold: 1_000,
            auto_block: true,
            block_duration: Duration::from_secs(300),
            ..AnalyzerConfig::default()
        };
        let analyzer = analyzer(config);

        let mut last = TrafficPattern::empty();
        for i in 0..150 {
            let endpoint = format!("/ep{}", i % 80);
            last = analyzer
                .analyze_now("attacker", Some(endpoint), i as f64 * 0.001)
                .await;
        }

        assert!(last.is_suspicious);
        assert!(analyzer.is_blocked("attacker").await);
    }

    #[tokio::test]
    async fn low_volume_traffic_is_not_suspicious() {
        let analyzer = analyzer(AnalyzerConfig::default());
        let pattern = analyzer.analyze_now("normal-user", Some("/home".to_string()), 0.0).await;
        assert!(!pattern.is_suspicious);
        assert!(!analyzer.is_blocked("normal-user").await);
    }

    #[tokio::test]
    async fn manual_block_and_unblock() {
        let analyzer = analyzer(AnalyzerConfig::default());
        analyzer.block("manual", Duration::from_secs(60)).await;
        assert!(analyzer.is_blocked("manual").await);
        analyzer.unblock("manual").await;
        assert!(!analyzer.is_blocked("manual").await);
    }
}
