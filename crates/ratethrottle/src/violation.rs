//! Recorded denials: the bounded ring buffer and the `ResilienceEvent` the
//! engine fans out to observers (`spec.md` §4.6).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use ratethrottle_core::events::{EventListener, EventListeners, FnListener, ResilienceEvent};

use crate::metadata::Metadata;

const DEFAULT_RING_CAPACITY: usize = 1_000;

/// What produced this violation. `Ddos` is the traffic analyzer's synthetic
/// escalation (`spec.md` §4.7); everything else comes from the engine's
/// `Check` path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    Strategy,
    Deny,
    Ddos,
}

/// A recorded denial event (`spec.md` §3). Carries a snapshot of the
/// metadata in effect at the time, passed through opaquely to observers.
#[derive(Debug, Clone)]
pub struct Violation {
    pub identifier: String,
    pub rule_name: String,
    /// Epoch-seconds the violation occurred at.
    pub timestamp: u64,
    pub observed_count: u64,
    pub limit: u64,
    pub scope: String,
    pub retry_after: u64,
    pub metadata: Metadata,
    pub kind: ViolationKind,
    recorded_at: Instant,
}

impl Violation {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        identifier: impl Into<String>,
        rule_name: impl Into<String>,
        observed_count: u64,
        limit: u64,
        scope: impl Into<String>,
        retry_after: u64,
        metadata: Metadata,
        kind: ViolationKind,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            rule_name: rule_name.into(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            observed_count,
            limit,
            scope: scope.into(),
            retry_after,
            metadata,
            kind,
            recorded_at: Instant::now(),
        }
    }
}

impl ResilienceEvent for Violation {
    fn event_type(&self) -> &'static str {
        match self.kind {
            ViolationKind::Strategy => "violation",
            ViolationKind::Deny => "deny",
            ViolationKind::Ddos => "ddos",
        }
    }

    fn timestamp(&self) -> Instant {
        self.recorded_at
    }

    fn pattern_name(&self) -> &str {
        &self.rule_name
    }
}

/// Bounded FIFO ring of recent violations, plus the observer fan-out, owned
/// jointly by the [`crate::engine::Engine`] and the
/// [`crate::analyzer::TrafficAnalyzer`] — a leaf component both reference,
/// avoiding the engine↔analyzer back-pointer `spec.md` §9 calls out.
///
/// Observers are copy-on-write: registration clones the current listener set,
/// appends to the clone, and swaps it in; the hot path (`record`) loads an
/// immutable snapshot and emits without ever taking a lock (`spec.md` §5,
/// §9). Grounded on the `ArcSwap`-guarded hot-path state used throughout the
/// hermes gateway's upstream cluster/load-balancer state.
pub struct ViolationLog {
    capacity: usize,
    ring: Mutex<VecDeque<Violation>>,
    observers: ArcSwap<EventListeners<Violation>>,
}

impl ViolationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ring: Mutex::new(VecDeque::new()),
            observers: ArcSwap::from_pointee(EventListeners::new()),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }

    /// Registers a plain closure as an observer.
    pub fn register_observer<F>(&self, f: F)
    where
        F: Fn(&Violation) + Send + Sync + 'static,
    {
        self.add_listener(FnListener::new(f));
    }

    pub fn register_listener<L>(&self, listener: L)
    where
        L: EventListener<Violation> + 'static,
    {
        self.add_listener(listener);
    }

    fn add_listener<L>(&self, listener: L)
    where
        L: EventListener<Violation> + 'static,
    {
        let mut next = (**self.observers.load()).clone();
        next.add(listener);
        self.observers.store(Arc::new(next));
    }

    /// Appends `violation` to the ring (evicting the oldest entry once over
    /// capacity) and notifies every observer exactly once, with panics
    /// isolated per listener. Loads the current observer snapshot with a
    /// single atomic load — no lock is held while observers run.
    pub fn record(&self, violation: Violation) {
        {
            let mut ring = self.ring.lock().expect("violation ring lock poisoned");
            if ring.len() >= self.capacity {
                ring.pop_front();
            }
            ring.push_back(violation.clone());
        }
        self.observers.load().emit(&violation);
    }

    pub fn recent(&self) -> Vec<Violation> {
        self.ring
            .lock()
            .expect("violation ring lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().expect("violation ring lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.ring.lock().expect("violation ring lock poisoned").clear();
    }
}
