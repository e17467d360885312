use std::sync::Arc;
use std::time::Duration;

use ratethrottle::backend::MemoryBackend;
use ratethrottle::{Engine, EngineConfig, Rule, Strategy};

use super::ConcurrencyTracker;

/// 2,000 concurrent callers racing a single fixed-window bucket must never
/// admit more than the configured limit, no matter how the CAS/increment
/// retries interleave.
#[tokio::test]
#[ignore]
async fn high_concurrency_never_exceeds_the_limit() {
    let engine = Arc::new(Engine::new(MemoryBackend::new(), EngineConfig::default()));
    engine
        .add_rule(
            Rule::builder("r", 100, Duration::from_secs(60))
                .strategy(Strategy::FixedWindow)
                .build()
                .unwrap(),
        )
        .unwrap();

    let tracker = ConcurrencyTracker::new();
    let mut handles = Vec::with_capacity(2_000);
    for _ in 0..2_000 {
        let engine = Arc::clone(&engine);
        let tracker = Arc::clone(&tracker);
        handles.push(tokio::spawn(async move {
            tracker.enter();
            let verdict = engine.check("shared", "r", None).await.unwrap();
            tracker.exit();
            verdict.allowed
        }));
    }

    let mut allowed = 0u64;
    for handle in handles {
        if handle.await.unwrap() {
            allowed += 1;
        }
    }

    assert!(allowed <= 100, "admitted {allowed} requests past a limit of 100");
    assert!(tracker.peak() > 1, "test didn't actually overlap any calls");
}

/// 50,000 distinct identifiers pushed through the traffic analyzer must not
/// make the engine itself unresponsive; each identifier's rolling window is
/// bounded independently of how many other identifiers are tracked.
#[tokio::test]
#[ignore]
async fn many_identifiers_stay_bounded() {
    let engine = Engine::new(MemoryBackend::new(), EngineConfig::default());
    engine
        .add_rule(Rule::builder("r", 1_000, Duration::from_secs(60)).build().unwrap())
        .unwrap();

    for i in 0..50_000 {
        let identifier = format!("id-{i}");
        let verdict = engine.check(&identifier, "r", None).await.unwrap();
        assert!(verdict.allowed);
    }

    let snap = engine.metrics();
    assert_eq!(snap.total_requests, 50_000);
    assert_eq!(snap.allowed_requests, 50_000);
}

/// A sustained burst-then-idle-then-burst pattern against a token bucket
/// must keep admitting at the configured steady-state rate indefinitely,
/// never drifting into perpetual starvation or unbounded admission.
#[tokio::test]
#[ignore]
async fn token_bucket_is_stable_over_many_refill_cycles() {
    let engine = Engine::new(MemoryBackend::new(), EngineConfig::default());
    engine
        .add_rule(
            Rule::builder("r", 10, Duration::from_secs(1))
                .strategy(Strategy::TokenBucket)
                .burst(10)
                .build()
                .unwrap(),
        )
        .unwrap();

    let mut total_allowed = 0u64;
    for _ in 0..200 {
        for _ in 0..10 {
            if engine.check("steady", "r", None).await.unwrap().allowed {
                total_allowed += 1;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // At roughly 10/sec refill and ~2s of wall-clock budget, admission
    // should land well short of the 2,000 attempted requests.
    assert!(total_allowed < 2_000);
    assert!(total_allowed > 0);
}
