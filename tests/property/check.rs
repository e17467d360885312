//! Property tests for `Engine::check`.
//!
//! Invariants tested:
//! - A fixed-window rule never allows more than its limit within one window.
//! - `total_requests == allowed_requests + blocked_requests` always holds.

use proptest::prelude::*;
use std::time::Duration;
use tokio::runtime::Runtime;

use ratethrottle::backend::MemoryBackend;
use ratethrottle::{Engine, EngineConfig, Rule, Strategy};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    /// Property: a fixed-window rule never admits more than `limit` requests
    /// from one identifier inside a single window.
    #[test]
    fn fixed_window_never_exceeds_its_limit(
        limit in 1u64..=50,
        num_requests in 1usize..=200,
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let engine = Engine::new(MemoryBackend::new(), EngineConfig::default());
            engine
                .add_rule(
                    Rule::builder("r", limit, Duration::from_secs(60))
                        .strategy(Strategy::FixedWindow)
                        .build()
                        .unwrap(),
                )
                .unwrap();

            let mut allowed_count = 0u64;
            for _ in 0..num_requests {
                if engine.check("id", "r", None).await.unwrap().allowed {
                    allowed_count += 1;
                }
            }

            prop_assert!(
                allowed_count <= limit,
                "allowed {} requests but limit was {}",
                allowed_count,
                limit
            );
        });
    }

    /// Property: metrics bookkeeping never loses or double-counts a request.
    #[test]
    fn metrics_total_equals_allowed_plus_blocked(
        limit in 1u64..=20,
        num_requests in 1usize..=100,
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let engine = Engine::new(MemoryBackend::new(), EngineConfig::default());
            engine
                .add_rule(
                    Rule::builder("r", limit, Duration::from_secs(60))
                        .strategy(Strategy::FixedWindow)
                        .build()
                        .unwrap(),
                )
                .unwrap();

            for _ in 0..num_requests {
                let _ = engine.check("id", "r", None).await.unwrap();
            }

            let snap = engine.metrics();
            prop_assert_eq!(snap.total_requests, snap.allowed_requests + snap.blocked_requests);
            prop_assert_eq!(snap.total_requests, num_requests as u64);
        });
    }

    /// Property: a token-bucket rule never admits more than its burst
    /// capacity in an instant (`now` held fixed across every call).
    #[test]
    fn token_bucket_never_exceeds_burst_at_a_single_instant(
        burst in 1u64..=50,
        num_requests in 1usize..=100,
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let engine = Engine::new(MemoryBackend::new(), EngineConfig::default());
            engine
                .add_rule(
                    Rule::builder("r", burst, Duration::from_secs(3600))
                        .strategy(Strategy::TokenBucket)
                        .burst(burst)
                        .build()
                        .unwrap(),
                )
                .unwrap();

            let mut allowed_count = 0u64;
            for _ in 0..num_requests {
                if engine.check("id", "r", None).await.unwrap().allowed {
                    allowed_count += 1;
                }
            }

            prop_assert!(allowed_count <= burst);
        });
    }
}
