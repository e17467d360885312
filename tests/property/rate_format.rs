//! Property test for the `"<N>/<unit>"` shorthand round-trip (`spec.md` §8,
//! property 10).

use proptest::prelude::*;
use std::time::Duration;

use ratethrottle::{format_rate, parse_rate};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn format_then_parse_round_trips(
        limit in 1u64..=1_000_000,
        unit_secs in prop_oneof![Just(1u64), Just(60), Just(3_600), Just(86_400)],
    ) {
        let window = Duration::from_secs(unit_secs);
        let formatted = format_rate(limit, window);
        let (parsed_limit, parsed_window) = parse_rate(&formatted).unwrap();

        // format_rate always expresses per-second for a limit that doesn't
        // divide evenly by the unit's seconds; re-formatting that result is
        // a fixed point.
        let reformatted = format_rate(parsed_limit, parsed_window);
        prop_assert_eq!(formatted, reformatted);
    }
}
