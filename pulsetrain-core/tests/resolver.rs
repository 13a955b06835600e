//! Resolver properties over the whole negotiable range

use proptest::prelude::*;

use pulsetrain_core::clock;

const CLK_80M: u32 = 80_000_000;

proptest! {
    // Every in-range request lands within one divider step of the ask
    #[test]
    fn achieved_within_one_divider_step(requested_ns in 13u32..=3187) {
        let tick = clock::resolve(requested_ns, CLK_80M).unwrap();
        let step_ps = clock::min_resolution_ps(CLK_80M);
        let requested_ps = requested_ns as u64 * 1000;
        prop_assert!(tick.resolution_ps.abs_diff(requested_ps) <= step_ps);
        prop_assert!((1..=255u32).contains(&(tick.divider as u32)));
    }

    // Same request, same answer, every time
    #[test]
    fn negotiation_is_idempotent(requested_ns in 13u32..=3187) {
        let first = clock::resolve(requested_ns, CLK_80M).unwrap();
        let second = clock::resolve(requested_ns, CLK_80M).unwrap();
        prop_assert_eq!(first, second);
    }

    // The achieved period is exactly what the divider produces
    #[test]
    fn achieved_matches_divider(requested_ns in 13u32..=3187) {
        let tick = clock::resolve(requested_ns, CLK_80M).unwrap();
        let expected_ps = (tick.divider as u64 * 1_000_000_000_000
            + CLK_80M as u64 / 2) / CLK_80M as u64;
        prop_assert_eq!(tick.resolution_ps, expected_ps);
    }

    // Out-of-range requests always fail, never panic
    #[test]
    fn out_of_range_rejected(requested_ns in prop_oneof![1u32..13, 3188u32..100_000]) {
        prop_assert!(clock::resolve(requested_ns, CLK_80M).is_err());
    }

    // No candidate divider sits strictly closer than the chosen one
    #[test]
    fn chosen_divider_is_nearest(requested_ns in 13u32..=3187) {
        let tick = clock::resolve(requested_ns, CLK_80M).unwrap();
        let requested_ps = requested_ns as u64 * 1000;
        let chosen_err = tick.resolution_ps.abs_diff(requested_ps);
        for divider in 1u64..=255 {
            let period_ps = (divider * 1_000_000_000_000 + CLK_80M as u64 / 2)
                / CLK_80M as u64;
            prop_assert!(period_ps.abs_diff(requested_ps) >= chosen_err);
        }
    }

    // Tick derivation from the achieved period round-trips within half a tick
    #[test]
    fn tick_derivation_tracks_achieved(
        requested_ns in 13u32..=3187,
        duration_ns in 1u64..1_000_000,
    ) {
        let tick = clock::resolve(requested_ns, CLK_80M).unwrap();
        let ticks = tick.ticks_for_ns(duration_ns);
        let back_ps = ticks as u64 * tick.resolution_ps;
        let diff = back_ps.abs_diff(duration_ns * 1000);
        prop_assert!(diff * 2 <= tick.resolution_ps);
    }
}
