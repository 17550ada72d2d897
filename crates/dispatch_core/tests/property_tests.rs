use std::collections::HashSet;

use proptest::prelude::*;

use dispatch_core::prefilter::{Prefilter, SearchConstraints};
use dispatch_core::test_helpers::{engine_with, random_fleet, store_with, TEST_ORIGIN};
use dispatch_core::{ReasonCode, TripRequest};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn probabilities_form_a_distribution(
        fleet_seed in any::<u64>(),
        fleet_size in 0usize..120,
        max_candidates in 1u32..12,
        seed in any::<u64>(),
    ) {
        let engine = engine_with(store_with(random_fleet(fleet_seed, fleet_size, TEST_ORIGIN, 3_000.0)));
        let request = TripRequest::new("prop", TEST_ORIGIN, max_candidates).with_seed(seed);
        let result = engine.match_request(&request).expect("match");

        prop_assert!(result.candidates.len() <= max_candidates as usize);
        match result.reason_code {
            ReasonCode::Matched => {
                prop_assert!((result.probability_sum() - 1.0).abs() < 1e-9);
                prop_assert!(result.candidates.iter().all(|c| c.probability > 0.0 && c.probability <= 1.0));
                prop_assert!(result.candidates.iter().all(|c| c.distance_meters <= 2_000.0));
                prop_assert!(result
                    .candidates
                    .windows(2)
                    .all(|w| w[0].probability >= w[1].probability));
                let ids: HashSet<_> = result.candidates.iter().map(|c| &c.driver_id).collect();
                prop_assert_eq!(ids.len(), result.candidates.len());
            }
            ReasonCode::NoDrivers => prop_assert!(result.candidates.is_empty()),
            ReasonCode::InvalidRequest => prop_assert!(false, "valid request rejected"),
        }
    }

    #[test]
    fn cell_narrowing_never_drops_drivers(
        fleet_seed in any::<u64>(),
        radius in 50.0f64..4_000.0,
        min_seats in 1u32..5,
    ) {
        let store = store_with(random_fleet(fleet_seed, 150, TEST_ORIGIN, 4_000.0));
        let constraints = SearchConstraints::new(radius, min_seats);
        let prefilter = Prefilter::new(10_000);

        let narrowed = store.snapshot_near(TEST_ORIGIN, radius, |r| constraints.admits(r));
        let full = store.snapshot(|r| constraints.admits(r));

        let from_narrowed = prefilter.prefilter(TEST_ORIGIN, &constraints, &narrowed);
        let from_full = prefilter.prefilter(TEST_ORIGIN, &constraints, &full);
        prop_assert_eq!(from_narrowed, from_full);
    }
}
