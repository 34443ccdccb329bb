//! Property-based tests for subject matching, coordinate normalization and
//! barrier accounting

mod common;

use common::strategies::*;
use nats_bridge::environment::normalize_coordinates;
use nats_bridge::messaging::{same_subject, subject_matches};
use nats_bridge::pool::PoolBarrier;
use proptest::prelude::*;

proptest! {
    #[test]
    fn literal_subject_matches_itself(subject in subject_strategy()) {
        prop_assert!(subject_matches(&subject, &subject));
    }

    #[test]
    fn derived_wildcard_pattern_matches((subject, pattern) in matching_pattern_strategy()) {
        prop_assert!(
            subject_matches(&pattern, &subject),
            "pattern {} should match {}",
            pattern,
            subject
        );
    }

    #[test]
    fn single_token_wildcard_rejects_longer_subjects(subject in subject_strategy(), extra in token_strategy()) {
        let pattern = subject.split('.').map(|_| "*").collect::<Vec<_>>().join(".");
        let longer = format!("{subject}.{extra}");
        prop_assert!(subject_matches(&pattern, &subject));
        prop_assert!(!subject_matches(&pattern, &longer));
    }

    #[test]
    fn tail_wildcard_needs_at_least_one_token(subject in subject_strategy()) {
        let pattern = format!("{subject}.>");
        prop_assert!(!subject_matches(&pattern, &subject));
    }

    #[test]
    fn subject_identity_ignores_case((subject, variant) in case_variant_strategy()) {
        prop_assert!(same_subject(&subject, &variant));
        prop_assert!(same_subject(&variant, &subject));
    }

    #[test]
    fn coordinate_normalization_is_idempotent(hosts in prop::collection::vec("[a-z]{1,8}:[0-9]{2,5}", 1..4), tcp in any::<bool>()) {
        let raw = hosts
            .iter()
            .map(|host| if tcp { format!("tcp://{host}") } else { host.clone() })
            .collect::<Vec<_>>()
            .join(", ");
        let once = normalize_coordinates(&raw);
        prop_assert_eq!(normalize_coordinates(&once), once.clone());
        prop_assert!(once.split(',').all(|server| server.starts_with("nats://")));
        prop_assert_eq!(once.split(',').count(), hosts.len());
    }

    #[test]
    fn barrier_never_counts_below_zero(total in 0usize..8, arrivals in prop::collection::vec(any::<bool>(), 0..16)) {
        let barrier = PoolBarrier::new("prop", total);
        let mut accepted = 0;
        let mut failures = 0;

        for failed in &arrivals {
            let counted = if *failed { barrier.arrive_failed() } else { barrier.arrive() };
            if counted {
                accepted += 1;
                if *failed {
                    failures += 1;
                }
            }
        }

        prop_assert_eq!(accepted, arrivals.len().min(total));
        prop_assert_eq!(barrier.remaining(), total.saturating_sub(arrivals.len()));
        prop_assert_eq!(barrier.failures(), failures);
        prop_assert_eq!(barrier.is_open(), arrivals.len() >= total);
    }
}
