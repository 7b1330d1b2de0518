//! Property-based tests for retry backoff

use mealsync::client::offline::RetryPolicy;
use proptest::prelude::*;
use std::time::Duration;

proptest! {
    #[test]
    fn test_delays_grow_and_stay_capped(
        max_retries in 0u32..12,
        base_ms in 1u64..2_000,
        extra_ms in 0u64..20_000,
    ) {
        let base = Duration::from_millis(base_ms);
        let max = Duration::from_millis(base_ms + extra_ms);
        let policy = RetryPolicy::new(max_retries, base, max);

        let delays = policy.delays();
        prop_assert_eq!(delays.len() as u32, max_retries);
        if let Some(first) = delays.first() {
            prop_assert_eq!(*first, base);
        }
        for pair in delays.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }
        prop_assert!(delays.iter().all(|d| *d <= max));
    }

    #[test]
    fn test_attempts_bounded_by_policy(max_retries in 0u32..10, count in 0u32..20) {
        let policy = RetryPolicy::new(max_retries, Duration::from_millis(10), Duration::from_secs(1));
        prop_assert_eq!(policy.can_retry(count), count < max_retries);
    }
}
