//! Property-based tests for the update status machine

use mealsync::shared::UpdateStatus;
use proptest::prelude::*;

fn status() -> impl Strategy<Value = UpdateStatus> {
    prop::sample::select(vec![
        UpdateStatus::Pending,
        UpdateStatus::Retrying,
        UpdateStatus::Success,
        UpdateStatus::Failed,
        UpdateStatus::RolledBack,
    ])
}

proptest! {
    #[test]
    fn test_terminal_states_are_final(from in status(), to in status()) {
        if from.is_terminal() {
            prop_assert!(!from.can_transition_to(to));
        }
    }

    #[test]
    fn test_live_states_can_settle(from in status()) {
        if from.is_live() {
            prop_assert!(from.can_transition_to(UpdateStatus::Success));
            prop_assert!(from.can_transition_to(UpdateStatus::RolledBack));
        }
    }
}
