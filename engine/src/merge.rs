//! Conflict resolution between two versions of the same field.
//!
//! This is the core of determinism. Given an incoming and a current version,
//! exactly one rule decides the winner, evaluated in a fixed order.
//!
//! # Rules
//!
//! 1. Equal values keep `current` untouched, whatever the timestamps say
//! 2. An incoming priority value wins
//! 3. A current priority value wins
//! 4. Otherwise the strictly newer timestamp wins; a tie keeps `current`
//!
//! `Unset` timestamps sort below every concrete time in rule 4, so a slot
//! that was never written cannot displace a real write.

use crate::{SyncValue, VersionedValue};
use serde::{Deserialize, Serialize};

/// The rule that decided a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeRule {
    /// Both sides already hold the same value
    ValueIdentity,
    /// Incoming carried the priority flag
    IncomingPriority,
    /// Current carried the priority flag
    CurrentPriority,
    /// Incoming was strictly newer
    IncomingNewer,
    /// Current was newer or tied
    CurrentNewerOrTied,
    /// Three-way merge only: Local tied the API version and takes over
    LocalTieBreak,
}

/// Which side a merge kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Winner {
    Incoming,
    Current,
}

impl MergeRule {
    pub fn winner(self) -> Winner {
        match self {
            MergeRule::IncomingPriority | MergeRule::IncomingNewer | MergeRule::LocalTieBreak => {
                Winner::Incoming
            }
            MergeRule::ValueIdentity
            | MergeRule::CurrentPriority
            | MergeRule::CurrentNewerOrTied => Winner::Current,
        }
    }
}

/// Result of merging two versions.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome<T> {
    /// The winning version
    pub result: VersionedValue<T>,
    /// Whether the winning value differs from the current value
    pub changed: bool,
    /// The rule that decided
    pub rule: MergeRule,
}

/// Decide between an incoming and a current version of a field.
pub fn merge_two_source<T: SyncValue>(
    incoming: &VersionedValue<T>,
    current: &VersionedValue<T>,
) -> MergeOutcome<T> {
    let rule = decide(incoming, current);

    let result = match rule.winner() {
        Winner::Incoming => incoming.clone(),
        Winner::Current => current.clone(),
    };
    let changed = !result.value.same_value(&current.value);

    MergeOutcome {
        result,
        changed,
        rule,
    }
}

fn decide<T: SyncValue>(incoming: &VersionedValue<T>, current: &VersionedValue<T>) -> MergeRule {
    // Must short-circuit before any timestamp is looked at.
    if incoming.value.same_value(&current.value) {
        return MergeRule::ValueIdentity;
    }

    if incoming.timestamp.is_priority() {
        return MergeRule::IncomingPriority;
    }

    if current.timestamp.is_priority() {
        return MergeRule::CurrentPriority;
    }

    if incoming.timestamp.lww_key() > current.timestamp.lww_key() {
        MergeRule::IncomingNewer
    } else {
        MergeRule::CurrentNewerOrTied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Timestamp;

    #[test]
    fn identical_values_keep_current_timestamp() {
        let incoming = VersionedValue::at(90.0, 1000);
        let current = VersionedValue::at(90.0, 2000);

        let outcome = merge_two_source(&incoming, &current);
        assert_eq!(outcome.result, VersionedValue::at(90.0, 2000));
        assert!(!outcome.changed);
        assert_eq!(outcome.rule, MergeRule::ValueIdentity);
    }

    #[test]
    fn identity_beats_priority() {
        let incoming = VersionedValue::priority(true);
        let current = VersionedValue::at(true, 5);

        let outcome = merge_two_source(&incoming, &current);
        assert_eq!(outcome.result.timestamp, Timestamp::At(5));
        assert!(!outcome.changed);
    }

    #[test]
    fn newer_incoming_wins() {
        let incoming = VersionedValue::at(90.0, 2000);
        let current = VersionedValue::at(85.0, 1000);

        let outcome = merge_two_source(&incoming, &current);
        assert_eq!(outcome.result, VersionedValue::at(90.0, 2000));
        assert!(outcome.changed);
        assert_eq!(outcome.rule, MergeRule::IncomingNewer);
    }

    #[test]
    fn tie_keeps_current() {
        let incoming = VersionedValue::at("A".to_string(), 5000);
        let current = VersionedValue::at("B".to_string(), 5000);

        let outcome = merge_two_source(&incoming, &current);
        assert_eq!(outcome.result.value, "B");
        assert!(!outcome.changed);
        assert_eq!(outcome.rule, MergeRule::CurrentNewerOrTied);
    }

    #[test]
    fn current_priority_survives_newer_incoming() {
        let incoming = VersionedValue::at(90.0, u64::MAX);
        let current = VersionedValue::priority(85.0);

        let outcome = merge_two_source(&incoming, &current);
        assert_eq!(outcome.result, VersionedValue::priority(85.0));
        assert!(!outcome.changed);
        assert_eq!(outcome.rule, MergeRule::CurrentPriority);
    }

    #[test]
    fn dual_priority_incoming_wins() {
        let incoming = VersionedValue::priority(false);
        let current = VersionedValue::priority(true);

        let outcome = merge_two_source(&incoming, &current);
        assert_eq!(outcome.result, VersionedValue::priority(false));
        assert!(outcome.changed);
        assert_eq!(outcome.rule, MergeRule::IncomingPriority);
    }

    #[test]
    fn unset_loses_to_any_write() {
        let outcome = merge_two_source(&VersionedValue::unset(1.0), &VersionedValue::at(2.0, 1));
        assert_eq!(outcome.result.value, 2.0);

        let outcome = merge_two_source(&VersionedValue::at(1.0, 1), &VersionedValue::unset(2.0));
        assert_eq!(outcome.result.value, 1.0);
        assert!(outcome.changed);

        let outcome = merge_two_source(&VersionedValue::unset(1.0), &VersionedValue::unset(2.0));
        assert_eq!(outcome.result.value, 2.0);
        assert!(!outcome.changed);
    }

    #[test]
    fn float_within_tolerance_is_identity() {
        let outcome = merge_two_source(&VersionedValue::at(85.0004, 9), &VersionedValue::at(85.0, 1));
        assert_eq!(outcome.rule, MergeRule::ValueIdentity);
        assert_eq!(outcome.result, VersionedValue::at(85.0, 1));
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
            prop_oneof![
                Just(Timestamp::Unset),
                Just(Timestamp::Priority),
                (1u64..10_000).prop_map(Timestamp::At),
            ]
        }

        proptest! {
            #[test]
            fn prop_merge_idempotent(
                a in 0i32..4,
                b in 0i32..4,
                ta in arb_timestamp(),
                tb in arb_timestamp(),
            ) {
                let incoming = VersionedValue::new(a, ta);
                let current = VersionedValue::new(b, tb);

                let first = merge_two_source(&incoming, &current);
                let second = merge_two_source(&incoming, &first.result);

                prop_assert!(!second.changed);
                prop_assert_eq!(second.result, first.result);
            }

            #[test]
            fn prop_priority_dominates(
                a in 0i32..4,
                b in 0i32..4,
                t in 1u64..10_000,
            ) {
                prop_assume!(a != b);
                let priority = VersionedValue::priority(a);
                let timed = VersionedValue::at(b, t);

                let forward = merge_two_source(&priority, &timed);
                let backward = merge_two_source(&timed, &priority);

                prop_assert_eq!(forward.result.value, a);
                prop_assert_eq!(backward.result.value, a);
            }

            #[test]
            fn prop_identity_short_circuit(
                a in 0i32..4,
                ta in arb_timestamp(),
                tb in arb_timestamp(),
            ) {
                let outcome = merge_two_source(
                    &VersionedValue::new(a, ta),
                    &VersionedValue::new(a, tb),
                );

                prop_assert!(!outcome.changed);
                prop_assert_eq!(outcome.result.timestamp, tb);
            }

            #[test]
            fn prop_lww_newer_wins_either_role(
                a in 0i32..4,
                b in 0i32..4,
                t1 in 1u64..5_000,
                delta in 1u64..5_000,
            ) {
                prop_assume!(a != b);
                let t2 = t1 + delta;
                let older = VersionedValue::at(a, t1);
                let newer = VersionedValue::at(b, t2);

                prop_assert_eq!(merge_two_source(&older, &newer).result.value, b);
                prop_assert_eq!(merge_two_source(&newer, &older).result.value, b);
            }
        }
    }

    impl SyncValue for i32 {
        fn same_value(&self, other: &Self) -> bool {
            self == other
        }

        fn into_field_value(self) -> crate::FieldValue {
            crate::FieldValue::Number(f64::from(self))
        }

        fn from_field_value(value: crate::FieldValue) -> Option<Self> {
            match value {
                crate::FieldValue::Number(n) => Some(n as i32),
                _ => None,
            }
        }
    }
}
