//! Property-based tests for the transition engine
//!
//! A random walk of transition requests is driven against a fresh database and
//! every outcome is checked against a small model built from the rule set and
//! the family tables. The engine is trusted for nothing: after each step the
//! live asset is compared with the ledger.
//!
//! These property tests cover:
//!
//! 1. Validation precedence - category, terminal lock, edge, in that order
//! 2. Ledger head - latest record always matches the live state
//! 3. Replay law - folding the ledger reproduces the live state
//! 4. Terminal stability - once frozen, every request fails the same way
//! 5. Dry-run purity - repeated validation returns the same answer and writes nothing

use asset_lifecycle::catalog::STANDARD_CATEGORIES;
use asset_lifecycle::{StateId, TransitionEngine, TransitionError, TransitionRuleSet};
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

const ALL_STATES: [&str; 12] = [
    "Projected",
    "Active",
    "Maintenance",
    "OutOfService",
    "PendingDecommission",
    "Decommissioned",
    "Suspended",
    "Renewal",
    "Expired",
    "Cancelled",
    "Current",
    "NotCurrent",
];

fn engine() -> (TempDir, TransitionEngine) {
    let temp_dir = tempdir().unwrap();
    let db = sled::open(temp_dir.path().join("prop.db")).unwrap();
    let engine = TransitionEngine::new(Arc::new(db)).unwrap();
    engine.seed_standard().unwrap();
    (temp_dir, engine)
}

fn state_id(engine: &TransitionEngine, name: &str) -> StateId {
    engine.catalog().state_by_name(name).unwrap().unwrap().id
}

fn state_name(engine: &TransitionEngine, id: StateId) -> String {
    engine.catalog().state(id).unwrap().unwrap().name
}

#[derive(Debug, PartialEq)]
enum Expect {
    CategoryMismatch,
    Terminal,
    NoEdge,
    Commit,
}

// what the engine must answer, derived without calling the engine
fn expected(category: usize, current: &str, target: &str) -> Expect {
    let rules = TransitionRuleSet::standard();
    let (_, family, _) = STANDARD_CATEGORIES[category];

    if !family.state_names().any(|name| name == target) {
        Expect::CategoryMismatch
    } else if rules.is_terminal(current) {
        Expect::Terminal
    } else if !rules.is_edge_allowed(current, target) {
        Expect::NoEdge
    } else {
        Expect::Commit
    }
}

fn outcome(result: &Result<impl std::fmt::Debug, TransitionError>) -> Expect {
    match result {
        Ok(_) => Expect::Commit,
        Err(TransitionError::CategoryMismatch { .. }) => Expect::CategoryMismatch,
        Err(TransitionError::TerminalState { .. }) => Expect::Terminal,
        Err(TransitionError::InvalidTransition { .. }) => Expect::NoEdge,
        Err(other) => panic!("unexpected failure: {other:?}"),
    }
}

fn walk_strategy() -> impl Strategy<Value = (usize, Vec<usize>)> {
    (
        0..STANDARD_CATEGORIES.len(),
        prop::collection::vec(0..ALL_STATES.len(), 1..=25),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: every request is answered exactly as the model predicts, and
    /// the ledger tracks the live asset after each step.
    #[test]
    fn prop_random_walk_matches_model((category_idx, walk) in walk_strategy()) {
        let (_dir, engine) = engine();
        let (category_name, _, _) = STANDARD_CATEGORIES[category_idx];
        let category = engine.catalog().category_by_name(category_name).unwrap().unwrap();

        let asset = engine.create_asset("walker", category.id, None, "user_prop").unwrap().asset;
        let mut commits = 1;

        for target_idx in walk {
            let target = ALL_STATES[target_idx];
            let before = engine.asset(&asset.id).unwrap();
            let current = state_name(&engine, before.current_state.unwrap());

            let result = engine.transition(&asset.id, state_id(&engine, target), "user_prop", "walk", None);
            prop_assert_eq!(
                outcome(&result),
                expected(category_idx, &current, target),
                "{} -> {} in {}", current, target, category_name
            );
            if result.is_ok() {
                commits += 1;
            }

            let live = engine.asset(&asset.id).unwrap();
            if result.is_err() {
                prop_assert_eq!(&live, &before, "rejected request must not write");
            }

            let latest = engine.ledger().find_latest(&asset.id).unwrap().unwrap();
            prop_assert_eq!(Some(latest.new_state), live.current_state);
            prop_assert_eq!(engine.ledger().count_for_asset(&asset.id).unwrap(), commits);
        }

        let replay = engine.ledger().replay(&asset.id).unwrap();
        let live = engine.asset(&asset.id).unwrap();
        prop_assert_eq!(replay.state, live.current_state);
        prop_assert_eq!(replay.broken_at, None);
        prop_assert!(engine.audit_asset(&asset.id).unwrap().is_consistent());

        let first = engine.ledger().find_first(&asset.id).unwrap().unwrap();
        prop_assert!(first.is_bootstrap());
    }

    /// Property: a frozen asset rejects every target; category-illegal targets
    /// still report the category first.
    #[test]
    fn prop_terminal_states_are_stable(
        contract in any::<bool>(),
        targets in prop::collection::vec(0..ALL_STATES.len(), 1..=12),
    ) {
        let (_dir, engine) = engine();
        let (category_name, path): (&str, &[&str]) = if contract {
            ("Contract", &["PendingDecommission", "Decommissioned"][..])
        } else {
            ("Software", &["Cancelled"][..])
        };
        let category = engine.catalog().category_by_name(category_name).unwrap().unwrap();
        let asset = engine.create_asset("frozen", category.id, None, "user_prop").unwrap().asset;
        for name in path {
            engine.transition(&asset.id, state_id(&engine, name), "user_prop", "close", None).unwrap();
        }
        let frozen = engine.asset(&asset.id).unwrap();
        prop_assert!(engine.compute_reachable_states(&asset.id).unwrap().is_empty());

        for target_idx in targets {
            let target = state_id(&engine, ALL_STATES[target_idx]);
            let legal = engine.is_state_valid_for_category(category.id, target).unwrap();
            let err = engine.transition(&asset.id, target, "user_prop", "thaw", None).unwrap_err();

            if legal {
                prop_assert!(matches!(err, TransitionError::TerminalState { .. }), "{:?}", err);
            } else {
                prop_assert!(matches!(err, TransitionError::CategoryMismatch { .. }), "{:?}", err);
            }
        }
        prop_assert_eq!(engine.asset(&asset.id).unwrap(), frozen);
    }

    /// Property: dry runs are repeatable and leave no trace.
    #[test]
    fn prop_dry_run_is_pure(
        category_idx in 0..STANDARD_CATEGORIES.len(),
        target_idx in 0..ALL_STATES.len(),
    ) {
        let (_dir, engine) = engine();
        let (category_name, _, _) = STANDARD_CATEGORIES[category_idx];
        let category = engine.catalog().category_by_name(category_name).unwrap().unwrap();
        let asset = engine.create_asset("probe", category.id, None, "user_prop").unwrap().asset;
        let target = state_id(&engine, ALL_STATES[target_idx]);

        let first = engine.dry_run_validate(&asset.id, target).unwrap();
        let second = engine.dry_run_validate(&asset.id, target).unwrap();
        prop_assert_eq!(first, second);

        let current = state_name(&engine, asset.current_state.unwrap());
        prop_assert_eq!(first, expected(category_idx, &current, ALL_STATES[target_idx]) == Expect::Commit);

        prop_assert_eq!(engine.asset(&asset.id).unwrap(), asset.clone());
        prop_assert_eq!(engine.ledger().count_for_asset(&asset.id).unwrap(), 1);

        // the gate agrees with the real call
        let applied = engine.transition(&asset.id, target, "user_prop", "probe", None).is_ok();
        prop_assert_eq!(first, applied);
    }
}
