// Author: FBAS Simulation Team
//! Property tests for the safety checker

use fbas_simulation::{FederatedNode, Phase, QuorumSet};
use fbas_validation::{SafetyChecker, ValidationConfig, ValidationError};
use proptest::prelude::*;

fn arb_phase() -> impl Strategy<Value = Phase> {
    prop_oneof![
        Just(Phase::Unknown),
        Just(Phase::Voted),
        Just(Phase::Accepted),
        Just(Phase::Confirmed),
    ]
}

/// A projection whose statements agree with `phase`
fn consistent(key: &str, phase: Phase) -> FederatedNode {
    let statement = |reached: bool| reached.then(|| "x".to_string());
    FederatedNode {
        public_key: key.to_string(),
        quorum_set: QuorumSet::new(1, [key], vec![]).unwrap(),
        phase,
        voted: statement(phase >= Phase::Voted),
        accepted: statement(phase >= Phase::Accepted),
        confirmed: statement(phase >= Phase::Confirmed),
        processed_votes: 0,
        peers: vec![],
    }
}

proptest! {
    #[test]
    fn transitions_fail_exactly_on_regression(from in arb_phase(), to in arb_phase()) {
        let checker = SafetyChecker::new(ValidationConfig::default());
        let result = checker.check_transition(&[consistent("A", from)], &[consistent("A", to)]);

        if to < from {
            prop_assert_eq!(
                result,
                Err(ValidationError::PhaseRegression { node: "A".to_string(), from, to })
            );
        } else {
            prop_assert!(result.is_ok());
        }
    }

    #[test]
    fn consistent_projections_pass(phases in proptest::collection::vec(arb_phase(), 1..6)) {
        let checker = SafetyChecker::new(ValidationConfig::default());
        let nodes: Vec<FederatedNode> = phases
            .iter()
            .enumerate()
            .map(|(i, phase)| consistent(&format!("N{}", i), *phase))
            .collect();
        prop_assert!(checker.check_state(&nodes).is_ok());
    }

    #[test]
    fn new_nodes_are_not_regressions(phase in arb_phase()) {
        let checker = SafetyChecker::new(ValidationConfig::default());
        prop_assert!(checker.check_transition(&[], &[consistent("A", phase)]).is_ok());
    }
}
