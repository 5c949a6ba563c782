// Author: FBAS Simulation Team
//! Property tests for slice evaluation and the quorum analyzer

mod common;
use common::*;

use fbas_simulation::utils::{disjoint_network, symmetric_network};
use fbas_simulation::{NetworkAnalysis, Node, PublicKey, QuorumSet};
use proptest::collection::vec;
use proptest::prelude::*;
use proptest::sample::subsequence;
use std::collections::BTreeSet;

const KEYS: [&str; 6] = ["A", "B", "C", "D", "E", "F"];

fn to_set(keys: Vec<&str>) -> BTreeSet<PublicKey> {
    keys.into_iter().map(str::to_string).collect()
}

fn arb_flat_quorum_set() -> impl Strategy<Value = QuorumSet> {
    subsequence(KEYS.to_vec(), 1..=KEYS.len()).prop_flat_map(|members| {
        let len = members.len();
        (1..=len).prop_map(move |threshold| quorum_set(threshold, &members))
    })
}

fn arb_quorum_set() -> impl Strategy<Value = QuorumSet> {
    (arb_flat_quorum_set(), proptest::option::of(arb_flat_quorum_set()), any::<bool>()).prop_map(
        |(outer, inner, raise)| match inner {
            Some(inner) => {
                let threshold = if raise { outer.threshold + 1 } else { outer.threshold };
                QuorumSet::new(threshold, outer.validators.clone(), vec![inner]).expect("threshold within members")
            }
            None => outer,
        },
    )
}

prop_compose! {
    /// Networks of 2 to 5 nodes, each trusting itself and a random subset of the others
    fn arb_network()(size in 2usize..=5)
                    (trust in vec(vec(any::<bool>(), size), size),
                     thresholds in vec(1usize..=size, size),
                     size in Just(size))
                    -> Vec<Node> {
        let keys: Vec<&str> = KEYS[..size].to_vec();
        (0..size)
            .map(|i| {
                let validators: Vec<&str> = keys
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j == i || trust[i][*j])
                    .map(|(_, key)| *key)
                    .collect();
                let threshold = thresholds[i].min(validators.len());
                Node::new(keys[i], quorum_set(threshold, &validators))
            })
            .collect()
    }
}

proptest! {
    #[test]
    fn slice_evaluation_is_monotonic(
        qs in arb_quorum_set(),
        candidate in subsequence(KEYS.to_vec(), 0..=KEYS.len()),
        extra in subsequence(KEYS.to_vec(), 0..=KEYS.len()),
    ) {
        let candidate = to_set(candidate);
        let mut larger = candidate.clone();
        larger.extend(to_set(extra));

        if qs.is_slice(&candidate) {
            prop_assert!(qs.is_slice(&larger));
        }
    }

    #[test]
    fn enumerated_slices_satisfy_their_quorum_set(qs in arb_quorum_set()) {
        for slice in qs.slices().unwrap() {
            prop_assert!(qs.is_slice(&slice));
            prop_assert!(slice.is_subset(&qs.all_validators()));
        }
    }

    #[test]
    fn minimal_quorums_are_minimal_quorums(nodes in arb_network()) {
        let analysis = NetworkAnalysis::analyze(&nodes).unwrap();

        for quorum in &analysis.quorums {
            for member in quorum {
                let node = nodes.iter().find(|node| &node.public_key == member).unwrap();
                prop_assert!(node.quorum_set.is_slice(quorum));
            }
        }

        for minimal in &analysis.minimal_quorums {
            prop_assert!(analysis.quorums.contains(minimal));
            prop_assert!(analysis.is_quorum(minimal));
            for other in &analysis.minimal_quorums {
                prop_assert!(!(other != minimal && other.is_subset(minimal)));
            }
        }

        let pairwise = analysis.minimal_quorums.iter().all(|a| {
            analysis.minimal_quorums.iter().all(|b| !a.is_disjoint(b))
        });
        prop_assert_eq!(analysis.has_quorum_intersection(), pairwise);

        let top_tier: BTreeSet<PublicKey> = analysis.minimal_quorums.iter().flatten().cloned().collect();
        prop_assert_eq!(&analysis.top_tier_nodes, &top_tier);
    }

    #[test]
    fn structural_hash_ignores_roster_order(nodes in arb_network()) {
        let mut reversed = nodes.clone();
        reversed.reverse();
        prop_assert_eq!(
            fbas_simulation::analysis::structure_hash(&nodes),
            fbas_simulation::analysis::structure_hash(&reversed)
        );
    }
}

#[test]
fn test_disjoint_two_of_two_halves_lack_intersection() {
    let nodes = disjoint_network(&["A", "B"], &["C", "D"], 2).unwrap();
    let analysis = NetworkAnalysis::analyze(&nodes).unwrap();

    assert!(!analysis.has_quorum_intersection());
    assert_eq!(
        analysis.minimal_quorums,
        vec![to_set(vec!["A", "B"]), to_set(vec!["C", "D"])]
    );
}

#[test]
fn test_symmetric_two_of_three_intersects() {
    let nodes = symmetric_network(&["A", "B", "C"], 2).unwrap();
    let analysis = NetworkAnalysis::analyze(&nodes).unwrap();

    assert!(analysis.has_quorum_intersection());
    assert_eq!(analysis.minimal_quorums.len(), 3);
    assert_eq!(analysis.top_tier_nodes, to_set(vec!["A", "B", "C"]));
}
