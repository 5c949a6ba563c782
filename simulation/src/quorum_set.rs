//! # Quorum Sets
//!
//! A quorum set is a node's trust configuration: a threshold over a set of validators
//! and nested inner quorum sets. Each member (validator or inner set) counts once
//! towards the threshold; an inner set counts when it is itself satisfied.
//!
//! Quorum sets are acyclic by construction, so all evaluation here is plain recursion.

use crate::{PublicKey, SimulationError, SimulationResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Most member combinations [`QuorumSet::slices`] will enumerate
pub const MAX_ENUMERATED_SLICES: u64 = 1 << 16;

/// Recursive trust-set descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase", try_from = "RawQuorumSet")]
pub struct QuorumSet {
    /// Number of members that must be satisfied
    pub threshold: usize,
    /// Directly trusted validators
    pub validators: BTreeSet<PublicKey>,
    /// Nested trust sets, each counting as a single member
    pub inner_quorum_sets: Vec<QuorumSet>,
}

/// Unvalidated wire form, checked through `TryFrom` on deserialization
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuorumSet {
    threshold: usize,
    #[serde(default)]
    validators: BTreeSet<PublicKey>,
    #[serde(default)]
    inner_quorum_sets: Vec<QuorumSet>,
}

impl TryFrom<RawQuorumSet> for QuorumSet {
    type Error = SimulationError;

    fn try_from(raw: RawQuorumSet) -> Result<Self, Self::Error> {
        let quorum_set = QuorumSet {
            threshold: raw.threshold,
            validators: raw.validators,
            inner_quorum_sets: raw.inner_quorum_sets,
        };
        quorum_set.validate()?;
        Ok(quorum_set)
    }
}

impl QuorumSet {
    /// Create a quorum set, rejecting thresholds that can never be met
    pub fn new<I, K>(threshold: usize, validators: I, inner_quorum_sets: Vec<QuorumSet>) -> SimulationResult<Self>
    where
        I: IntoIterator<Item = K>,
        K: Into<PublicKey>,
    {
        let quorum_set = Self {
            threshold,
            validators: validators.into_iter().map(Into::into).collect(),
            inner_quorum_sets,
        };
        quorum_set.validate()?;
        Ok(quorum_set)
    }

    /// The degenerate quorum set with no members; it is never satisfied
    pub fn empty() -> Self {
        Self {
            threshold: 1,
            validators: BTreeSet::new(),
            inner_quorum_sets: Vec::new(),
        }
    }

    /// Check the threshold invariants of this set and every inner set
    pub fn validate(&self) -> SimulationResult<()> {
        if self.threshold == 0 {
            return Err(SimulationError::InvalidQuorumSet(
                "threshold must be at least 1".to_string(),
            ));
        }

        // The empty leaf is allowed as an unsatisfiable configuration
        if !self.is_empty() && self.threshold > self.member_count() {
            return Err(SimulationError::InvalidQuorumSet(format!(
                "threshold {} exceeds {} members",
                self.threshold,
                self.member_count()
            )));
        }

        for inner in &self.inner_quorum_sets {
            inner.validate()?;
        }
        Ok(())
    }

    /// Validators plus inner sets
    pub fn member_count(&self) -> usize {
        self.validators.len() + self.inner_quorum_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_count() == 0
    }

    /// True iff `candidate` satisfies the threshold of this quorum set
    pub fn is_slice(&self, candidate: &BTreeSet<PublicKey>) -> bool {
        if self.is_empty() {
            return false;
        }

        let mut satisfied = self
            .validators
            .iter()
            .filter(|validator| candidate.contains(*validator))
            .count();
        if satisfied >= self.threshold {
            return true;
        }

        for inner in &self.inner_quorum_sets {
            if inner.is_slice(candidate) {
                satisfied += 1;
                if satisfied >= self.threshold {
                    return true;
                }
            }
        }
        false
    }

    /// True iff `set` intersects every slice, so no slice can agree without it
    pub fn is_v_blocking(&self, set: &BTreeSet<PublicKey>) -> bool {
        if self.is_empty() {
            return false;
        }

        let needed = self.member_count() + 1 - self.threshold;
        let mut blocked = self
            .validators
            .iter()
            .filter(|validator| set.contains(*validator))
            .count();

        for inner in &self.inner_quorum_sets {
            if blocked >= needed {
                break;
            }
            if inner.is_v_blocking(set) {
                blocked += 1;
            }
        }
        blocked >= needed
    }

    /// Every validator reachable through the recursive structure
    pub fn all_validators(&self) -> BTreeSet<PublicKey> {
        let mut all = self.validators.clone();
        for inner in &self.inner_quorum_sets {
            all.extend(inner.all_validators());
        }
        all
    }

    /// Number of member combinations [`QuorumSet::slices`] would enumerate
    ///
    /// Counts threshold-sized choices of members, multiplying in the slice counts of
    /// chosen inner sets. Saturates at `u64::MAX`.
    pub fn slice_count(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }

        let mut ways = vec![0u64; self.threshold + 1];
        ways[0] = 1;
        let options = self
            .validators
            .iter()
            .map(|_| 1)
            .chain(self.inner_quorum_sets.iter().map(QuorumSet::slice_count));
        for count in options {
            for k in (1..=self.threshold).rev() {
                ways[k] = ways[k].saturating_add(ways[k - 1].saturating_mul(count));
            }
        }
        ways[self.threshold]
    }

    /// Minimal member combinations that satisfy the threshold
    ///
    /// Supersets of a returned slice are slices too and are not listed. Fails with
    /// [`SimulationError::TooManySlices`] instead of enumerating more than
    /// [`MAX_ENUMERATED_SLICES`] combinations.
    pub fn slices(&self) -> SimulationResult<Vec<BTreeSet<PublicKey>>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let count = self.slice_count();
        if count > MAX_ENUMERATED_SLICES {
            return Err(SimulationError::TooManySlices {
                count,
                max: MAX_ENUMERATED_SLICES,
            });
        }

        let mut options: Vec<Vec<BTreeSet<PublicKey>>> = self
            .validators
            .iter()
            .map(|validator| vec![BTreeSet::from([validator.clone()])])
            .collect();
        for inner in &self.inner_quorum_sets {
            options.push(inner.slices()?);
        }

        let mut result = BTreeSet::new();
        let mut chosen = Vec::with_capacity(self.threshold);
        Self::combine(&options, self.threshold, 0, &mut chosen, &mut result);
        Ok(result.into_iter().collect())
    }

    fn combine(
        options: &[Vec<BTreeSet<PublicKey>>],
        k: usize,
        start: usize,
        chosen: &mut Vec<usize>,
        result: &mut BTreeSet<BTreeSet<PublicKey>>,
    ) {
        if chosen.len() == k {
            let mut partial = vec![BTreeSet::new()];
            for &member in chosen.iter() {
                partial = partial
                    .iter()
                    .flat_map(|acc| {
                        options[member].iter().map(move |option| {
                            let mut union = acc.clone();
                            union.extend(option.iter().cloned());
                            union
                        })
                    })
                    .collect();
            }
            result.extend(partial);
            return;
        }

        for member in start..options.len() {
            chosen.push(member);
            Self::combine(options, k, member + 1, chosen, result);
            chosen.pop();
        }
    }

    /// Order-independent rendering used for structural hashing
    pub fn canonical(&self) -> String {
        let mut inner: Vec<String> = self.inner_quorum_sets.iter().map(QuorumSet::canonical).collect();
        inner.sort();
        format!(
            "{}:[{}]:[{}]",
            self.threshold,
            self.validators.iter().cloned().collect::<Vec<_>>().join(","),
            inner.join(";")
        )
    }
}

impl fmt::Display for QuorumSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{t: {}, v: [{}]",
            self.threshold,
            self.validators.iter().cloned().collect::<Vec<_>>().join(", ")
        )?;
        if !self.inner_quorum_sets.is_empty() {
            write!(f, ", i: [")?;
            for (index, inner) in self.inner_quorum_sets.iter().enumerate() {
                if index > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", inner)?;
            }
            write!(f, "]")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(keys: &[&str]) -> BTreeSet<PublicKey> {
        keys.iter().map(|key| key.to_string()).collect()
    }

    fn nested() -> QuorumSet {
        // 2 of {A, {1 of B, C}, {2 of D, E, F}}
        QuorumSet::new(
            2,
            ["A"],
            vec![
                QuorumSet::new(1, ["B", "C"], vec![]).unwrap(),
                QuorumSet::new(2, ["D", "E", "F"], vec![]).unwrap(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_threshold_validation() {
        assert!(QuorumSet::new(0, ["A"], vec![]).is_err());
        assert!(QuorumSet::new(3, ["A", "B"], vec![]).is_err());
        assert!(QuorumSet::new(2, ["A", "B"], vec![]).is_ok());

        let bad_inner = QuorumSet {
            threshold: 5,
            validators: set(&["X"]),
            inner_quorum_sets: vec![],
        };
        assert!(QuorumSet::new(1, ["A"], vec![bad_inner]).is_err());
    }

    #[test]
    fn test_is_slice_flat() {
        let qs = QuorumSet::new(2, ["A", "B", "C"], vec![]).unwrap();
        assert!(!qs.is_slice(&set(&["A"])));
        assert!(qs.is_slice(&set(&["A", "C"])));
        assert!(qs.is_slice(&set(&["A", "B", "C", "Z"])));
        assert!(!qs.is_slice(&set(&["X", "Y"])));
    }

    #[test]
    fn test_is_slice_nested() {
        let qs = nested();
        assert!(qs.is_slice(&set(&["A", "C"])));
        assert!(qs.is_slice(&set(&["B", "D", "F"])));
        assert!(!qs.is_slice(&set(&["A", "D"])));
        assert!(!qs.is_slice(&set(&["B", "C"])));
    }

    #[test]
    fn test_empty_quorum_set_is_never_satisfied() {
        let qs = QuorumSet::empty();
        assert!(qs.validate().is_ok());
        assert!(!qs.is_slice(&set(&["A", "B"])));
        assert!(!qs.is_v_blocking(&set(&["A"])));
        assert!(qs.slices().unwrap().is_empty());
        assert_eq!(qs.slice_count(), 0);
    }

    #[test]
    fn test_v_blocking() {
        let qs = QuorumSet::new(3, ["A", "B", "C", "D"], vec![]).unwrap();
        assert!(!qs.is_v_blocking(&set(&["A"])));
        assert!(qs.is_v_blocking(&set(&["A", "B"])));

        let nested = nested();
        // Blocking A and the {2 of D, E, F} set leaves only one member
        assert!(nested.is_v_blocking(&set(&["A", "D", "E"])));
        assert!(!nested.is_v_blocking(&set(&["A", "D"])));
    }

    #[test]
    fn test_all_validators() {
        assert_eq!(nested().all_validators(), set(&["A", "B", "C", "D", "E", "F"]));
    }

    #[test]
    fn test_slices() {
        let qs = QuorumSet::new(2, ["A", "B", "C"], vec![]).unwrap();
        let slices = qs.slices().unwrap();
        assert_eq!(slices.len(), 3);
        assert!(slices.contains(&set(&["A", "B"])));
        assert!(slices.contains(&set(&["B", "C"])));
        assert!(slices.iter().all(|slice| qs.is_slice(slice)));

        let nested_slices = nested().slices().unwrap();
        assert!(nested_slices.contains(&set(&["A", "B"])));
        assert!(nested_slices.contains(&set(&["C", "E", "F"])));
        assert!(nested_slices.iter().all(|slice| nested().is_slice(slice)));
    }

    #[test]
    fn test_slice_count() {
        assert_eq!(QuorumSet::new(2, ["A", "B", "C"], vec![]).unwrap().slice_count(), 3);
        // A with either inner set (2 + 3), or both inner sets (2 * 3)
        assert_eq!(nested().slice_count(), 11);
    }

    #[test]
    fn test_large_threshold_is_not_enumerated() {
        let keys: Vec<String> = (0..40).map(|i| format!("N{:02}", i)).collect();
        let qs = QuorumSet::new(27, keys, vec![]).unwrap();
        assert_eq!(qs.slice_count(), 12_033_222_880);
        assert!(matches!(
            qs.slices(),
            Err(SimulationError::TooManySlices { count: 12_033_222_880, max: MAX_ENUMERATED_SLICES })
        ));

        // The unsatisfiable empty member zeroes the outer count; the inner set is still checked
        let inner = QuorumSet::new(20, (0..40).map(|i| format!("M{:02}", i)), vec![]).unwrap();
        let outer = QuorumSet::new(2, Vec::<String>::new(), vec![QuorumSet::empty(), inner]).unwrap();
        assert_eq!(outer.slice_count(), 0);
        assert!(matches!(outer.slices(), Err(SimulationError::TooManySlices { .. })));
    }

    #[test]
    fn test_serde_rejects_invalid_threshold() {
        let json = r#"{"threshold":4,"validators":["A","B"],"innerQuorumSets":[]}"#;
        assert!(serde_json::from_str::<QuorumSet>(json).is_err());

        let json = r#"{"threshold":1,"validators":["A","B"]}"#;
        let qs: QuorumSet = serde_json::from_str(json).unwrap();
        assert_eq!(qs.member_count(), 2);
    }

    #[test]
    fn test_canonical_ignores_inner_order() {
        let inner_a = QuorumSet::new(1, ["B"], vec![]).unwrap();
        let inner_b = QuorumSet::new(1, ["C"], vec![]).unwrap();
        let first = QuorumSet::new(1, ["A"], vec![inner_a.clone(), inner_b.clone()]).unwrap();
        let second = QuorumSet::new(1, ["A"], vec![inner_b, inner_a]).unwrap();
        assert_eq!(first.canonical(), second.canonical());
    }
}
