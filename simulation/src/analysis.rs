//! # Quorum Structure Analysis
//!
//! Exhaustive analysis of the trust graph formed by the nodes' quorum slices:
//! quorums, minimal quorums, dispensable sets (D-Sets), top tier and quorum
//! intersection.
//!
//! ## Complexity
//!
//! Everything here is a brute-force search over node subsets:
//!
//! - quorum enumeration visits all `2^n` subsets
//! - D-Set enumeration visits every split of the nodes into "removed", "quorum
//!   member" and "neither", `O(3^n)` subset checks
//!
//! Subsets are encoded as `u64` bitmasks and the analysis refuses networks larger
//! than [`MAX_ANALYZED_NODES`]. Results are cached by [`AnalysisCache`] against a
//! structural hash so the search only runs when quorum sets actually change.

use crate::{Node, PublicKey, QuorumSet, SimulationError, SimulationResult};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use tracing::{debug, info};

/// Largest network the exhaustive search accepts
pub const MAX_ANALYZED_NODES: usize = 24;

type Mask = u64;

/// Derived snapshot of the network's quorum structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAnalysis {
    /// Analyzed node ids, sorted
    pub nodes: Vec<PublicKey>,
    /// Quorum set of each analyzed node
    pub quorum_sets: BTreeMap<PublicKey, QuorumSet>,
    /// Every non-empty quorum
    pub quorums: Vec<BTreeSet<PublicKey>>,
    /// Quorums without a proper sub-quorum
    pub minimal_quorums: Vec<BTreeSet<PublicKey>>,
    /// Dispensable sets
    pub d_sets: Vec<BTreeSet<PublicKey>>,
    /// Nodes appearing in any minimal quorum
    pub top_tier_nodes: BTreeSet<PublicKey>,
    /// Every pair of minimal quorums intersects
    pub quorum_intersection: bool,
    /// Structural hash of the configuration this snapshot was computed from
    pub structure_hash: u64,
}

/// A quorum set compiled against a fixed node ordering
///
/// Validators outside the analyzed roster never count towards the threshold.
struct MaskQuorumSet {
    threshold: usize,
    satisfiable: bool,
    validators: Mask,
    inner: Vec<MaskQuorumSet>,
}

impl MaskQuorumSet {
    fn compile(quorum_set: &QuorumSet, index: &BTreeMap<&str, usize>) -> Self {
        let validators = quorum_set
            .validators
            .iter()
            .filter_map(|validator| index.get(validator.as_str()))
            .fold(0 as Mask, |mask, &i| mask | ((1 as Mask) << i));
        Self {
            threshold: quorum_set.threshold,
            satisfiable: !quorum_set.is_empty(),
            validators,
            inner: quorum_set
                .inner_quorum_sets
                .iter()
                .map(|inner| Self::compile(inner, index))
                .collect(),
        }
    }

    /// Same rule as [`QuorumSet::is_slice`], over a bitmask of available nodes
    fn is_satisfied_by(&self, available: Mask) -> bool {
        if !self.satisfiable {
            return false;
        }
        let mut satisfied = (self.validators & available).count_ones() as usize;
        if satisfied >= self.threshold {
            return true;
        }
        for inner in &self.inner {
            if inner.is_satisfied_by(available) {
                satisfied += 1;
                if satisfied >= self.threshold {
                    return true;
                }
            }
        }
        false
    }
}

/// Compiled quorum sets of the roster, indexed like `keys`
///
/// A node's slices always contain the node itself, so "some slice of `i` lies inside
/// `available`" is exactly "`i`'s quorum set is satisfied by `available`" whenever
/// `i` is in `available`. Checking the threshold directly keeps every membership test
/// linear in the quorum set size instead of enumerating slices.
struct TrustTable {
    keys: Vec<PublicKey>,
    quorum_sets: Vec<MaskQuorumSet>,
}

impl TrustTable {
    fn new(roster: &BTreeMap<&str, &Node>) -> Self {
        let keys: Vec<PublicKey> = roster.keys().map(|key| key.to_string()).collect();
        let index: BTreeMap<&str, usize> = roster
            .keys()
            .enumerate()
            .map(|(i, key)| (*key, i))
            .collect();
        let quorum_sets = roster
            .values()
            .map(|node| MaskQuorumSet::compile(&node.quorum_set, &index))
            .collect();

        Self { keys, quorum_sets }
    }

    fn all(&self) -> Mask {
        if self.keys.is_empty() {
            0
        } else {
            Mask::MAX >> (Mask::BITS as usize - self.keys.len())
        }
    }

    fn members(mask: Mask) -> impl Iterator<Item = usize> {
        (0..Mask::BITS as usize).filter(move |&i| mask & ((1 as Mask) << i) != 0)
    }

    fn to_set(&self, mask: Mask) -> BTreeSet<PublicKey> {
        Self::members(mask).map(|i| self.keys[i].clone()).collect()
    }

    /// Every member of `candidate` has a slice inside it once `deleted` is ignored
    fn is_quorum_despite(&self, candidate: Mask, deleted: Mask) -> bool {
        candidate != 0
            && candidate & deleted == 0
            && Self::members(candidate).all(|i| self.quorum_sets[i].is_satisfied_by(candidate | deleted))
    }

    fn is_quorum(&self, candidate: Mask) -> bool {
        self.is_quorum_despite(candidate, 0)
    }

    /// All quorums inside `universe` of the system with `deleted` removed from every slice
    fn quorums_within(&self, universe: Mask, deleted: Mask) -> Vec<Mask> {
        let mut quorums = Vec::new();
        let mut candidate = universe;
        while candidate != 0 {
            if self.is_quorum_despite(candidate, deleted) {
                quorums.push(candidate);
            }
            candidate = (candidate - 1) & universe;
        }
        quorums
    }

    fn minimal(quorums: &[Mask]) -> Vec<Mask> {
        let mut sorted = quorums.to_vec();
        sorted.sort_by_key(|quorum| (quorum.count_ones(), *quorum));

        let mut minimal: Vec<Mask> = Vec::new();
        for quorum in sorted {
            if !minimal.iter().any(|smaller| smaller & !quorum == 0) {
                minimal.push(quorum);
            }
        }
        minimal
    }

    fn pairwise_intersecting(minimal: &[Mask]) -> bool {
        minimal
            .iter()
            .enumerate()
            .all(|(i, a)| minimal[i + 1..].iter().all(|b| a & b != 0))
    }

    /// `removed` is a D-Set: the rest is a quorum (or empty) and keeps quorum
    /// intersection once `removed` is deleted from every slice
    fn is_d_set(&self, removed: Mask) -> bool {
        let rest = self.all() & !removed;
        if rest != 0 && !self.is_quorum(rest) {
            return false;
        }
        let quorums = self.quorums_within(rest, removed);
        Self::pairwise_intersecting(&Self::minimal(&quorums))
    }
}

impl NetworkAnalysis {
    /// Analyze a network of at most [`MAX_ANALYZED_NODES`] nodes
    pub fn analyze(nodes: &[Node]) -> SimulationResult<Self> {
        Self::analyze_with_limit(nodes, MAX_ANALYZED_NODES)
    }

    /// Analyze with a lower node limit than the built-in maximum
    pub fn analyze_with_limit(nodes: &[Node], max_nodes: usize) -> SimulationResult<Self> {
        let max = max_nodes.min(MAX_ANALYZED_NODES);

        // Later entries win for repeated keys
        let roster: BTreeMap<&str, &Node> = nodes.iter().map(|node| (node.public_key.as_str(), node)).collect();
        if roster.len() > max {
            return Err(SimulationError::NetworkTooLarge {
                nodes: roster.len(),
                max,
            });
        }

        info!("Starting network analysis for {} nodes", roster.len());
        let table = TrustTable::new(&roster);

        let quorums = table.quorums_within(table.all(), 0);
        let minimal = TrustTable::minimal(&quorums);
        let quorum_intersection = TrustTable::pairwise_intersecting(&minimal);

        let mut d_sets = Vec::new();
        let all = table.all();
        let mut removed = all;
        loop {
            if table.is_d_set(removed) {
                d_sets.push(removed);
            }
            if removed == 0 {
                break;
            }
            removed = (removed - 1) & all;
        }
        d_sets.sort_by_key(|d_set| (d_set.count_ones(), *d_set));

        let top_tier = minimal.iter().fold(0 as Mask, |acc, quorum| acc | *quorum);

        let analysis = Self {
            nodes: table.keys.clone(),
            quorums: quorums.iter().rev().map(|q| table.to_set(*q)).collect(),
            minimal_quorums: minimal.iter().map(|q| table.to_set(*q)).collect(),
            d_sets: d_sets.iter().map(|d| table.to_set(*d)).collect(),
            top_tier_nodes: table.to_set(top_tier),
            quorum_intersection,
            structure_hash: structure_hash(nodes),
            quorum_sets: roster
                .iter()
                .map(|(key, node)| (key.to_string(), node.quorum_set.clone()))
                .collect(),
        };

        info!(
            "Network analysis complete: quorums={}, minimal_quorums={}, d_sets={}, intersection={}",
            analysis.quorums.len(),
            analysis.minimal_quorums.len(),
            analysis.d_sets.len(),
            analysis.quorum_intersection
        );
        Ok(analysis)
    }

    /// The FBAS safety property: every pair of minimal quorums shares a node
    ///
    /// Vacuously true when the network has fewer than two minimal quorums.
    pub fn has_quorum_intersection(&self) -> bool {
        self.quorum_intersection
    }

    /// Pairwise intersections of distinct minimal quorums, for visualisation
    pub fn minimal_quorum_intersections(&self) -> Vec<BTreeSet<PublicKey>> {
        let mut intersections = Vec::new();
        for (i, a) in self.minimal_quorums.iter().enumerate() {
            for b in &self.minimal_quorums[i + 1..] {
                intersections.push(a.intersection(b).cloned().collect());
            }
        }
        intersections
    }

    /// For each node, its minimal slices including itself
    ///
    /// Listed on demand. Fails with [`SimulationError::TooManySlices`] when a quorum set
    /// has more slices than can be listed; the rest of the snapshot does not need them.
    pub fn quorum_slices(&self) -> SimulationResult<BTreeMap<PublicKey, Vec<BTreeSet<PublicKey>>>> {
        let mut slices = BTreeMap::new();
        for (key, quorum_set) in &self.quorum_sets {
            slices.insert(key.clone(), Node::new(key.clone(), quorum_set.clone()).quorum_slices()?);
        }
        Ok(slices)
    }

    pub fn is_quorum(&self, candidate: &BTreeSet<PublicKey>) -> bool {
        self.quorums.contains(candidate)
    }

    /// Nodes outside the smallest D-Set containing `ill_behaved`
    ///
    /// The full node set is always a D-Set, so if nothing smaller covers the
    /// ill-behaved nodes no node is intact.
    pub fn intact_nodes(&self, ill_behaved: &BTreeSet<PublicKey>) -> BTreeSet<PublicKey> {
        let relevant: BTreeSet<PublicKey> = ill_behaved
            .iter()
            .filter(|key| self.quorum_sets.contains_key(*key))
            .cloned()
            .collect();

        let all: BTreeSet<PublicKey> = self.nodes.iter().cloned().collect();
        let covering = self
            .d_sets
            .iter()
            .filter(|d_set| relevant.is_subset(d_set))
            .fold(all.clone(), |acc, d_set| {
                acc.intersection(d_set).cloned().collect()
            });

        all.difference(&covering).cloned().collect()
    }
}

/// Hash of `(publicKey, canonical quorum set)` per node, sorted by public key
pub fn structure_hash(nodes: &[Node]) -> u64 {
    let mut entries: Vec<(&str, String)> = nodes
        .iter()
        .map(|node| (node.public_key.as_str(), node.quorum_set.canonical()))
        .collect();
    entries.sort();

    let mut hasher = DefaultHasher::new();
    entries.hash(&mut hasher);
    hasher.finish()
}

/// Caller-owned cache that reruns the analysis only when the structure changes
#[derive(Debug, Clone)]
pub struct AnalysisCache {
    max_nodes: usize,
    structure_hash: Option<u64>,
    analysis: Option<NetworkAnalysis>,
    recomputations: usize,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self::with_limit(MAX_ANALYZED_NODES)
    }

    pub fn with_limit(max_nodes: usize) -> Self {
        Self {
            max_nodes,
            structure_hash: None,
            analysis: None,
            recomputations: 0,
        }
    }

    /// Return the analysis for `nodes`, recomputing only on a structural change
    pub fn refresh(&mut self, nodes: &[Node]) -> SimulationResult<&NetworkAnalysis> {
        let hash = structure_hash(nodes);
        let stale = self.structure_hash != Some(hash) || self.analysis.is_none();

        if stale {
            debug!("Network structure changed, recomputing analysis");
            let analysis = NetworkAnalysis::analyze_with_limit(nodes, self.max_nodes)?;
            self.analysis = Some(analysis);
            self.structure_hash = Some(hash);
            self.recomputations += 1;
        } else {
            debug!("Using cached network analysis");
        }

        self.analysis
            .as_ref()
            .ok_or_else(|| SimulationError::InvalidConfig("analysis unavailable".to_string()))
    }

    /// Last computed analysis, if any
    pub fn current(&self) -> Option<&NetworkAnalysis> {
        self.analysis.as_ref()
    }

    /// How many times the search actually ran
    pub fn recomputations(&self) -> usize {
        self.recomputations
    }
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::new()
    }
}
