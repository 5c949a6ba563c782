//! Step Monitor for Federated Voting Simulations
//!
//! Observes a [`Simulation`] after every executed step, runs the safety checks from
//! [`crate::validation`] and raises alerts when the network splits, gets stuck or loses
//! quorum intersection. The quorum analysis is cached on the network structure, so
//! steps that only move messages around cost a hash, not a search.

use std::collections::BTreeSet;
use std::fmt;

use fbas_simulation::{
    AnalysisCache, FederatedNode, FederatedVotingContext, NetworkAnalysis, PublicKey, Simulation, StepIndex,
    MAX_ANALYZED_NODES,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::validation::{SafetyChecker, ValidationConfig, ValidationError};

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    /// Nodes confirmed conflicting statements
    NetworkSplit,
    /// No pending actions and no consensus
    Stuck,
    /// A safety check failed
    SafetyViolation,
    /// The configured trust graph no longer guarantees quorum intersection
    QuorumIntersectionLost,
    QuorumIntersectionRestored,
    /// The network outgrew the analysis limit
    AnalysisSkipped,
}

/// Alert raised while observing a simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    /// Step index the alert was raised at
    pub step: StepIndex,
    pub message: String,
    /// Nodes the alert is about, if any
    pub nodes: BTreeSet<PublicKey>,
}

impl Alert {
    pub fn new(kind: AlertKind, severity: AlertSeverity, step: StepIndex, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            step,
            message: message.into(),
            nodes: BTreeSet::new(),
        }
    }

    pub fn with_nodes(mut self, nodes: impl IntoIterator<Item = PublicKey>) -> Self {
        self.nodes.extend(nodes);
        self
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] step {}: {}", self.severity, self.step, self.message)?;
        if !self.nodes.is_empty() {
            let nodes: Vec<&str> = self.nodes.iter().map(String::as_str).collect();
            write!(f, " ({})", nodes.join(", "))?;
        }
        Ok(())
    }
}

/// Watches a simulation step by step
pub struct StepMonitor {
    config: ValidationConfig,
    safety: SafetyChecker,
    cache: AnalysisCache,
    previous_nodes: Vec<FederatedNode>,
    previous_step: Option<StepIndex>,
    quorum_intersection: Option<bool>,
    split_reported: bool,
    stuck_reported: bool,
    analysis_skipped: bool,
    alerts: Vec<Alert>,
    violations: Vec<ValidationError>,
    steps_observed: usize,
}

impl StepMonitor {
    pub fn new(config: ValidationConfig) -> Self {
        let limit = config.max_analyzed_nodes.min(MAX_ANALYZED_NODES);
        Self {
            safety: SafetyChecker::new(config.clone()),
            cache: AnalysisCache::with_limit(limit),
            config,
            previous_nodes: Vec::new(),
            previous_step: None,
            quorum_intersection: None,
            split_reported: false,
            stuck_reported: false,
            analysis_skipped: false,
            alerts: Vec::new(),
            violations: Vec::new(),
            steps_observed: 0,
        }
    }

    /// Check the simulation's current position
    ///
    /// Moving to an earlier step (going back or replaying from the start) resets the
    /// phase baseline instead of being reported as a regression.
    pub fn observe(&mut self, simulation: &Simulation<FederatedVotingContext>) {
        let step = simulation.current_step_index();
        let context = simulation.context();
        let nodes = context.federated_nodes();
        self.steps_observed += 1;

        let moved_forward = self.previous_step.map_or(true, |previous| step > previous);
        if !moved_forward {
            debug!("Simulation rewound to step {}, resetting monitor baseline", step);
            self.split_reported = false;
            self.stuck_reported = false;
        } else if let Err(violation) = self.safety.check_transition(&self.previous_nodes, &nodes) {
            self.record_violation(step, violation);
        }
        if let Err(violation) = self.safety.check_state(&nodes) {
            self.record_violation(step, violation);
        }

        if let Some(analysis) = self.refresh_analysis(step, context) {
            self.track_intersection(step, &analysis);
            let disrupted = simulation.disrupted_nodes();
            if let Err(violation) = self.safety.check_split(context, &analysis, &disrupted) {
                self.record_violation(step, violation);
            }
        }

        if context.is_network_split() && !self.split_reported {
            self.split_reported = true;
            let values: Vec<String> = context.confirmed_values().into_iter().collect();
            let severity = if self.quorum_intersection == Some(false) {
                AlertSeverity::Warning
            } else {
                AlertSeverity::Critical
            };
            self.raise(Alert::new(
                AlertKind::NetworkSplit,
                severity,
                step,
                format!("network split on {}", values.join(" / ")),
            ));
        }

        if simulation.is_stuck() && !self.stuck_reported {
            self.stuck_reported = true;
            let undecided = nodes
                .iter()
                .filter(|node| node.confirmed.is_none())
                .map(|node| node.public_key.clone());
            self.raise(
                Alert::new(AlertKind::Stuck, AlertSeverity::Warning, step, "network is stuck").with_nodes(undecided),
            );
        }

        self.previous_nodes = nodes;
        self.previous_step = Some(step);
    }

    fn refresh_analysis(&mut self, step: StepIndex, context: &FederatedVotingContext) -> Option<NetworkAnalysis> {
        let limit = self.config.max_analyzed_nodes.min(MAX_ANALYZED_NODES);
        if context.node_count() == 0 {
            return None;
        }
        if context.node_count() > limit {
            if !self.analysis_skipped {
                self.analysis_skipped = true;
                self.raise(Alert::new(
                    AlertKind::AnalysisSkipped,
                    AlertSeverity::Info,
                    step,
                    format!("{} nodes exceed the analysis limit of {}", context.node_count(), limit),
                ));
            }
            return None;
        }

        match self.cache.refresh(&context.nodes()) {
            Ok(analysis) => Some(analysis.clone()),
            Err(err) => {
                warn!("Network analysis failed at step {}: {}", step, err);
                None
            }
        }
    }

    fn track_intersection(&mut self, step: StepIndex, analysis: &NetworkAnalysis) {
        let intersects = analysis.has_quorum_intersection();
        if self.quorum_intersection == Some(intersects) {
            return;
        }

        if !intersects {
            let disjoint: BTreeSet<PublicKey> = analysis
                .minimal_quorums
                .iter()
                .flat_map(|quorum| quorum.iter().cloned())
                .collect();
            self.raise(
                Alert::new(
                    AlertKind::QuorumIntersectionLost,
                    AlertSeverity::Warning,
                    step,
                    format!("{} minimal quorums do not all intersect", analysis.minimal_quorums.len()),
                )
                .with_nodes(disjoint),
            );
        } else if self.quorum_intersection.is_some() {
            self.raise(Alert::new(
                AlertKind::QuorumIntersectionRestored,
                AlertSeverity::Info,
                step,
                "quorum intersection restored",
            ));
        }
        self.quorum_intersection = Some(intersects);
    }

    fn record_violation(&mut self, step: StepIndex, violation: ValidationError) {
        if self.violations.contains(&violation) {
            return;
        }
        error!("Safety violation at step {}: {}", step, violation);
        let nodes = match &violation {
            ValidationError::PhaseRegression { node, .. } | ValidationError::InconsistentState { node, .. } => {
                vec![node.clone()]
            }
            _ => Vec::new(),
        };
        self.raise(
            Alert::new(AlertKind::SafetyViolation, AlertSeverity::Critical, step, violation.to_string())
                .with_nodes(nodes),
        );
        self.violations.push(violation);
    }

    fn raise(&mut self, alert: Alert) {
        match alert.severity {
            AlertSeverity::Info => info!("{}", alert),
            AlertSeverity::Warning => warn!("{}", alert),
            AlertSeverity::Critical => error!("{}", alert),
        }
        self.alerts.push(alert);
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    /// Remove and return the alerts raised so far
    pub fn drain_alerts(&mut self) -> Vec<Alert> {
        std::mem::take(&mut self.alerts)
    }

    pub fn violations(&self) -> &[ValidationError] {
        &self.violations
    }

    pub fn steps_observed(&self) -> usize {
        self.steps_observed
    }

    /// Number of times the quorum search actually ran
    pub fn analyses_run(&self) -> usize {
        self.cache.recomputations()
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}
