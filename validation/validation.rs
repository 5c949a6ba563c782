//! Federated Voting Validation Tools
//!
//! Checks a running [`Simulation`] against the properties federated voting promises:
//! phases never move backwards, `confirmed ⇒ accepted ⇒ voted`, and intact nodes never
//! confirm conflicting statements while the network enjoys quorum intersection. The
//! conformance suite replays the built-in scenarios and compares their outcome with
//! what each scenario is meant to demonstrate.

use std::collections::BTreeSet;
use std::fmt;

use fbas_simulation::{
    FederatedNode, FederatedVotingContext, NetworkAnalysis, NetworkOutcome, Phase, PublicKey, ScenarioLoader,
    Simulation, SimulationConfig, SimulationError, Statement, MAX_ANALYZED_NODES,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::monitor::{Alert, StepMonitor};

// ============================================================================
// Errors
// ============================================================================

/// Property violations and validation setup failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A node moved to an earlier phase
    #[error("node {node} regressed from {from} to {to}")]
    PhaseRegression { node: PublicKey, from: Phase, to: Phase },

    /// A node's phase disagrees with its recorded statements
    #[error("node {node} is inconsistent: {description}")]
    InconsistentState { node: PublicKey, description: String },

    /// Intact nodes confirmed different statements although quorums intersect
    #[error("intact nodes confirmed conflicting statements {values:?} despite quorum intersection")]
    SplitDespiteIntersection { values: BTreeSet<Statement> },

    /// No consensus after the step budget was used up
    #[error("no consensus after {steps} steps (stuck: {stuck})")]
    NoConsensus { steps: usize, stuck: bool },

    #[error("invalid validation configuration: {0}")]
    InvalidConfig(String),

    /// The simulation could not be set up
    #[error("simulation error: {0}")]
    Simulation(String),
}

impl From<SimulationError> for ValidationError {
    fn from(err: SimulationError) -> Self {
        ValidationError::Simulation(err.to_string())
    }
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

// ============================================================================
// Configuration
// ============================================================================

/// Validation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub enable_safety_checks: bool,
    pub enable_liveness_checks: bool,
    /// Step budget for a single scenario run
    pub max_steps: usize,
    /// Largest network the monitor analyzes; bigger networks skip analysis
    pub max_analyzed_nodes: usize,
    /// Conformance success rate a report needs to be valid
    pub success_threshold: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enable_safety_checks: true,
            enable_liveness_checks: true,
            max_steps: 100,
            max_analyzed_nodes: 16,
            success_threshold: 0.95,
        }
    }
}

impl ValidationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_safety_checks(mut self, enabled: bool) -> Self {
        self.enable_safety_checks = enabled;
        self
    }

    pub fn with_liveness_checks(mut self, enabled: bool) -> Self {
        self.enable_liveness_checks = enabled;
        self
    }

    pub fn with_success_threshold(mut self, threshold: f64) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn validate(&self) -> ValidationResult<()> {
        if self.max_steps == 0 {
            return Err(ValidationError::InvalidConfig("max_steps must be greater than 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.success_threshold) {
            return Err(ValidationError::InvalidConfig(format!(
                "success_threshold {} is not a ratio",
                self.success_threshold
            )));
        }
        Ok(())
    }

    pub fn from_toml_str(source: &str) -> ValidationResult<Self> {
        let config: ValidationConfig =
            toml::from_str(source).map_err(|err| ValidationError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Simulation settings matching this configuration
    pub fn simulation_config(&self) -> SimulationConfig {
        SimulationConfig::new()
            .with_max_steps(self.max_steps)
            .with_max_analyzed_nodes(self.max_analyzed_nodes.min(MAX_ANALYZED_NODES))
    }
}

// ============================================================================
// Safety Property Checker
// ============================================================================

/// Checks the per-node and network-wide safety properties
#[derive(Debug, Clone)]
pub struct SafetyChecker {
    config: ValidationConfig,
}

impl SafetyChecker {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Phases of nodes present in both projections never decrease
    pub fn check_transition(&self, before: &[FederatedNode], after: &[FederatedNode]) -> ValidationResult<()> {
        if !self.config.enable_safety_checks {
            return Ok(());
        }
        for node in after {
            let Some(previous) = before.iter().find(|previous| previous.public_key == node.public_key) else {
                continue;
            };
            if node.phase < previous.phase {
                return Err(ValidationError::PhaseRegression {
                    node: node.public_key.clone(),
                    from: previous.phase,
                    to: node.phase,
                });
            }
        }
        Ok(())
    }

    /// `confirmed ⇒ accepted ⇒ voted`, and the phase matches the recorded statements
    pub fn check_state(&self, nodes: &[FederatedNode]) -> ValidationResult<()> {
        if !self.config.enable_safety_checks {
            return Ok(());
        }
        for node in nodes {
            let inconsistent = |description: &str| ValidationError::InconsistentState {
                node: node.public_key.clone(),
                description: description.to_string(),
            };

            if node.confirmed.is_some() && node.accepted.is_none() {
                return Err(inconsistent("confirmed without accepting"));
            }
            if node.accepted.is_some() && node.voted.is_none() {
                return Err(inconsistent("accepted without voting"));
            }
            if let (Some(confirmed), Some(accepted)) = (&node.confirmed, &node.accepted) {
                if confirmed != accepted {
                    return Err(inconsistent(&format!("confirmed {} but accepted {}", confirmed, accepted)));
                }
            }
            let expected = match (&node.voted, &node.accepted, &node.confirmed) {
                (_, _, Some(_)) => Phase::Confirmed,
                (_, Some(_), None) => Phase::Accepted,
                (Some(_), None, None) => Phase::Voted,
                (None, None, None) => Phase::Unknown,
            };
            if node.phase != expected {
                return Err(inconsistent(&format!("phase {} but statements imply {}", node.phase, expected)));
            }
        }
        Ok(())
    }

    /// Intact nodes must agree whenever the analysis reports quorum intersection
    pub fn check_split(
        &self,
        context: &FederatedVotingContext,
        analysis: &NetworkAnalysis,
        disrupted: &BTreeSet<PublicKey>,
    ) -> ValidationResult<()> {
        if !self.config.enable_safety_checks || !analysis.has_quorum_intersection() {
            return Ok(());
        }

        let intact: BTreeSet<PublicKey> = if disrupted.is_empty() {
            analysis.nodes.iter().cloned().collect()
        } else {
            analysis.intact_nodes(disrupted)
        };
        let values: BTreeSet<Statement> = context
            .states()
            .filter(|state| intact.contains(state.public_key()))
            .filter_map(|state| state.confirmed.clone())
            .collect();

        if values.len() > 1 {
            return Err(ValidationError::SplitDespiteIntersection { values });
        }
        Ok(())
    }

    /// Run every state check against the simulation's current position
    pub fn check(
        &self,
        simulation: &Simulation<FederatedVotingContext>,
        analysis: Option<&NetworkAnalysis>,
    ) -> ValidationResult<()> {
        self.check_state(&simulation.context().federated_nodes())?;
        if let Some(analysis) = analysis {
            self.check_split(simulation.context(), analysis, &simulation.disrupted_nodes())?;
        }
        Ok(())
    }
}

// ============================================================================
// Liveness Property Checker
// ============================================================================

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LivenessVerdict {
    Consensus,
    Split,
    Stuck,
    /// The step budget ran out while actions were still pending
    Exhausted,
}

impl fmt::Display for LivenessVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LivenessVerdict::Consensus => "consensus",
            LivenessVerdict::Split => "split",
            LivenessVerdict::Stuck => "stuck",
            LivenessVerdict::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct LivenessChecker {
    config: ValidationConfig,
}

impl LivenessChecker {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn verdict(&self, simulation: &Simulation<FederatedVotingContext>) -> LivenessVerdict {
        match simulation.context().outcome() {
            NetworkOutcome::Consensus => LivenessVerdict::Consensus,
            NetworkOutcome::Split => LivenessVerdict::Split,
            NetworkOutcome::Pending if simulation.is_stuck() => LivenessVerdict::Stuck,
            NetworkOutcome::Pending => LivenessVerdict::Exhausted,
        }
    }

    /// Consensus must have been reached within the step budget
    pub fn check(&self, simulation: &Simulation<FederatedVotingContext>, steps: usize) -> ValidationResult<()> {
        if !self.config.enable_liveness_checks {
            return Ok(());
        }
        if steps > self.config.max_steps {
            warn!("Run took {} steps, budget is {}", steps, self.config.max_steps);
        }
        match self.verdict(simulation) {
            LivenessVerdict::Consensus if steps <= self.config.max_steps => Ok(()),
            verdict => Err(ValidationError::NoConsensus {
                steps,
                stuck: verdict == LivenessVerdict::Stuck,
            }),
        }
    }
}

// ============================================================================
// Conformance Testing Interface
// ============================================================================

/// Individual test scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestScenario {
    pub name: String,
    /// Built-in scenario id or scenario file path
    pub scenario: String,
    pub expected: LivenessVerdict,
}

impl TestScenario {
    pub fn new(name: impl Into<String>, scenario: impl Into<String>, expected: LivenessVerdict) -> Self {
        Self {
            name: name.into(),
            scenario: scenario.into(),
            expected,
        }
    }
}

/// Result of a single test
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub success: bool,
    pub steps: usize,
    pub verdict: LivenessVerdict,
    pub expected: LivenessVerdict,
    pub reused_steps: usize,
    pub alerts: Vec<Alert>,
    pub violations: Vec<String>,
}

/// Results of conformance testing
#[derive(Debug, Default, Serialize)]
pub struct ConformanceTestResults {
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub test_results: IndexMap<String, TestResult>,
}

impl ConformanceTestResults {
    fn add_result(&mut self, test_name: String, result: TestResult) {
        self.total_tests += 1;
        if result.success {
            self.passed_tests += 1;
        } else {
            self.failed_tests += 1;
        }
        self.test_results.insert(test_name, result);
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_tests == 0 {
            0.0
        } else {
            self.passed_tests as f64 / self.total_tests as f64
        }
    }
}

/// Replays scenarios and compares their outcome with expectations
pub struct ConformanceTestSuite {
    config: ValidationConfig,
    test_scenarios: Vec<TestScenario>,
}

impl ConformanceTestSuite {
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            test_scenarios: Self::create_default_scenarios(),
        }
    }

    fn create_default_scenarios() -> Vec<TestScenario> {
        vec![
            TestScenario::new("basic consensus", "basic-consensus", LivenessVerdict::Consensus),
            TestScenario::new("stuck network", "stuck", LivenessVerdict::Stuck),
            TestScenario::new("network split", "network-split", LivenessVerdict::Split),
        ]
    }

    pub fn test_scenarios(&self) -> &[TestScenario] {
        &self.test_scenarios
    }

    pub fn add_test_scenario(&mut self, scenario: TestScenario) {
        self.test_scenarios.push(scenario);
    }

    pub fn run_all_tests(&self) -> ValidationResult<ConformanceTestResults> {
        let mut results = ConformanceTestResults::default();
        for scenario in &self.test_scenarios {
            let result = self.run_test_scenario(scenario)?;
            results.add_result(scenario.name.clone(), result);
        }
        info!(
            "Conformance: {}/{} scenarios passed",
            results.passed_tests, results.total_tests
        );
        Ok(results)
    }

    /// Play one scenario to completion under a [`StepMonitor`]
    pub fn run_test_scenario(&self, scenario: &TestScenario) -> ValidationResult<TestResult> {
        info!("Running test scenario: {}", scenario.name);
        self.config.validate()?;

        let simulation_config = self.config.simulation_config();
        let mut simulation = ScenarioLoader::load_by_name(&scenario.scenario, &simulation_config)?;
        let mut monitor = StepMonitor::new(self.config.clone());

        let mut steps = 0;
        while steps < self.config.max_steps && simulation.has_next_step() {
            simulation.execute_step();
            steps += 1;
            monitor.observe(&simulation);
        }

        let liveness = LivenessChecker::new(self.config.clone());
        let verdict = liveness.verdict(&simulation);
        let mut violations: Vec<String> = monitor.violations().iter().map(ToString::to_string).collect();
        if scenario.expected == LivenessVerdict::Consensus {
            if let Err(err) = liveness.check(&simulation, steps) {
                violations.push(err.to_string());
            }
        }

        let success = verdict == scenario.expected && violations.is_empty();
        if success {
            debug!("Scenario {} ended in {} as expected", scenario.name, verdict);
        } else {
            warn!(
                "Scenario {} ended in {}, expected {} ({} violations)",
                scenario.name,
                verdict,
                scenario.expected,
                violations.len()
            );
        }

        Ok(TestResult {
            success,
            steps,
            verdict,
            expected: scenario.expected,
            reused_steps: simulation.reused_step_count(),
            alerts: monitor.alerts().to_vec(),
            violations,
        })
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Comprehensive validation report
#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub conformance_results: ConformanceTestResults,
    pub invariant_validation: bool,
    pub success_threshold: f64,
}

impl ValidationReport {
    /// Run the conformance suite and collect the report
    pub fn generate(config: ValidationConfig) -> ValidationResult<Self> {
        let suite = ConformanceTestSuite::new(config.clone());
        let conformance_results = suite.run_all_tests()?;
        let invariant_validation = conformance_results
            .test_results
            .values()
            .all(|result| result.violations.is_empty());

        Ok(Self {
            conformance_results,
            invariant_validation,
            success_threshold: config.success_threshold,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.conformance_results.success_rate() >= self.success_threshold && self.invariant_validation
    }

    pub fn summary(&self) -> String {
        let alerts: usize = self
            .conformance_results
            .test_results
            .values()
            .map(|result| result.alerts.len())
            .sum();
        format!(
            "Validation Report:\n\
             - Conformance Tests: {}/{} passed ({:.1}%)\n\
             - Invariant Validation: {}\n\
             - Alerts Raised: {}\n\
             - Overall Status: {}",
            self.conformance_results.passed_tests,
            self.conformance_results.total_tests,
            self.conformance_results.success_rate() * 100.0,
            if self.invariant_validation { "PASSED" } else { "FAILED" },
            alerts,
            if self.is_valid() { "VALID" } else { "INVALID" }
        )
    }

    pub fn to_json(&self) -> ValidationResult<String> {
        serde_json::to_string_pretty(self).map_err(|err| ValidationError::Simulation(err.to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================
