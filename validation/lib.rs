//! Federated Voting Validation and Monitoring Library
//!
//! Safety and liveness checks for the federated voting simulation, a step monitor
//! that raises alerts while a simulation runs, and a conformance suite that replays
//! the built-in scenarios and compares their outcome with what they demonstrate.
//!
//! ## Usage
//!
//! ```rust
//! use fbas_validation::{ValidationConfig, ValidationReport};
//!
//! let report = ValidationReport::generate(ValidationConfig::default()).unwrap();
//! assert!(report.is_valid());
//! println!("{}", report.summary());
//! ```

pub mod monitor;
pub mod validation;

pub use monitor::{Alert, AlertKind, AlertSeverity, StepMonitor};
pub use validation::{
    ConformanceTestResults, ConformanceTestSuite, LivenessChecker, LivenessVerdict, SafetyChecker, TestResult,
    TestScenario, ValidationConfig, ValidationError, ValidationReport, ValidationResult,
};

/// Shortcuts for callers that only want a verdict
pub mod integration {
    use super::*;
    use fbas_simulation::{FederatedVotingContext, Simulation};

    /// Run the conformance suite and check it against the configured threshold
    pub fn quick_validation_check(config: ValidationConfig) -> ValidationResult<bool> {
        config.validate()?;
        let report = ValidationReport::generate(config)?;
        Ok(report.is_valid())
    }

    /// Play `simulation` to completion under a fresh monitor
    pub fn monitor_to_completion(
        simulation: &mut Simulation<FederatedVotingContext>,
        config: ValidationConfig,
    ) -> StepMonitor {
        let max_steps = config.max_steps;
        let mut monitor = StepMonitor::new(config);
        let mut steps = 0;
        while steps < max_steps && simulation.has_next_step() {
            simulation.execute_step();
            monitor.observe(simulation);
            steps += 1;
        }
        monitor
    }
}
