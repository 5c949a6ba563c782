//! # Scenarios
//!
//! A scenario is a named, recorded step chain plus the overlay settings it was recorded
//! with. Loading a scenario yields a [`Simulation`] positioned at the initial step whose
//! recorded steps are reused as long as the operator reproduces the recorded actions.
//!
//! JSON layout:
//! ```json
//! {
//!   "id": "basic-consensus",
//!   "name": "Basic consensus",
//!   "description": "...",
//!   "isOverlayFullyConnected": true,
//!   "isOverlayGossipEnabled": false,
//!   "initialNodes": [],
//!   "steps": [{ "userActions": [...], "protocolActions": [...] }]
//! }
//! ```

use crate::utils::{disjoint_network, symmetric_network};
use crate::{
    FederatedVotingContext, Node, ProtocolAction, Simulation, SimulationConfig, SimulationError, SimulationResult,
    UserAction,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Built-in scenarios are recorded until they settle, independent of `max_steps`
const MAX_RECORDED_STEPS: usize = 1_000;

/// Actions of one recorded step
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordedStep {
    #[serde(default)]
    pub user_actions: Vec<UserAction>,
    #[serde(default)]
    pub protocol_actions: Vec<ProtocolAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub is_overlay_fully_connected: bool,
    #[serde(default)]
    pub is_overlay_gossip_enabled: bool,
    /// Roster present before the first step
    #[serde(default)]
    pub initial_nodes: Vec<Node>,
    pub steps: Vec<RecordedStep>,
}

impl Scenario {
    /// Capture the full recorded chain of a simulation
    pub fn from_simulation(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        simulation: &Simulation<FederatedVotingContext>,
    ) -> Self {
        let config = simulation.context().config();
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            is_overlay_fully_connected: config.overlay_fully_connected,
            is_overlay_gossip_enabled: config.overlay_gossip_enabled,
            initial_nodes: simulation.context().initial_nodes().to_vec(),
            steps: simulation
                .steps()
                .iter()
                .map(|step| RecordedStep {
                    user_actions: step.user_actions.clone(),
                    protocol_actions: step.protocol_actions.clone(),
                })
                .collect(),
        }
    }

    /// `base` with this scenario's overlay settings
    pub fn config(&self, base: &SimulationConfig) -> SimulationConfig {
        base.clone()
            .with_fully_connected_overlay(self.is_overlay_fully_connected)
            .with_gossip(self.is_overlay_gossip_enabled)
    }

    pub fn to_json(&self) -> SimulationResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> SimulationResult<Self> {
        let scenario: Scenario = serde_json::from_str(json)?;
        if scenario.steps.is_empty() {
            return Err(SimulationError::Scenario(format!(
                "scenario '{}' has no steps",
                scenario.id
            )));
        }
        Ok(scenario)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> SimulationResult<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> SimulationResult<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

/// Turns scenarios into simulations
pub struct ScenarioLoader;

impl ScenarioLoader {
    /// Build a simulation at the initial step of `scenario`
    pub fn load(
        scenario: &Scenario,
        base: &SimulationConfig,
    ) -> SimulationResult<Simulation<FederatedVotingContext>> {
        let context = FederatedVotingContext::with_nodes(scenario.config(base), scenario.initial_nodes.clone())?;
        let history: Vec<(Vec<UserAction>, Vec<ProtocolAction>)> = scenario
            .steps
            .iter()
            .map(|step| (step.user_actions.clone(), step.protocol_actions.clone()))
            .collect();

        info!("Loaded scenario '{}' with {} steps", scenario.id, history.len());
        Ok(Simulation::with_history(context, history))
    }

    /// Load a built-in scenario by id, or a scenario file by path
    pub fn load_by_name(name: &str, base: &SimulationConfig) -> SimulationResult<Simulation<FederatedVotingContext>> {
        let scenario = match ScenarioFactory::by_id(name, base) {
            Ok(scenario) => scenario,
            Err(_) if Path::new(name).exists() => Scenario::load(name)?,
            Err(err) => return Err(err),
        };
        Self::load(&scenario, base)
    }
}

/// Built-in scenarios, recorded by running a simulation from an empty network
pub struct ScenarioFactory;

impl ScenarioFactory {
    pub const IDS: [&'static str; 3] = ["basic-consensus", "stuck", "network-split"];

    pub fn all(base: &SimulationConfig) -> SimulationResult<Vec<Scenario>> {
        Self::IDS.iter().map(|id| Self::by_id(id, base)).collect()
    }

    pub fn by_id(id: &str, base: &SimulationConfig) -> SimulationResult<Scenario> {
        match id {
            "basic-consensus" => Self::basic_consensus(base),
            "stuck" => Self::stuck(base),
            "network-split" => Self::network_split(base),
            other => Err(SimulationError::Scenario(format!("unknown scenario '{}'", other))),
        }
    }

    /// Four nodes trusting 3 of 4, all voting for the same statement
    pub fn basic_consensus(base: &SimulationConfig) -> SimulationResult<Scenario> {
        let nodes = symmetric_network(&["A", "B", "C", "D"], 3)?;
        let votes = [("A", "pizza"), ("B", "pizza"), ("C", "pizza"), ("D", "pizza")];
        Self::record(
            "basic-consensus",
            "Basic consensus",
            "Every node votes pizza and the network confirms it",
            base.clone().with_fully_connected_overlay(true),
            nodes,
            &votes,
        )
    }

    /// Four nodes trusting 3 of 4, split evenly between two statements
    pub fn stuck(base: &SimulationConfig) -> SimulationResult<Scenario> {
        let nodes = symmetric_network(&["A", "B", "C", "D"], 3)?;
        let votes = [("A", "pizza"), ("B", "pizza"), ("C", "burger"), ("D", "burger")];
        Self::record(
            "stuck",
            "Stuck network",
            "No statement gathers a slice, so no node ever accepts",
            base.clone().with_fully_connected_overlay(true),
            nodes,
            &votes,
        )
    }

    /// Two groups without quorum intersection confirming different statements
    pub fn network_split(base: &SimulationConfig) -> SimulationResult<Scenario> {
        let nodes = disjoint_network(&["A", "B"], &["C", "D"], 2)?;
        let votes = [("A", "pizza"), ("B", "pizza"), ("C", "burger"), ("D", "burger")];
        Self::record(
            "network-split",
            "Network split",
            "Disjoint quorums confirm conflicting statements",
            base.clone().with_fully_connected_overlay(true),
            nodes,
            &votes,
        )
    }

    fn record(
        id: &str,
        name: &str,
        description: &str,
        config: SimulationConfig,
        nodes: Vec<Node>,
        votes: &[(&str, &str)],
    ) -> SimulationResult<Scenario> {
        config.validate()?;
        let mut simulation = Simulation::new(FederatedVotingContext::new(config));

        // Immediate actions are prepended, so add them in reverse to keep roster order
        for node in nodes.into_iter().rev() {
            simulation.add_user_action(UserAction::add_node(node.public_key, node.quorum_set));
        }
        for (public_key, statement) in votes {
            simulation.add_user_action(UserAction::vote(*public_key, *statement));
        }

        let executed = simulation.run_to_completion(MAX_RECORDED_STEPS);
        if simulation.has_next_step() {
            return Err(SimulationError::Scenario(format!(
                "scenario '{}' did not settle within {} steps",
                id, executed
            )));
        }
        Ok(Scenario::from_simulation(id, name, description, &simulation))
    }
}
