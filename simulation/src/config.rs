//! Simulation configuration

use crate::analysis::MAX_ANALYZED_NODES;
use crate::{SimulationError, SimulationResult};
use serde::{Deserialize, Serialize};

/// Overlay behaviour and run bounds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct SimulationConfig {
    /// Every node is connected to every other node
    pub overlay_fully_connected: bool,
    /// Nodes relay votes they have not seen before
    pub overlay_gossip_enabled: bool,
    /// Upper bound on steps when playing a scenario to completion
    pub max_steps: usize,
    /// Largest network the analyzer accepts
    pub max_analyzed_nodes: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            overlay_fully_connected: true,
            overlay_gossip_enabled: false,
            max_steps: 100,
            max_analyzed_nodes: 16,
        }
    }
}

impl SimulationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fully_connected_overlay(mut self, fully_connected: bool) -> Self {
        self.overlay_fully_connected = fully_connected;
        self
    }

    pub fn with_gossip(mut self, enabled: bool) -> Self {
        self.overlay_gossip_enabled = enabled;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_analyzed_nodes(mut self, max: usize) -> Self {
        self.max_analyzed_nodes = max;
        self
    }

    pub fn validate(&self) -> SimulationResult<()> {
        if self.max_steps == 0 {
            return Err(SimulationError::InvalidConfig(
                "max_steps must be greater than 0".to_string(),
            ));
        }
        if self.max_analyzed_nodes == 0 || self.max_analyzed_nodes > MAX_ANALYZED_NODES {
            return Err(SimulationError::InvalidConfig(format!(
                "max_analyzed_nodes must be between 1 and {}",
                MAX_ANALYZED_NODES
            )));
        }
        Ok(())
    }

    /// Parse and validate a TOML document; missing keys take their defaults
    pub fn from_toml_str(source: &str) -> SimulationResult<Self> {
        let config: SimulationConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SimulationConfig::new()
            .with_fully_connected_overlay(false)
            .with_gossip(true)
            .with_max_steps(10);
        assert!(!config.overlay_fully_connected);
        assert!(config.overlay_gossip_enabled);
        assert_eq!(config.max_steps, 10);
    }

    #[test]
    fn test_invalid_bounds() {
        assert!(SimulationConfig::new().with_max_steps(0).validate().is_err());
        assert!(SimulationConfig::new()
            .with_max_analyzed_nodes(MAX_ANALYZED_NODES + 1)
            .validate()
            .is_err());
    }

    #[test]
    fn test_from_toml() {
        let config = SimulationConfig::from_toml_str(
            "overlay_fully_connected = false\noverlay_gossip_enabled = true\n",
        )
        .unwrap();
        assert!(!config.overlay_fully_connected);
        assert!(config.overlay_gossip_enabled);
        assert_eq!(config.max_steps, 100);

        assert!(SimulationConfig::from_toml_str("max_steps = 0").is_err());
        assert!(SimulationConfig::from_toml_str("max_steps = \"many\"").is_err());
    }
}
