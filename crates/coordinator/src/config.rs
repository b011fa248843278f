//! Coordinator configuration

use std::path::Path;

use fed_core::{JobConfig, Result};
use serde::{Deserialize, Serialize};
use strategy::StrategyConfig;

/// Everything needed to run one federated job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Round loop settings
    pub job: JobConfig,

    /// Strategy choice and its options
    pub strategy: StrategyConfig,
}

impl CoordinatorConfig {
    /// Load from a JSON file; missing sections take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.job.validate()?;
        self.strategy.validate()
    }
}
