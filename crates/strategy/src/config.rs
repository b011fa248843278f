//! Strategy selection from configuration

use std::sync::Arc;

use fed_core::Result;
use serde::{Deserialize, Serialize};

use crate::{FedAvg, FedAvgConfig, FedMedian, StrategyHandle};

/// Which strategy a job runs, with its options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    FedAvg(FedAvgConfig),
    FedMedian(FedAvgConfig),
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::FedAvg(FedAvgConfig::default())
    }
}

impl StrategyConfig {
    fn options(&self) -> &FedAvgConfig {
        match self {
            StrategyConfig::FedAvg(config) | StrategyConfig::FedMedian(config) => config,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.options().validate()
    }

    /// Clients the job should wait for before the first round
    pub fn min_available_clients(&self) -> usize {
        self.options().min_available_clients()
    }

    /// Instantiate the strategy, sampling reproducibly when `seed` is set
    pub fn build(&self, seed: Option<u64>) -> Result<StrategyHandle> {
        self.validate()?;
        let strategy: StrategyHandle = match (self, seed) {
            (StrategyConfig::FedAvg(config), Some(seed)) => {
                Arc::new(FedAvg::with_seed(config.clone(), seed))
            }
            (StrategyConfig::FedAvg(config), None) => Arc::new(FedAvg::new(config.clone())),
            (StrategyConfig::FedMedian(config), Some(seed)) => {
                Arc::new(FedMedian::with_seed(config.clone(), seed))
            }
            (StrategyConfig::FedMedian(config), None) => Arc::new(FedMedian::new(config.clone())),
        };
        Ok(strategy)
    }
}
