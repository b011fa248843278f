//! Coordinate-wise median aggregation

use fed_core::{
    ClientId, ClientRecord, EvaluateInstruction, EvaluateResult, Failure, FitInstruction,
    FitResult, Metrics, Parameters, Result, Round,
};

use crate::aggregate;
use crate::fedavg::{FedAvg, FedAvgConfig};
use crate::Strategy;

/// Federated median
///
/// Samples and evaluates like [`FedAvg`] but replaces each parameter with the
/// median of the client values, which bounds the influence of outliers.
#[derive(Debug)]
pub struct FedMedian {
    inner: FedAvg,
}

impl FedMedian {
    pub fn new(config: FedAvgConfig) -> Self {
        Self {
            inner: FedAvg::new(config),
        }
    }

    pub fn with_seed(config: FedAvgConfig, seed: u64) -> Self {
        Self {
            inner: FedAvg::with_seed(config, seed),
        }
    }

    /// Wrap an already configured [`FedAvg`]
    pub fn from_fedavg(inner: FedAvg) -> Self {
        Self { inner }
    }
}

impl Strategy for FedMedian {
    fn configure_fit(
        &self,
        round: Round,
        parameters: &Parameters,
        client_pool: &[ClientRecord],
    ) -> Result<Vec<(ClientId, FitInstruction)>> {
        self.inner.configure_fit(round, parameters, client_pool)
    }

    fn aggregate_fit(
        &self,
        round: Round,
        results: &[(ClientId, FitResult)],
        failures: &[(ClientId, Failure)],
    ) -> Result<(Parameters, Metrics)> {
        self.inner
            .aggregate_fit_with(round, results, failures, aggregate::coordinate_median)
    }

    fn configure_evaluate(
        &self,
        round: Round,
        parameters: &Parameters,
        client_pool: &[ClientRecord],
    ) -> Result<Vec<(ClientId, EvaluateInstruction)>> {
        self.inner.configure_evaluate(round, parameters, client_pool)
    }

    fn aggregate_evaluate(
        &self,
        round: Round,
        results: &[(ClientId, EvaluateResult)],
        failures: &[(ClientId, Failure)],
    ) -> Result<(f64, Metrics)> {
        self.inner.aggregate_evaluate(round, results, failures)
    }
}
