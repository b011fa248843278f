//! Federated averaging
//!
//! Samples clients per round, sends every sampled client the same global
//! parameters and config, and averages the returned parameters weighted by
//! each client's example count.

use std::fmt;
use std::sync::Arc;

use client_sampling::Sampler;
use fed_core::{
    AggregationError, ClientId, ClientRecord, Config, EvaluateInstruction, EvaluateResult,
    Failure, FitInstruction, FitResult, Metrics, Parameters, Result, Round, SamplingPolicy,
    Scalar,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregate::{self, MetricsAggregation};
use crate::Strategy;

/// Builds the per-round config sent to clients
pub type ConfigFn = Arc<dyn Fn(Round) -> Config + Send + Sync>;

/// Configuration for [`FedAvg`] and strategies built on it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FedAvgConfig {
    /// Sampling for fit rounds
    pub fit: SamplingPolicy,

    /// Sampling for evaluate rounds
    pub evaluate: SamplingPolicy,

    /// Aggregate rounds in which some clients failed
    pub accept_failures: bool,

    /// How fit metrics are combined
    pub fit_metrics: MetricsAggregation,

    /// How evaluation metrics are combined
    pub evaluate_metrics: MetricsAggregation,

    /// Static entries added to every fit config
    pub fit_config: Config,

    /// Static entries added to every evaluate config
    pub evaluate_config: Config,
}

impl Default for FedAvgConfig {
    fn default() -> Self {
        Self {
            fit: SamplingPolicy::default(),
            evaluate: SamplingPolicy::default(),
            accept_failures: true,
            fit_metrics: MetricsAggregation::WeightedAverage,
            evaluate_metrics: MetricsAggregation::WeightedAverage,
            fit_config: Config::new(),
            evaluate_config: Config::new(),
        }
    }
}

impl FedAvgConfig {
    pub fn validate(&self) -> Result<()> {
        self.fit.validate()?;
        self.evaluate.validate()
    }

    /// Clients that must be connected before any round can sample
    pub fn min_available_clients(&self) -> usize {
        self.fit.min_available.max(self.evaluate.min_available)
    }
}

/// Federated averaging strategy
pub struct FedAvg {
    config: FedAvgConfig,
    sampler: Sampler,
    on_fit_config: Option<ConfigFn>,
    on_evaluate_config: Option<ConfigFn>,
}

impl fmt::Debug for FedAvg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FedAvg")
            .field("config", &self.config)
            .field("seed", &self.sampler.seed())
            .finish()
    }
}

impl FedAvg {
    /// Create a strategy sampling with a random seed
    pub fn new(config: FedAvgConfig) -> Self {
        Self::with_sampler(config, Sampler::new())
    }

    /// Create a strategy with reproducible sampling
    pub fn with_seed(config: FedAvgConfig, seed: u64) -> Self {
        Self::with_sampler(config, Sampler::with_seed(seed))
    }

    pub fn with_sampler(config: FedAvgConfig, sampler: Sampler) -> Self {
        Self {
            config,
            sampler,
            on_fit_config: None,
            on_evaluate_config: None,
        }
    }

    /// Add per-round entries to fit configs
    pub fn on_fit_config(mut self, f: impl Fn(Round) -> Config + Send + Sync + 'static) -> Self {
        self.on_fit_config = Some(Arc::new(f));
        self
    }

    /// Add per-round entries to evaluate configs
    pub fn on_evaluate_config(
        mut self,
        f: impl Fn(Round) -> Config + Send + Sync + 'static,
    ) -> Self {
        self.on_evaluate_config = Some(Arc::new(f));
        self
    }

    pub fn config(&self) -> &FedAvgConfig {
        &self.config
    }

    /// Static entries, then the round number, then the per-round builder
    fn round_config(base: &Config, builder: Option<&ConfigFn>, round: Round) -> Config {
        let mut config = base.clone();
        config.insert("round".to_string(), Scalar::from(round));
        if let Some(builder) = builder {
            config.extend(builder(round));
        }
        config
    }

    fn sample(
        &self,
        round: Round,
        client_pool: &[ClientRecord],
        policy: &SamplingPolicy,
    ) -> Result<Vec<ClientId>> {
        let selected = self
            .sampler
            .sample(client_pool.iter().map(|record| &record.id), policy)?;
        debug!(
            round,
            available = client_pool.len(),
            selected = selected.len(),
            "Selected clients"
        );
        Ok(selected)
    }

    fn check_failures(&self, round: Round, failures: &[(ClientId, Failure)]) -> Result<()> {
        if failures.is_empty() {
            return Ok(());
        }
        if !self.config.accept_failures {
            warn!(round, failures = failures.len(), "Rejecting round with failures");
            return Err(AggregationError::FailuresNotAccepted {
                count: failures.len(),
            }
            .into());
        }
        debug!(round, failures = failures.len(), "Aggregating despite failures");
        Ok(())
    }

    /// Aggregate fit results with the given parameter kernel
    pub(crate) fn aggregate_fit_with(
        &self,
        round: Round,
        results: &[(ClientId, FitResult)],
        failures: &[(ClientId, Failure)],
        kernel: fn(&[(ClientId, FitResult)]) -> Result<Parameters>,
    ) -> Result<(Parameters, Metrics)> {
        self.check_failures(round, failures)?;
        let parameters = kernel(results)?;

        let mut ordered: Vec<_> = results.iter().collect();
        ordered.sort_by(|a, b| a.0.cmp(&b.0));
        let metrics = self
            .config
            .fit_metrics
            .apply(ordered.iter().map(|r| (r.1.num_examples, &r.1.metrics)));

        info!(
            round,
            results = results.len(),
            failures = failures.len(),
            "Aggregated fit results"
        );
        Ok((parameters, metrics))
    }
}

impl Strategy for FedAvg {
    fn configure_fit(
        &self,
        round: Round,
        parameters: &Parameters,
        client_pool: &[ClientRecord],
    ) -> Result<Vec<(ClientId, FitInstruction)>> {
        let selected = self.sample(round, client_pool, &self.config.fit)?;
        let config = Self::round_config(
            &self.config.fit_config,
            self.on_fit_config.as_ref(),
            round,
        );

        Ok(selected
            .into_iter()
            .map(|id| {
                let instruction = FitInstruction {
                    parameters: parameters.clone(),
                    config: config.clone(),
                };
                (id, instruction)
            })
            .collect())
    }

    fn aggregate_fit(
        &self,
        round: Round,
        results: &[(ClientId, FitResult)],
        failures: &[(ClientId, Failure)],
    ) -> Result<(Parameters, Metrics)> {
        self.aggregate_fit_with(round, results, failures, aggregate::weighted_average)
    }

    fn configure_evaluate(
        &self,
        round: Round,
        parameters: &Parameters,
        client_pool: &[ClientRecord],
    ) -> Result<Vec<(ClientId, EvaluateInstruction)>> {
        let policy = &self.config.evaluate;
        if policy.fraction == 0.0 && policy.min_clients == 0 {
            debug!(round, "Evaluation disabled");
            return Ok(Vec::new());
        }

        let selected = self.sample(round, client_pool, policy)?;
        let config = Self::round_config(
            &self.config.evaluate_config,
            self.on_evaluate_config.as_ref(),
            round,
        );

        Ok(selected
            .into_iter()
            .map(|id| {
                let instruction = EvaluateInstruction {
                    parameters: parameters.clone(),
                    config: config.clone(),
                };
                (id, instruction)
            })
            .collect())
    }

    fn aggregate_evaluate(
        &self,
        round: Round,
        results: &[(ClientId, EvaluateResult)],
        failures: &[(ClientId, Failure)],
    ) -> Result<(f64, Metrics)> {
        self.check_failures(round, failures)?;
        let loss = aggregate::weighted_loss(results)?;

        let mut ordered: Vec<_> = results.iter().collect();
        ordered.sort_by(|a, b| a.0.cmp(&b.0));
        let metrics = self
            .config
            .evaluate_metrics
            .apply(ordered.iter().map(|r| (r.1.num_examples, &r.1.metrics)));

        info!(round, loss, results = results.len(), "Aggregated evaluation results");
        Ok((loss, metrics))
    }
}
