//! Strategy trait definition

use std::sync::Arc;

use fed_core::{
    ClientId, ClientRecord, EvaluateInstruction, EvaluateResult, Failure, FitInstruction,
    FitResult, Metrics, Parameters, Result, Round,
};

/// Policy deciding who participates in a round, what they are told, and how
/// their results are combined
///
/// The round driver only talks to strategies through these four operations.
/// Implementations must not select clients outside `client_pool`, and their
/// aggregations must not depend on the order of `results`.
pub trait Strategy: Send + Sync {
    /// Pick the clients of a fit round and build their instructions
    ///
    /// # Errors
    /// `InsufficientClients` if the pool is too small for the policy
    fn configure_fit(
        &self,
        round: Round,
        parameters: &Parameters,
        client_pool: &[ClientRecord],
    ) -> Result<Vec<(ClientId, FitInstruction)>>;

    /// Combine fit results into new global parameters and round metrics
    ///
    /// # Errors
    /// `Aggregation` if the results cannot be combined
    fn aggregate_fit(
        &self,
        round: Round,
        results: &[(ClientId, FitResult)],
        failures: &[(ClientId, Failure)],
    ) -> Result<(Parameters, Metrics)>;

    /// Pick the clients of an evaluate round and build their instructions
    ///
    /// An empty list means the strategy does not evaluate this round.
    fn configure_evaluate(
        &self,
        round: Round,
        parameters: &Parameters,
        client_pool: &[ClientRecord],
    ) -> Result<Vec<(ClientId, EvaluateInstruction)>>;

    /// Combine evaluation results into a loss and round metrics
    fn aggregate_evaluate(
        &self,
        round: Round,
        results: &[(ClientId, EvaluateResult)],
        failures: &[(ClientId, Failure)],
    ) -> Result<(f64, Metrics)>;
}

/// Shared handle to a strategy
pub type StrategyHandle = Arc<dyn Strategy>;
