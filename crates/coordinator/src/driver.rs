//! Round driver
//!
//! Runs a federated job one round at a time. Each round moves through
//! `Sampling → Dispatching → Collecting → Aggregating`; every transition is
//! logged. Client calls fan out as one task per client and are cut off at a
//! hard deadline measured from dispatch start.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use client_proxy::ClientProxyHandle;
use client_sampling::Sampler;
use fed_core::{
    AggregationError, ClientId, ClientRecord, Error, EvaluateInstruction, EvaluateResult,
    Failure, FailurePolicy, FitInstruction, FitResult, GetParametersInstruction, History,
    JobConfig, Parameters, Result, Round, RoundKind, RoundOutcome, SamplingPolicy,
    TransportError,
};
use parking_lot::Mutex;
use strategy::StrategyHandle;
use tokio::task::{self, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::CoordinatorConfig;
use crate::connections::ClientConnectionsHandle;
use crate::report::{JobReport, JobStatus};

/// Where the driver is within the current round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Idle,
    Sampling,
    Dispatching,
    Collecting,
    Aggregating,
    Done,
    Aborted,
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundState::Idle => "idle",
            RoundState::Sampling => "sampling",
            RoundState::Dispatching => "dispatching",
            RoundState::Collecting => "collecting",
            RoundState::Aggregating => "aggregating",
            RoundState::Done => "done",
            RoundState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

type CallFuture<R> = Pin<Box<dyn Future<Output = std::result::Result<R, TransportError>> + Send>>;

/// An instruction the driver can send to a client
trait Dispatch: Send + 'static {
    type Reply: Send + 'static;

    fn call(self, proxy: ClientProxyHandle) -> CallFuture<Self::Reply>;
}

impl Dispatch for FitInstruction {
    type Reply = FitResult;

    fn call(self, proxy: ClientProxyHandle) -> CallFuture<FitResult> {
        Box::pin(async move { proxy.fit(self).await })
    }
}

impl Dispatch for EvaluateInstruction {
    type Reply = EvaluateResult;

    fn call(self, proxy: ClientProxyHandle) -> CallFuture<EvaluateResult> {
        Box::pin(async move { proxy.evaluate(self).await })
    }
}

/// Replies gathered before the deadline; every dispatched client lands in
/// exactly one of the two lists
struct Collected<R> {
    results: Vec<(ClientId, R)>,
    failures: Vec<(ClientId, Failure)>,
}

impl<R> Collected<R> {
    fn failure_map(&self) -> BTreeMap<ClientId, Failure> {
        self.failures.iter().cloned().collect()
    }
}

/// A round that produced no outcome
struct RoundAbort {
    error: Error,
    num_results: usize,
    failures: BTreeMap<ClientId, Failure>,
}

impl From<Error> for RoundAbort {
    fn from(error: Error) -> Self {
        Self {
            error,
            num_results: 0,
            failures: BTreeMap::new(),
        }
    }
}

/// Drives the rounds of one federated job
pub struct RoundDriver {
    config: JobConfig,
    strategy: StrategyHandle,
    connections: ClientConnectionsHandle,
    min_available_clients: usize,
    sampler: Sampler,
    state: Mutex<RoundState>,
}

impl RoundDriver {
    pub fn new(
        config: JobConfig,
        strategy: StrategyHandle,
        connections: ClientConnectionsHandle,
    ) -> Self {
        let sampler = match config.seed {
            Some(seed) => Sampler::with_seed(seed),
            None => Sampler::new(),
        };

        Self {
            config,
            strategy,
            connections,
            min_available_clients: 1,
            sampler,
            state: Mutex::new(RoundState::Idle),
        }
    }

    /// Build the strategy from configuration and wire up a driver
    pub fn from_config(
        config: &CoordinatorConfig,
        connections: ClientConnectionsHandle,
    ) -> Result<Self> {
        config.validate()?;
        let strategy = config.strategy.build(config.job.seed)?;
        Ok(Self::new(config.job.clone(), strategy, connections)
            .with_min_available_clients(config.strategy.min_available_clients()))
    }

    /// Clients to wait for before sampling, when a client wait is configured
    pub fn with_min_available_clients(mut self, count: usize) -> Self {
        self.min_available_clients = count;
        self
    }

    pub fn state(&self) -> RoundState {
        *self.state.lock()
    }

    pub fn connections(&self) -> &ClientConnectionsHandle {
        &self.connections
    }

    /// Run every configured round
    ///
    /// Without `initial` parameters, one randomly chosen client is asked for
    /// its local parameters first.
    ///
    /// # Errors
    /// Only when the job cannot start: invalid configuration or no initial
    /// parameters. Round failures are reported through [`JobStatus`].
    pub async fn run(&self, initial: Option<Parameters>) -> Result<JobReport> {
        self.config.validate()?;

        let mut parameters = match initial {
            Some(parameters) => parameters,
            None => self.initial_parameters().await?,
        };
        let mut history = History::new();

        info!(
            num_rounds = self.config.num_rounds,
            num_parameters = parameters.num_elements(),
            "Starting federated job"
        );

        for round in 1..=self.config.num_rounds {
            let kind = self.config.schedule.kind(round);
            info!(round, %kind, "Starting round");

            let result = match kind {
                RoundKind::Fit => self.fit_round(round, &parameters).await,
                RoundKind::Evaluate => self.evaluate_round(round, &parameters).await,
            };

            match result {
                Ok(outcome) => {
                    if let Some(updated) = outcome.parameters() {
                        parameters = updated.clone();
                    }
                    info!(
                        round,
                        %kind,
                        results = outcome.num_results,
                        failures = outcome.failures.len(),
                        "Round completed"
                    );
                    history.append(outcome)?;
                    self.transition(round, RoundState::Idle);
                }
                Err(abort) => {
                    self.transition(round, RoundState::Aborted);
                    match self.policy_for(&abort.error) {
                        FailurePolicy::Skip => {
                            warn!(round, %kind, error = %abort.error, "Round skipped");
                            history.append(RoundOutcome::failed(
                                round,
                                kind,
                                abort.error.to_string(),
                                abort.num_results,
                                abort.failures,
                            ))?;
                        }
                        FailurePolicy::Halt => {
                            error!(round, %kind, error = %abort.error, "Job aborted");
                            return Ok(JobReport {
                                history,
                                parameters,
                                status: JobStatus::Aborted {
                                    round,
                                    error: abort.error,
                                    failed_clients: abort.failures.into_keys().collect(),
                                },
                            });
                        }
                    }
                }
            }
        }

        self.transition(self.config.num_rounds, RoundState::Done);
        info!(
            rounds = history.len(),
            failed_rounds = history.failed_rounds(),
            "Federated job finished"
        );
        Ok(JobReport {
            history,
            parameters,
            status: JobStatus::Completed,
        })
    }

    fn transition(&self, round: Round, state: RoundState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        debug!(round, from = %previous, to = %state, "Round state changed");
    }

    fn policy_for(&self, error: &Error) -> FailurePolicy {
        if error.is_sampling() {
            self.config.on_sampling_error
        } else if error.is_round_local() {
            self.config.on_aggregation_error
        } else {
            FailurePolicy::Halt
        }
    }

    async fn initial_parameters(&self) -> Result<Parameters> {
        let unavailable = |message: String| Error::NoInitialParameters { message };

        if let Some(timeout) = self.config.client_wait_timeout {
            self.connections
                .registry()
                .wait_for(1, timeout)
                .await
                .map_err(|e| unavailable(e.to_string()))?;
        }

        let available = self.connections.registry().list_available();
        let id = self
            .sampler
            .sample(&available, &SamplingPolicy::new(1, 0.0, 1))
            .map_err(|e| unavailable(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| unavailable("no client selected".to_string()))?;
        let proxy = self
            .connections
            .proxy(&id)
            .ok_or_else(|| unavailable(format!("client {} is gone", id)))?;

        info!(client_id = %id, "Requesting initial parameters");
        let request = proxy.get_parameters(GetParametersInstruction::default());
        match tokio::time::timeout(self.config.round_timeout, request).await {
            Ok(Ok(parameters)) => {
                self.connections.registry().touch(&id);
                Ok(parameters)
            }
            Ok(Err(err)) => Err(unavailable(format!("client {} failed: {}", id, err))),
            Err(_) => Err(unavailable(format!(
                "client {} did not answer within {}ms",
                id,
                self.config.round_timeout.as_millis()
            ))),
        }
    }

    async fn fit_round(
        &self,
        round: Round,
        parameters: &Parameters,
    ) -> std::result::Result<RoundOutcome, RoundAbort> {
        let pool = self.client_pool(round).await;
        let instructions = self.strategy.configure_fit(round, parameters, &pool)?;
        check_instructions(round, &instructions, &pool)?;

        let collected = self.dispatch(round, instructions).await;
        self.transition(round, RoundState::Aggregating);

        let failures = collected.failure_map();
        let aggregated = self
            .strategy
            .aggregate_fit(round, &collected.results, &collected.failures)
            .and_then(|(aggregated, metrics)| {
                // an empty global model has no shape to hold results to
                if !parameters.is_empty() && !aggregated.same_shape(parameters) {
                    return Err(AggregationError::ShapeDrift {
                        expected: parameters.shape_signature(),
                        actual: aggregated.shape_signature(),
                    }
                    .into());
                }
                Ok((aggregated, metrics))
            });

        match aggregated {
            Ok((aggregated, metrics)) => Ok(RoundOutcome::fit(
                round,
                aggregated,
                metrics,
                collected.results.len(),
                failures,
            )),
            Err(error) => Err(RoundAbort {
                error,
                num_results: collected.results.len(),
                failures,
            }),
        }
    }

    async fn evaluate_round(
        &self,
        round: Round,
        parameters: &Parameters,
    ) -> std::result::Result<RoundOutcome, RoundAbort> {
        let pool = self.client_pool(round).await;
        let instructions = self
            .strategy
            .configure_evaluate(round, parameters, &pool)?;
        check_instructions(round, &instructions, &pool)?;

        let collected = self.dispatch(round, instructions).await;
        self.transition(round, RoundState::Aggregating);

        let failures = collected.failure_map();
        match self
            .strategy
            .aggregate_evaluate(round, &collected.results, &collected.failures)
        {
            Ok((loss, metrics)) => Ok(RoundOutcome::evaluate(
                round,
                loss,
                metrics,
                collected.results.len(),
                failures,
            )),
            Err(error) => Err(RoundAbort {
                error,
                num_results: collected.results.len(),
                failures,
            }),
        }
    }

    /// Snapshot of the clients the strategy may choose from
    async fn client_pool(&self, round: Round) -> Vec<ClientRecord> {
        self.transition(round, RoundState::Sampling);

        if let Some(timeout) = self.config.client_wait_timeout {
            let registry = self.connections.registry();
            if let Err(e) = registry.wait_for(self.min_available_clients, timeout).await {
                warn!(round, error = %e, "Sampling with fewer clients than wanted");
            }
        }

        let pool = self.connections.registry().snapshot();
        debug!(round, available = pool.len(), "Client pool snapshot");
        pool
    }

    /// Send every instruction concurrently and collect until the deadline
    async fn dispatch<I: Dispatch>(
        &self,
        round: Round,
        instructions: Vec<(ClientId, I)>,
    ) -> Collected<I::Reply> {
        self.transition(round, RoundState::Dispatching);
        let deadline = Instant::now() + self.config.round_timeout;

        let mut collected = Collected {
            results: Vec::new(),
            failures: Vec::new(),
        };
        // task id -> client still owed a reply
        let mut pending: HashMap<task::Id, ClientId> = HashMap::new();
        let mut tasks = JoinSet::new();

        for (id, instruction) in instructions {
            let Some(proxy) = self.connections.proxy(&id) else {
                debug!(round, client_id = %id, "Client left before dispatch");
                collected.failures.push((id, Failure::Disconnected));
                continue;
            };
            let call = instruction.call(proxy);
            let handle = tasks.spawn(call);
            pending.insert(handle.id(), id);
        }
        debug!(round, dispatched = pending.len(), "Instructions dispatched");

        self.transition(round, RoundState::Collecting);
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next_with_id()).await {
                Ok(Some(Ok((task_id, reply)))) => {
                    if let Some(id) = pending.remove(&task_id) {
                        self.record_reply(round, id, reply, &mut collected);
                    }
                }
                Ok(Some(Err(e))) => {
                    if let Some(id) = pending.remove(&e.id()) {
                        warn!(round, client_id = %id, error = %e, "Dispatch task failed");
                        collected.failures.push((
                            id,
                            Failure::ClientError {
                                reason: format!("dispatch task failed: {}", e),
                            },
                        ));
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    // late replies are dropped with the tasks
                    tasks.abort_all();
                    warn!(round, pending = pending.len(), "Round deadline passed");
                    break;
                }
            }
        }

        collected
            .failures
            .extend(pending.into_values().map(|id| (id, Failure::Timeout)));

        debug!(
            round,
            results = collected.results.len(),
            failures = collected.failures.len(),
            "Collection finished"
        );
        collected
    }

    fn record_reply<R>(
        &self,
        round: Round,
        id: ClientId,
        reply: std::result::Result<R, TransportError>,
        collected: &mut Collected<R>,
    ) {
        match reply {
            Ok(result) => {
                self.connections.registry().touch(&id);
                collected.results.push((id, result));
            }
            Err(err) => {
                if err == TransportError::Disconnected {
                    if let Err(e) = self.connections.mark_disconnected(&id) {
                        debug!(round, client_id = %id, error = %e, "Client already removed");
                    }
                }
                warn!(round, client_id = %id, error = %err, "Client failed");
                collected.failures.push((id, Failure::from(err)));
            }
        }
    }
}

/// Reject empty rounds, clients outside the pool and clients selected twice
fn check_instructions<I>(
    round: Round,
    instructions: &[(ClientId, I)],
    pool: &[ClientRecord],
) -> Result<()> {
    if instructions.is_empty() {
        return Err(Error::NoInstructions { round });
    }

    let known: BTreeSet<&ClientId> = pool.iter().map(|record| &record.id).collect();
    let mut selected = BTreeSet::new();
    for (id, _) in instructions {
        if !known.contains(id) {
            return Err(Error::UnsolicitedClient {
                client_id: id.clone(),
            });
        }
        if !selected.insert(id) {
            return Err(Error::DuplicateClient {
                client_id: id.clone(),
            });
        }
    }
    Ok(())
}
