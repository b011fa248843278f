//! Simulated clients shared by the scenario tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use client_proxy::{Client, ClientError, InProcessTransport, SimulationPool};
use coordinator::ClientConnections;
use fed_core::{
    ClientId, EvaluateInstruction, EvaluateResult, FitInstruction, FitResult,
    GetParametersInstruction, Metrics, Parameters, Properties, Scalar, Tensor,
};

/// Install a test subscriber once; honours RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .try_init();
}

pub fn parameters(values: Vec<f32>) -> Parameters {
    Parameters::new(vec![Tensor::from_vec(values)])
}

/// Returns its own values from every fit, and their mean as loss
pub struct ConstantClient {
    pub values: Vec<f32>,
    pub num_examples: u64,
}

impl ConstantClient {
    pub fn new(values: Vec<f32>, num_examples: u64) -> Self {
        Self {
            values,
            num_examples,
        }
    }
}

impl Client for ConstantClient {
    fn get_parameters(
        &self,
        _instruction: GetParametersInstruction,
    ) -> Result<Parameters, ClientError> {
        Ok(parameters(self.values.clone()))
    }

    fn fit(&self, _instruction: FitInstruction) -> Result<FitResult, ClientError> {
        let mut metrics = Metrics::new();
        metrics.insert("examples".to_string(), Scalar::from(self.num_examples));
        Ok(FitResult {
            parameters: parameters(self.values.clone()),
            num_examples: self.num_examples,
            metrics,
        })
    }

    fn evaluate(&self, _instruction: EvaluateInstruction) -> Result<EvaluateResult, ClientError> {
        let loss = self.values.iter().map(|v| *v as f64).sum::<f64>() / self.values.len() as f64;
        Ok(EvaluateResult {
            loss,
            num_examples: self.num_examples,
            metrics: Metrics::new(),
        })
    }
}

/// Moves the global model halfway toward a local target every round
pub struct TargetClient {
    pub target: Vec<f32>,
    pub num_examples: u64,
}

impl TargetClient {
    fn distance(&self, values: &[f32]) -> f64 {
        values
            .iter()
            .zip(&self.target)
            .map(|(v, t)| ((v - t) as f64).powi(2))
            .sum()
    }
}

impl Client for TargetClient {
    fn get_parameters(
        &self,
        _instruction: GetParametersInstruction,
    ) -> Result<Parameters, ClientError> {
        Ok(parameters(vec![0.0; self.target.len()]))
    }

    fn fit(&self, instruction: FitInstruction) -> Result<FitResult, ClientError> {
        let current = instruction.parameters.tensors()[0].values();
        let updated = current
            .iter()
            .zip(&self.target)
            .map(|(v, t)| v + 0.5 * (t - v))
            .collect();
        Ok(FitResult {
            parameters: parameters(updated),
            num_examples: self.num_examples,
            metrics: Metrics::new(),
        })
    }

    fn evaluate(&self, instruction: EvaluateInstruction) -> Result<EvaluateResult, ClientError> {
        Ok(EvaluateResult {
            loss: self.distance(instruction.parameters.tensors()[0].values()),
            num_examples: self.num_examples,
            metrics: Metrics::new(),
        })
    }
}

/// Fails every call with a client-side error
pub struct BrokenClient;

impl Client for BrokenClient {
    fn get_parameters(
        &self,
        _instruction: GetParametersInstruction,
    ) -> Result<Parameters, ClientError> {
        Err("no model loaded".into())
    }

    fn fit(&self, _instruction: FitInstruction) -> Result<FitResult, ClientError> {
        Err("CUDA out of memory".into())
    }

    fn evaluate(&self, _instruction: EvaluateInstruction) -> Result<EvaluateResult, ClientError> {
        Err("CUDA out of memory".into())
    }
}

/// Sleeps inside the blocking pool and records peak concurrency
pub struct BusyClient {
    pub work: Duration,
    pub running: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

impl Client for BusyClient {
    fn get_parameters(
        &self,
        _instruction: GetParametersInstruction,
    ) -> Result<Parameters, ClientError> {
        Ok(parameters(vec![0.0]))
    }

    fn fit(&self, instruction: FitInstruction) -> Result<FitResult, ClientError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.work);
        self.running.fetch_sub(1, Ordering::SeqCst);

        Ok(FitResult {
            parameters: instruction.parameters,
            num_examples: 1,
            metrics: Metrics::new(),
        })
    }

    fn evaluate(&self, _instruction: EvaluateInstruction) -> Result<EvaluateResult, ClientError> {
        Ok(EvaluateResult {
            loss: 0.0,
            num_examples: 1,
            metrics: Metrics::new(),
        })
    }
}

/// Connect an in-process client and return its transport for later control
pub fn connect(
    connections: &ClientConnections,
    pool: &SimulationPool,
    id: &str,
    client: impl Client,
    latency: Duration,
) -> InProcessTransport {
    let transport = InProcessTransport::new(Arc::new(client), pool.clone()).with_latency(latency);
    let proxy = transport.clone().into_proxy(ClientId::new(id));
    connections
        .connect(Arc::new(proxy), Properties::new())
        .expect("client should register");
    transport
}
