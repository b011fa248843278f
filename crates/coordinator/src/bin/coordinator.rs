//! Coordinator binary entry point
//!
//! Runs a simulated federated job against in-process clients.
//!
//! Usage: `coordinator [config.json] [num_clients]`

use std::sync::Arc;

use client_proxy::{Client, ClientError, InProcessTransport, SimulationPool};
use fed_core::{
    ClientId, EvaluateInstruction, EvaluateResult, FitInstruction, FitResult,
    GetParametersInstruction, Metrics, Parameters, Properties, Scalar, Tensor,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coordinator::{ClientConnections, CoordinatorConfig, RoundDriver};

const DIMENSION: usize = 8;

/// Client pulling the model toward its own local optimum
struct QuadraticClient {
    optimum: Vec<f32>,
    num_examples: u64,
}

impl QuadraticClient {
    fn new(index: usize) -> Self {
        let optimum = (0..DIMENSION)
            .map(|i| ((index * 7 + i * 3) % 11) as f32 / 10.0)
            .collect();
        Self {
            optimum,
            num_examples: 20 + (index as u64 % 5) * 10,
        }
    }

    fn loss(&self, values: &[f32]) -> f64 {
        let sum: f64 = values
            .iter()
            .zip(&self.optimum)
            .map(|(v, o)| ((v - o) as f64).powi(2))
            .sum();
        sum / DIMENSION as f64
    }
}

fn weights(parameters: &Parameters) -> Result<&[f32], ClientError> {
    parameters
        .tensors()
        .first()
        .map(|tensor| tensor.values())
        .ok_or_else(|| "parameters have no tensors".into())
}

impl Client for QuadraticClient {
    fn get_parameters(
        &self,
        _instruction: GetParametersInstruction,
    ) -> Result<Parameters, ClientError> {
        Ok(Parameters::new(vec![Tensor::zeros(vec![DIMENSION])?]))
    }

    fn fit(&self, instruction: FitInstruction) -> Result<FitResult, ClientError> {
        let lr = instruction
            .config
            .get("lr")
            .and_then(Scalar::as_f64)
            .unwrap_or(0.5) as f32;

        let updated: Vec<f32> = weights(&instruction.parameters)?
            .iter()
            .zip(&self.optimum)
            .map(|(v, o)| v + lr * (o - v))
            .collect();

        let mut metrics = Metrics::new();
        metrics.insert("train_loss".to_string(), Scalar::Float(self.loss(&updated)));
        Ok(FitResult {
            parameters: Parameters::new(vec![Tensor::new(vec![DIMENSION], updated)?]),
            num_examples: self.num_examples,
            metrics,
        })
    }

    fn evaluate(&self, instruction: EvaluateInstruction) -> Result<EvaluateResult, ClientError> {
        Ok(EvaluateResult {
            loss: self.loss(weights(&instruction.parameters)?),
            num_examples: self.num_examples,
            metrics: Metrics::new(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coordinator=info,strategy=info,fed_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => CoordinatorConfig::from_json_file(&path)?,
        None => CoordinatorConfig::default(),
    };
    let num_clients: usize = match args.next() {
        Some(n) => n.parse()?,
        None => 10,
    };

    let connections = Arc::new(ClientConnections::new(config.job.max_clients));
    let pool = SimulationPool::default();
    tracing::info!(
        num_clients,
        max_concurrency = pool.max_concurrency(),
        "Starting simulated clients"
    );

    for index in 0..num_clients {
        let client = QuadraticClient::new(index);
        let mut properties = Properties::new();
        properties.insert("num_examples".to_string(), Scalar::from(client.num_examples));

        let proxy = InProcessTransport::new(Arc::new(client), pool.clone())
            .into_proxy(ClientId::new(format!("client-{:03}", index)));
        connections.connect(Arc::new(proxy), properties)?;
    }

    let driver = RoundDriver::from_config(&config, connections)?;
    let report = driver.run(None).await?;
    pool.shutdown();

    println!("{}", serde_json::to_string_pretty(&report.summary())?);
    Ok(())
}
