//! In-process simulation transport
//!
//! Runs client code inside the coordinator process so whole jobs can be
//! simulated without a network. Every exchange still goes through the frame
//! codec, and client work runs on the blocking pool, bounded by a shared
//! [`SimulationPool`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fed_core::{
    ClientId, EvaluateInstruction, EvaluateResult, FitInstruction, FitResult,
    GetParametersInstruction, Parameters, TransportError,
};
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::codec::{self, Instruction, Reply};
use crate::{RemoteClientProxy, Transport};

/// Error type returned by client code
pub type ClientError = Box<dyn std::error::Error + Send + Sync>;

/// Local training and evaluation capability of a client
///
/// Implementations hold the client's private data; the coordinator only ever
/// sees what these methods return.
pub trait Client: Send + Sync + 'static {
    /// Return the current local model parameters
    fn get_parameters(&self, instruction: GetParametersInstruction)
        -> Result<Parameters, ClientError>;

    /// Refine the provided weights using the locally held dataset
    fn fit(&self, instruction: FitInstruction) -> Result<FitResult, ClientError>;

    /// Evaluate the provided weights using the locally held dataset
    fn evaluate(&self, instruction: EvaluateInstruction) -> Result<EvaluateResult, ClientError>;
}

/// Bounded pool shared by all simulated clients
///
/// At most `max_concurrency` client calls execute at once, however many
/// clients a round selects.
#[derive(Debug, Clone)]
pub struct SimulationPool {
    permits: Arc<Semaphore>,
    max_concurrency: usize,
}

impl SimulationPool {
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Number of calls that could start right now
    pub fn idle(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stop accepting work; pending and future calls see a disconnect
    pub fn shutdown(&self) {
        self.permits.close();
    }
}

impl Default for SimulationPool {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::new(threads)
    }
}

/// Transport delivering frames to an in-process [`Client`]
#[derive(Clone)]
pub struct InProcessTransport {
    /// Client code
    client: Arc<dyn Client>,

    /// Shared execution pool
    pool: SimulationPool,

    /// Whether the simulated connection is up
    online: Arc<AtomicBool>,

    /// Simulated network delay before the client starts working
    latency: Duration,
}

impl InProcessTransport {
    pub fn new(client: Arc<dyn Client>, pool: SimulationPool) -> Self {
        Self {
            client,
            pool,
            online: Arc::new(AtomicBool::new(true)),
            latency: Duration::ZERO,
        }
    }

    /// Delay every exchange by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Bring the simulated connection up or down; clones share the switch
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Wrap in a proxy addressed by `id`
    pub fn into_proxy(self, id: ClientId) -> RemoteClientProxy<Self> {
        RemoteClientProxy::new(id, self)
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    #[instrument(skip(self, request), fields(transport = "in_process", size = request.len()))]
    async fn send(&self, request: Bytes) -> Result<Bytes, TransportError> {
        if !self.is_online() {
            return Err(TransportError::Disconnected);
        }

        let permit = Arc::clone(&self.pool.permits)
            .acquire_owned()
            .await
            .map_err(|_| TransportError::Disconnected)?;

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let client = Arc::clone(&self.client);
        let handle = tokio::task::spawn_blocking(move || {
            // The permit is held until the client returns, even if the
            // caller stops waiting
            let _permit = permit;
            execute(client.as_ref(), &request)
        });

        let reply = match handle.await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Simulated client panicked");
                Reply::Error {
                    reason: format!("client panicked: {}", e),
                }
            }
        };

        if !self.is_online() {
            debug!("Simulated client went offline before replying");
            return Err(TransportError::Disconnected);
        }

        codec::encode_reply(&reply)
    }
}

/// Decode one instruction, run it against the client and build the reply
fn execute(client: &dyn Client, request: &[u8]) -> Reply {
    let instruction = match codec::decode_instruction(request) {
        Ok(instruction) => instruction,
        Err(e) => {
            return Reply::Error {
                reason: e.to_string(),
            }
        }
    };

    let outcome = match instruction {
        Instruction::GetParameters(ins) => client.get_parameters(ins).map(Reply::Parameters),
        Instruction::Fit(ins) => client.fit(ins).map(Reply::Fit),
        Instruction::Evaluate(ins) => client.evaluate(ins).map(Reply::Evaluate),
    };

    outcome.unwrap_or_else(|e| Reply::Error {
        reason: e.to_string(),
    })
}
