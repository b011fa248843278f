//! Client proxy: the coordinator-side handle to one remote client

use std::sync::Arc;

use async_trait::async_trait;
use fed_core::{
    ClientId, EvaluateInstruction, EvaluateResult, FitInstruction, FitResult,
    GetParametersInstruction, Parameters, TransportError,
};
use tracing::{debug, instrument};

use crate::codec::{self, Instruction, Reply};
use crate::Transport;

/// Invocable capabilities of one client
///
/// Calls do not retry; any failure is returned immediately so the round
/// driver can account for it within the round's deadline.
#[async_trait]
pub trait ClientProxy: Send + Sync {
    /// Identifier of the client behind this proxy
    fn id(&self) -> &ClientId;

    /// Fetch the client's current local parameters
    async fn get_parameters(
        &self,
        instruction: GetParametersInstruction,
    ) -> Result<Parameters, TransportError>;

    /// Train locally starting from the instruction's parameters
    async fn fit(&self, instruction: FitInstruction) -> Result<FitResult, TransportError>;

    /// Evaluate the instruction's parameters on local data
    async fn evaluate(
        &self,
        instruction: EvaluateInstruction,
    ) -> Result<EvaluateResult, TransportError>;
}

/// Shared handle to a client proxy
pub type ClientProxyHandle = Arc<dyn ClientProxy>;

/// Proxy that frames every call through the codec and a [`Transport`]
#[derive(Debug, Clone)]
pub struct RemoteClientProxy<T> {
    id: ClientId,
    transport: T,
}

impl<T: Transport> RemoteClientProxy<T> {
    pub fn new(id: ClientId, transport: T) -> Self {
        Self { id, transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn call(&self, instruction: Instruction) -> Result<Reply, TransportError> {
        let name = instruction.name();
        let request = codec::encode_instruction(&instruction)?;
        let response = self.transport.send(request).await?;

        match codec::decode_reply(&response)? {
            Reply::Error { reason } => {
                debug!(client_id = %self.id, call = name, %reason, "Client reported error");
                Err(TransportError::Remote(reason))
            }
            reply => Ok(reply),
        }
    }
}

fn unexpected(expected: &str, reply: &Reply) -> TransportError {
    let actual = match reply {
        Reply::Parameters(_) => "parameters",
        Reply::Fit(_) => "fit",
        Reply::Evaluate(_) => "evaluate",
        Reply::Error { .. } => "error",
    };
    TransportError::Malformed(format!("expected {} reply, got {}", expected, actual))
}

#[async_trait]
impl<T: Transport> ClientProxy for RemoteClientProxy<T> {
    fn id(&self) -> &ClientId {
        &self.id
    }

    #[instrument(skip(self, instruction), fields(client_id = %self.id))]
    async fn get_parameters(
        &self,
        instruction: GetParametersInstruction,
    ) -> Result<Parameters, TransportError> {
        match self.call(Instruction::GetParameters(instruction)).await? {
            Reply::Parameters(parameters) => Ok(parameters),
            other => Err(unexpected("parameters", &other)),
        }
    }

    #[instrument(skip(self, instruction), fields(client_id = %self.id))]
    async fn fit(&self, instruction: FitInstruction) -> Result<FitResult, TransportError> {
        match self.call(Instruction::Fit(instruction)).await? {
            Reply::Fit(result) => Ok(result),
            other => Err(unexpected("fit", &other)),
        }
    }

    #[instrument(skip(self, instruction), fields(client_id = %self.id))]
    async fn evaluate(
        &self,
        instruction: EvaluateInstruction,
    ) -> Result<EvaluateResult, TransportError> {
        match self.call(Instruction::Evaluate(instruction)).await? {
            Reply::Evaluate(result) => Ok(result),
            other => Err(unexpected("evaluate", &other)),
        }
    }
}
