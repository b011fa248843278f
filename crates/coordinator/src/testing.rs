//! Scripted client proxies for driver tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use client_proxy::{ClientProxy, ClientProxyHandle};
use fed_core::{
    ClientId, EvaluateInstruction, EvaluateResult, FitInstruction, FitResult,
    GetParametersInstruction, Metrics, Parameters, Tensor, TransportError,
};

/// Replies with fixed parameters after an optional delay
pub(crate) struct StaticProxy {
    id: ClientId,
    values: Vec<f32>,
    num_examples: u64,
    delay: Duration,
    error: Option<TransportError>,
    panics: bool,
    calls: Arc<AtomicUsize>,
}

impl StaticProxy {
    pub(crate) fn new(id: &str, values: Vec<f32>) -> Self {
        Self {
            id: ClientId::new(id),
            values,
            num_examples: 10,
            delay: Duration::ZERO,
            error: None,
            panics: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn handle(id: &str, values: Vec<f32>) -> ClientProxyHandle {
        Self::new(id, values).into_handle()
    }

    pub(crate) fn examples(mut self, num_examples: u64) -> Self {
        self.num_examples = num_examples;
        self
    }

    pub(crate) fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn failing(mut self, error: TransportError) -> Self {
        self.error = Some(error);
        self
    }

    pub(crate) fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub(crate) fn into_handle(self) -> ClientProxyHandle {
        Arc::new(self)
    }

    async fn respond(&self) -> Result<Parameters, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.panics {
            panic!("client {} crashed", self.id);
        }
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(Parameters::new(vec![Tensor::from_vec(self.values.clone())])),
        }
    }
}

#[async_trait]
impl ClientProxy for StaticProxy {
    fn id(&self) -> &ClientId {
        &self.id
    }

    async fn get_parameters(
        &self,
        _instruction: GetParametersInstruction,
    ) -> Result<Parameters, TransportError> {
        self.respond().await
    }

    async fn fit(&self, _instruction: FitInstruction) -> Result<FitResult, TransportError> {
        let parameters = self.respond().await?;
        Ok(FitResult {
            parameters,
            num_examples: self.num_examples,
            metrics: Metrics::new(),
        })
    }

    async fn evaluate(
        &self,
        _instruction: EvaluateInstruction,
    ) -> Result<EvaluateResult, TransportError> {
        self.respond().await?;
        Ok(EvaluateResult {
            loss: self.values.first().copied().unwrap_or_default() as f64,
            num_examples: self.num_examples,
            metrics: Metrics::new(),
        })
    }
}
