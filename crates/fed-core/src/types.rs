//! Core type definitions for federated round orchestration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::TransportError;
use crate::parameters::Parameters;

/// Round counter, starting at 1
pub type Round = u64;

/// Opaque identifier of a connected client
///
/// Stable for the lifetime of one connection; a client that reconnects may
/// come back under a different id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Scalar value carried in configs, metrics and client properties
///
/// The orchestrator never interprets these, except for averaging numeric
/// metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Scalar {
    /// Numeric view of the scalar, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<u64> for Scalar {
    fn from(v: u64) -> Self {
        Scalar::Int(v as i64)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Str(v)
    }
}

/// Named metric values reported by clients or produced by aggregation
pub type Metrics = BTreeMap<String, Scalar>;

/// Per-round configuration sent to clients alongside parameters
pub type Config = BTreeMap<String, Scalar>;

/// Properties a client declares on registration (e.g. sample count)
pub type Properties = BTreeMap<String, Scalar>;

/// Request for a client's current local parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetParametersInstruction {
    pub config: Config,
}

/// Instruction to train locally starting from the given parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitInstruction {
    pub parameters: Parameters,
    pub config: Config,
}

/// Instruction to evaluate the given parameters on local data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateInstruction {
    pub parameters: Parameters,
    pub config: Config,
}

/// Outcome of local training on one client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub parameters: Parameters,
    pub num_examples: u64,
    pub metrics: Metrics,
}

/// Outcome of local evaluation on one client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateResult {
    pub loss: f64,
    pub num_examples: u64,
    pub metrics: Metrics,
}

/// Why a dispatched client did not contribute a result to its round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Failure {
    /// No reply before the round deadline
    Timeout,

    /// The client or the exchange with it reported an error
    ClientError { reason: String },

    /// The client dropped its connection
    Disconnected,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Timeout => f.write_str("timeout"),
            Failure::ClientError { reason } => write!(f, "client error: {}", reason),
            Failure::Disconnected => f.write_str("disconnected"),
        }
    }
}

impl From<TransportError> for Failure {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Disconnected => Failure::Disconnected,
            other => Failure::ClientError {
                reason: other.to_string(),
            },
        }
    }
}

/// Kind of work performed in a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundKind {
    Fit,
    Evaluate,
}

impl fmt::Display for RoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundKind::Fit => f.write_str("fit"),
            RoundKind::Evaluate => f.write_str("evaluate"),
        }
    }
}
