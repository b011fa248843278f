//! Error types for federated round orchestration

use thiserror::Error;

use crate::types::{ClientId, Round};

/// Result type alias using the core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the orchestration engine
#[derive(Error, Debug)]
pub enum Error {
    // Client registry errors
    #[error("Client not found: {client_id}")]
    ClientNotFound { client_id: ClientId },

    #[error("Client already registered: {client_id}")]
    ClientAlreadyRegistered { client_id: ClientId },

    #[error("Client registry full: capacity {capacity}")]
    RegistryFull { capacity: usize },

    // Sampling errors
    #[error("Insufficient clients: {available} available, {required} required")]
    InsufficientClients { available: usize, required: usize },

    #[error("Strategy produced no instructions for round {round}")]
    NoInstructions { round: Round },

    #[error("Strategy selected client outside the round's pool: {client_id}")]
    UnsolicitedClient { client_id: ClientId },

    #[error("Strategy selected client more than once: {client_id}")]
    DuplicateClient { client_id: ClientId },

    // Strategy errors
    #[error("Aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    // Per-client errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // Parameter errors
    #[error("Invalid parameters: {message}")]
    InvalidParameters { message: String },

    #[error("No initial parameters available: {message}")]
    NoInitialParameters { message: String },

    // History errors
    #[error("History out of order: expected round {expected}, got {actual}")]
    HistoryOutOfOrder { expected: Round, actual: Round },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Timeout errors
    #[error("Operation timeout: {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Strategy-level contract violations raised while combining client results
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    #[error("no successful results to aggregate")]
    NoResults,

    #[error("tensor shapes disagree: client {client_id} sent {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        client_id: ClientId,
        expected: Vec<Vec<usize>>,
        actual: Vec<Vec<usize>>,
    },

    #[error("aggregated shapes {actual:?} differ from distributed shapes {expected:?}")]
    ShapeDrift {
        expected: Vec<Vec<usize>>,
        actual: Vec<Vec<usize>>,
    },

    #[error("total example count is zero")]
    ZeroWeight,

    #[error("{count} client failures and failures are not accepted")]
    FailuresNotAccepted { count: usize },
}

/// Failure of a single request/response exchange with a client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("client disconnected")]
    Disconnected,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("client reported error: {0}")]
    Remote(String),
}

impl Error {
    /// Returns true if the error only invalidates the current round, so a
    /// skip policy may continue the job with unchanged parameters
    pub fn is_round_local(&self) -> bool {
        matches!(
            self,
            Error::InsufficientClients { .. }
                | Error::NoInstructions { .. }
                | Error::UnsolicitedClient { .. }
                | Error::DuplicateClient { .. }
                | Error::Aggregation(_)
                | Error::Timeout { .. }
        )
    }

    /// Returns true if the error comes from sampling rather than aggregation
    pub fn is_sampling(&self) -> bool {
        matches!(
            self,
            Error::InsufficientClients { .. }
                | Error::NoInstructions { .. }
                | Error::UnsolicitedClient { .. }
                | Error::DuplicateClient { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
