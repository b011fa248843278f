//! Fed Core - Foundation for federated round orchestration
//!
//! Provides core types, error handling, job configuration, the client
//! registry and the round history shared by the sampling, proxy, strategy
//! and coordinator crates.

pub mod config;
pub mod error;
pub mod history;
pub mod parameters;
pub mod registry;
pub mod types;

pub use config::{FailurePolicy, JobConfig, RoundSchedule, SamplingPolicy};
pub use error::{AggregationError, Error, Result, TransportError};
pub use history::{History, RoundOutcome, RoundResult, RoundStatus};
pub use parameters::{Parameters, Tensor};
pub use registry::{ClientRecord, ClientRegistry, ClientRegistryHandle, ClientState};
pub use types::*;
