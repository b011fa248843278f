//! Job configuration types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use crate::types::{Round, RoundKind};
use crate::{Error, Result};

/// Round-loop configuration for one federated job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Number of rounds to run
    pub num_rounds: u64,

    /// Wall-clock budget for one round, measured from dispatch start
    #[serde(with = "humantime_serde")]
    pub round_timeout: Duration,

    /// Which rounds train and which evaluate
    pub schedule: RoundSchedule,

    /// Seed for client sampling; random when unset
    pub seed: Option<u64>,

    /// What to do when a round cannot find enough clients
    pub on_sampling_error: FailurePolicy,

    /// What to do when a strategy rejects a round's results
    pub on_aggregation_error: FailurePolicy,

    /// How long a round may wait for enough clients to connect
    #[serde(with = "humantime_serde::option")]
    pub client_wait_timeout: Option<Duration>,

    /// Maximum number of clients the registry accepts
    pub max_clients: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            num_rounds: 3,
            round_timeout: Duration::from_secs(600),
            schedule: RoundSchedule::default(),
            seed: None,
            on_sampling_error: FailurePolicy::Skip,
            on_aggregation_error: FailurePolicy::Halt,
            client_wait_timeout: None,
            max_clients: 10000,
        }
    }
}

impl JobConfig {
    /// Load a job configuration from a JSON file and validate it
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: JobConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the round loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.num_rounds == 0 {
            return Err(invalid("num_rounds must be at least 1"));
        }
        if self.round_timeout.is_zero() {
            return Err(invalid("round_timeout must be positive"));
        }
        if self.max_clients == 0 {
            return Err(invalid("max_clients must be at least 1"));
        }
        self.schedule.validate()
    }
}

/// Decides which rounds are fit rounds and which are evaluate rounds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundSchedule {
    /// Every round trains
    #[default]
    FitOnly,

    /// Every `interval`-th round evaluates, the rest train
    EvaluateEvery { interval: u64 },

    /// The listed rounds evaluate, the rest train
    Explicit { evaluate_rounds: BTreeSet<Round> },
}

impl RoundSchedule {
    pub fn kind(&self, round: Round) -> RoundKind {
        let evaluate = match self {
            RoundSchedule::FitOnly => false,
            RoundSchedule::EvaluateEvery { interval } => *interval > 0 && round % interval == 0,
            RoundSchedule::Explicit { evaluate_rounds } => evaluate_rounds.contains(&round),
        };
        if evaluate {
            RoundKind::Evaluate
        } else {
            RoundKind::Fit
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            RoundSchedule::EvaluateEvery { interval: 0 } => {
                Err(invalid("evaluation interval must be at least 1"))
            }
            RoundSchedule::Explicit { evaluate_rounds } if evaluate_rounds.contains(&0) => {
                Err(invalid("rounds are numbered from 1"))
            }
            _ => Ok(()),
        }
    }
}

/// Reaction to a round that has to be aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Stop the job and report the aborted round
    Halt,

    /// Record the round as failed and continue with unchanged parameters
    Skip,
}

/// Client sampling policy for one phase (fit or evaluate)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingPolicy {
    /// Lower bound on the number of sampled clients
    pub min_clients: usize,

    /// Fraction of available clients to sample
    pub fraction: f64,

    /// Minimum number of available clients required to sample at all
    pub min_available: usize,
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self {
            min_clients: 2,
            fraction: 1.0,
            min_available: 2,
        }
    }
}

impl SamplingPolicy {
    pub fn new(min_clients: usize, fraction: f64, min_available: usize) -> Self {
        Self {
            min_clients,
            fraction,
            min_available,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.fraction) {
            return Err(invalid(&format!(
                "sampling fraction {} outside [0, 1]",
                self.fraction
            )));
        }
        Ok(())
    }

    /// Number of clients to draw from `available` candidates
    pub fn sample_size(&self, available: usize) -> usize {
        let by_fraction = (self.fraction * available as f64).ceil() as usize;
        self.min_clients.max(by_fraction).min(available)
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidConfig {
        message: message.to_string(),
    }
}

/// Duration serialization helper: durations are written as milliseconds
pub(crate) mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let millis = Option::<u64>::deserialize(deserializer)?;
            Ok(millis.map(Duration::from_millis))
        }
    }
}
