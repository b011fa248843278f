//! Append-only record of completed rounds

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::parameters::Parameters;
use crate::types::{ClientId, Failure, Metrics, Round, RoundKind, Scalar};
use crate::{Error, Result};

/// Whether a round produced an aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundStatus {
    Completed,
    Failed { reason: String },
}

/// Aggregate produced by a completed round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RoundResult {
    /// New global parameters from a fit round
    Fit { parameters: Parameters },

    /// Aggregated loss from an evaluate round
    Evaluate { loss: f64 },
}

/// Everything recorded about one round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundOutcome {
    /// Round number, starting at 1
    pub round: Round,

    /// Fit or evaluate
    pub kind: RoundKind,

    /// Completed or failed
    pub status: RoundStatus,

    /// Aggregate, absent for failed rounds
    pub result: Option<RoundResult>,

    /// Aggregated metrics
    pub metrics: Metrics,

    /// Number of clients whose results were aggregated
    pub num_results: usize,

    /// Clients that did not contribute, with the reason
    pub failures: BTreeMap<ClientId, Failure>,

    /// When the round finished
    pub completed_at: DateTime<Utc>,
}

impl RoundOutcome {
    pub fn fit(
        round: Round,
        parameters: Parameters,
        metrics: Metrics,
        num_results: usize,
        failures: BTreeMap<ClientId, Failure>,
    ) -> Self {
        Self {
            round,
            kind: RoundKind::Fit,
            status: RoundStatus::Completed,
            result: Some(RoundResult::Fit { parameters }),
            metrics,
            num_results,
            failures,
            completed_at: Utc::now(),
        }
    }

    pub fn evaluate(
        round: Round,
        loss: f64,
        metrics: Metrics,
        num_results: usize,
        failures: BTreeMap<ClientId, Failure>,
    ) -> Self {
        Self {
            round,
            kind: RoundKind::Evaluate,
            status: RoundStatus::Completed,
            result: Some(RoundResult::Evaluate { loss }),
            metrics,
            num_results,
            failures,
            completed_at: Utc::now(),
        }
    }

    /// A round that was aborted and skipped
    pub fn failed(
        round: Round,
        kind: RoundKind,
        reason: impl Into<String>,
        num_results: usize,
        failures: BTreeMap<ClientId, Failure>,
    ) -> Self {
        Self {
            round,
            kind,
            status: RoundStatus::Failed {
                reason: reason.into(),
            },
            result: None,
            metrics: Metrics::new(),
            num_results,
            failures,
            completed_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RoundStatus::Completed
    }

    /// IDs of clients that failed in this round
    pub fn failed_clients(&self) -> BTreeSet<ClientId> {
        self.failures.keys().cloned().collect()
    }

    pub fn parameters(&self) -> Option<&Parameters> {
        match &self.result {
            Some(RoundResult::Fit { parameters }) => Some(parameters),
            _ => None,
        }
    }

    pub fn loss(&self) -> Option<f64> {
        match self.result {
            Some(RoundResult::Evaluate { loss }) => Some(loss),
            _ => None,
        }
    }
}

/// Ordered, gap-free log of round outcomes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    outcomes: Vec<RoundOutcome>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Round number the next appended outcome must carry
    pub fn next_round(&self) -> Round {
        self.outcomes.last().map_or(1, |o| o.round + 1)
    }

    /// Append the outcome of the next round
    pub fn append(&mut self, outcome: RoundOutcome) -> Result<()> {
        let expected = self.next_round();
        if outcome.round != expected {
            return Err(Error::HistoryOutOfOrder {
                expected,
                actual: outcome.round,
            });
        }
        self.outcomes.push(outcome);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoundOutcome> {
        self.outcomes.iter()
    }

    pub fn outcomes(&self) -> &[RoundOutcome] {
        &self.outcomes
    }

    pub fn get(&self, round: Round) -> Option<&RoundOutcome> {
        let index = round.checked_sub(1)? as usize;
        self.outcomes.get(index)
    }

    pub fn last(&self) -> Option<&RoundOutcome> {
        self.outcomes.last()
    }

    /// Aggregated evaluation losses by round
    pub fn losses(&self) -> Vec<(Round, f64)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.loss().map(|loss| (o.round, loss)))
            .collect()
    }

    /// Values of one aggregated metric by round
    pub fn metric(&self, name: &str) -> Vec<(Round, Scalar)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.metrics.get(name).map(|v| (o.round, v.clone())))
            .collect()
    }

    /// Number of rounds recorded as failed
    pub fn failed_rounds(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_completed()).count()
    }
}
