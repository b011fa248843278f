//! Job result surface

use std::collections::BTreeSet;

use fed_core::{ClientId, Error, History, Parameters, Round};
use serde::Serialize;

/// How a job ended
#[derive(Debug)]
pub enum JobStatus {
    /// Every configured round ran (some may have been skipped)
    Completed,

    /// A round failed under the halt policy
    Aborted {
        round: Round,
        error: Error,
        failed_clients: BTreeSet<ClientId>,
    },
}

/// Final state of a federated job
#[derive(Debug)]
pub struct JobReport {
    /// Outcome of every round that ran
    pub history: History,

    /// Global parameters after the last successful fit round
    pub parameters: Parameters,

    pub status: JobStatus,
}

impl JobReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, JobStatus::Completed)
    }

    /// Round and error of an aborted job
    pub fn abort_reason(&self) -> Option<(Round, &Error)> {
        match &self.status {
            JobStatus::Completed => None,
            JobStatus::Aborted { round, error, .. } => Some((*round, error)),
        }
    }

    /// Serializable overview for logs and the command line
    pub fn summary(&self) -> JobSummary {
        let (status, aborted_round, error) = match &self.status {
            JobStatus::Completed => ("completed", None, None),
            JobStatus::Aborted { round, error, .. } => {
                ("aborted", Some(*round), Some(error.to_string()))
            }
        };

        JobSummary {
            status,
            rounds: self.history.len(),
            failed_rounds: self.history.failed_rounds(),
            aborted_round,
            error,
            final_loss: self.history.losses().last().map(|(_, loss)| *loss),
            num_parameters: self.parameters.num_elements(),
        }
    }
}

/// Flat view of a [`JobReport`]
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub status: &'static str,
    pub rounds: usize,
    pub failed_rounds: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted_round: Option<Round>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub final_loss: Option<f64>,
    pub num_parameters: usize,
}
