//! Request and response bodies of the HTTP API.

use crate::{DecisionReason, Job, JobDecision, Stats};
use serde::{Deserialize, Serialize};

/// Largest batch accepted by the partial-batch endpoints.
pub const MAX_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobBatchRequest {
    #[serde(default)]
    pub batch_name: String,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

/// Aggregate result of a partial batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Full,
    Partial,
    Rejected,
}

impl BatchStatus {
    pub fn from_counts(admitted: usize, rejected: usize) -> Self {
        if admitted == 0 {
            BatchStatus::Rejected
        } else if rejected > 0 {
            BatchStatus::Partial
        } else {
            BatchStatus::Full
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobBatchResponse {
    pub batch_name: String,
    pub batch_id: String,
    pub status: BatchStatus,
    pub admitted: usize,
    pub rejected: usize,
    pub decisions: Vec<JobDecision>,
}

/// Time spent in one step of a dry-run check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLatency {
    pub step: String,
    pub micros: u64,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulateResponse {
    pub job_id: String,
    pub admitted: bool,
    pub reason: DecisionReason,
    pub latency_ms: u64,
    pub steps: Vec<StepLatency>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeResponse {
    pub job_id: String,
    pub released: usize,
    pub quarantined: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: Stats,
    pub acceptance_rate: f64,
}

impl From<Stats> for StatsResponse {
    fn from(stats: Stats) -> Self {
        let acceptance_rate = stats.acceptance_rate();
        Self {
            stats,
            acceptance_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// On/off switch a console user flips from the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Running,
    #[default]
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusBody {
    pub status: ServiceStatus,
}

/// A user's currently active policy, stored raw and parsed on use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveConfig {
    pub config_id: String,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigUpdateRequest {
    #[serde(default)]
    pub config_id: Option<String>,
    pub config: serde_json::Value,
}
