//! Admission decisions and the read models rolled up from them.

use crate::SubmittedJob;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Number of decisions kept in `Stats::recent_decisions`.
pub const RECENT_DECISIONS_CAP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    Accepted,
    Rejected,
}

impl DecisionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionStatus::Accepted => "accepted",
            DecisionStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for DecisionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(DecisionStatus::Accepted),
            "rejected" => Ok(DecisionStatus::Rejected),
            other => Err(format!("unknown decision status: {}", other)),
        }
    }
}

/// Why a job was accepted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Admitted,
    PriorityTooLow,
    DuplicateRequest,
    Quarantined,
    RateLimitExceeded,
    /// Another job in the same atomic batch failed.
    BatchRejected,
    StoreError,
}

impl DecisionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionReason::Admitted => "admitted",
            DecisionReason::PriorityTooLow => "priority_too_low",
            DecisionReason::DuplicateRequest => "duplicate_request",
            DecisionReason::Quarantined => "quarantined",
            DecisionReason::RateLimitExceeded => "rate_limit_exceeded",
            DecisionReason::BatchRejected => "batch_rejected",
            DecisionReason::StoreError => "store_error",
        }
    }

    pub fn status(self) -> DecisionStatus {
        match self {
            DecisionReason::Admitted => DecisionStatus::Accepted,
            _ => DecisionStatus::Rejected,
        }
    }
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one admission check, as returned to the caller and written to the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDecision {
    pub job_id: String,
    pub status: DecisionStatus,
    pub reason: DecisionReason,
    pub batch_name: String,
    pub batch_id: String,
    pub owner_id: String,
    #[serde(default)]
    pub config_id: String,
    pub tenant_id: String,
    pub priority: i64,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    /// RFC 3339, UTC.
    pub timestamp: String,
}

impl JobDecision {
    pub fn new(job: &SubmittedJob, reason: DecisionReason) -> Self {
        Self {
            job_id: job.job.job_id.clone(),
            status: reason.status(),
            reason,
            batch_name: job.batch_name.clone(),
            batch_id: job.batch_id.clone(),
            owner_id: job.owner_id.clone(),
            config_id: job.config_id.clone(),
            tenant_id: job.job.tenant_id.clone(),
            priority: job.job.priority,
            payload: job.job.payload.clone(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == DecisionStatus::Accepted
    }

    /// The decision time, if `timestamp` is valid RFC 3339.
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }
}

/// Parses an RFC 3339 timestamp with any offset into UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Aggregate counters over every decision the controller has made.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub total_requests: u64,
    pub admitted_requests: u64,
    pub rejected_requests: u64,
    pub rejection_reasons: BTreeMap<DecisionReason, u64>,
    /// Oldest first; capped at `RECENT_DECISIONS_CAP`.
    pub recent_decisions: VecDeque<JobDecision>,
}

impl Stats {
    pub fn record(&mut self, decision: &JobDecision) {
        self.total_requests += 1;
        if decision.is_accepted() {
            self.admitted_requests += 1;
        } else {
            self.rejected_requests += 1;
            *self.rejection_reasons.entry(decision.reason).or_insert(0) += 1;
        }
        self.recent_decisions.push_back(decision.clone());
        while self.recent_decisions.len() > RECENT_DECISIONS_CAP {
            self.recent_decisions.pop_front();
        }
    }

    /// Percentage of admitted requests, rounded to one decimal. 0 when nothing was seen.
    pub fn acceptance_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        let pct = self.admitted_requests as f64 * 100.0 / self.total_requests as f64;
        (pct * 10.0).round() / 10.0
    }
}

/// Filters and pagination for `DecisionLog::list`.
#[derive(Debug, Clone, Default)]
pub struct DecisionListOptions {
    pub owner_id: Option<String>,
    pub batch_id: Option<String>,
    pub status: Option<DecisionStatus>,
    /// RFC 3339; only decisions with timestamp >= since.
    pub since: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl DecisionListOptions {
    pub fn matches(&self, d: &JobDecision) -> bool {
        if let Some(ref owner) = self.owner_id {
            if &d.owner_id != owner {
                return false;
            }
        }
        if let Some(ref batch) = self.batch_id {
            if &d.batch_id != batch {
                return false;
            }
        }
        if let Some(status) = self.status {
            if d.status != status {
                return false;
            }
        }
        if let Some(ref since) = self.since {
            let before = match (d.recorded_at(), parse_timestamp(since)) {
                (Some(at), Some(since)) => at < since,
                _ => d.timestamp.as_str() < since.as_str(),
            };
            if before {
                return false;
            }
        }
        true
    }
}

/// Rollup for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub batch_name: String,
    pub owner_id: String,
    pub total_jobs: u64,
    pub admitted_jobs: u64,
    pub created_at: String,
}

/// Rollup for one owner's policy (config) across all its batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigAssociation {
    pub config_id: String,
    pub owner_id: String,
    pub total_jobs: u64,
    pub succeeded_jobs: u64,
    pub failed_jobs: u64,
    pub no_of_batches: u64,
}
