//! Job descriptors: what a caller submits, and the envelope the API attaches.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MIN_PRIORITY: i64 = 1;
pub const MAX_PRIORITY: i64 = 100;
/// Largest cost a job may declare against a single dependency.
pub const MAX_DEPENDENCY_COST: i64 = 1_000_000_000;

/// A single execution request submitted for admission.
///
/// Carries identity, classification and business payload. It does not carry execution or
/// scheduling semantics: Janus only decides whether the job may proceed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub priority: i64,
    /// Resource name -> cost the job needs from that resource.
    #[serde(default)]
    pub dependencies: BTreeMap<String, i64>,
    /// Opaque to admission.
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl Job {
    /// Checks the fields the admission pipeline relies on.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.job_id.trim().is_empty() {
            return Err(JobError::MissingField("job_id"));
        }
        if self.tenant_id.trim().is_empty() {
            return Err(JobError::MissingField("tenant_id"));
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return Err(JobError::PriorityOutOfRange(self.priority));
        }
        for (name, cost) in &self.dependencies {
            if name.is_empty() {
                return Err(JobError::InvalidDependency(
                    "dependency name cannot be empty".to_string(),
                ));
            }
            if *cost < 0 {
                return Err(JobError::InvalidDependency(format!(
                    "dependency '{}' cost cannot be negative",
                    name
                )));
            }
            if *cost > MAX_DEPENDENCY_COST {
                return Err(JobError::InvalidDependency(format!(
                    "dependency '{}' cost cannot exceed {}",
                    name, MAX_DEPENDENCY_COST
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error("priority must be between 1 and 100, got {0}")]
    PriorityOutOfRange(i64),
    #[error("{0}")]
    InvalidDependency(String),
}

/// Where a job came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobSource {
    #[default]
    System,
    Dashboard,
}

impl JobSource {
    pub fn as_str(self) -> &'static str {
        match self {
            JobSource::System => "system",
            JobSource::Dashboard => "dashboard",
        }
    }

    /// Name and id of the implicit batch single-job submissions are filed under.
    pub fn standalone_batch(self) -> (&'static str, &'static str) {
        match self {
            JobSource::System => ("system_batch", "11111111-1111-1111-1111-111111111111"),
            JobSource::Dashboard => ("dashboard_batch", "22222222-2222-2222-2222-222222222222"),
        }
    }

    /// Fresh id for an explicit batch, e.g. `system_batch_<uuid>`.
    pub fn new_batch_id(self) -> String {
        format!("{}_batch_{}", self.as_str(), uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for JobSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job plus the envelope attached by the API layer. Callers never set these fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedJob {
    #[serde(flatten)]
    pub job: Job,
    pub source: JobSource,
    pub batch_name: String,
    pub batch_id: String,
    pub owner_id: String,
    #[serde(default)]
    pub config_id: String,
}

impl SubmittedJob {
    pub fn new(job: Job, source: JobSource, owner_id: impl Into<String>) -> Self {
        let (batch_name, batch_id) = source.standalone_batch();
        Self {
            job,
            source,
            batch_name: batch_name.to_string(),
            batch_id: batch_id.to_string(),
            owner_id: owner_id.into(),
            config_id: String::new(),
        }
    }

    pub fn in_batch(mut self, batch_name: impl Into<String>, batch_id: impl Into<String>) -> Self {
        self.batch_name = batch_name.into();
        self.batch_id = batch_id.into();
        self
    }

    pub fn with_config_id(mut self, config_id: impl Into<String>) -> Self {
        self.config_id = config_id.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutcomeStatus {
    Success,
    Failure,
}

/// Reported by whoever executed an admitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub job_id: String,
    pub status: OutcomeStatus,
}
