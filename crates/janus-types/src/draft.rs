//! Draft jobs as edited in the console: a form ("visual") shape and a raw JSON text shape.
//!
//! Both shapes describe the same job. Switching between them must not lose data, and a
//! malformed payload or JSON text blocks the switch with a `DraftError`.

use crate::Job;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DraftError {
    #[error("Invalid Payload JSON. Please fix before switching: {0}")]
    InvalidPayload(String),
    #[error("Invalid JSON. Please fix errors before switching: {0}")]
    InvalidJson(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRow {
    pub key: String,
    pub value: i64,
}

/// Form-shaped draft: dependency rows and the payload as editable text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDraft {
    pub job_id: String,
    pub tenant_id: String,
    pub priority: i64,
    pub dependencies: Vec<DependencyRow>,
    pub payload_text: String,
}

impl JobDraft {
    pub fn from_job(job: &Job) -> Self {
        let dependencies = job
            .dependencies
            .iter()
            .map(|(k, v)| DependencyRow {
                key: k.clone(),
                value: *v,
            })
            .collect();
        Self {
            job_id: job.job_id.clone(),
            tenant_id: job.tenant_id.clone(),
            priority: job.priority,
            dependencies,
            payload_text: pretty_object(&job.payload),
        }
    }

    /// Rows with an empty key are dropped; a later row wins over an earlier one with the
    /// same key. Blank payload text means an empty payload.
    pub fn to_job(&self) -> Result<Job, DraftError> {
        let payload = if self.payload_text.trim().is_empty() {
            serde_json::Map::new()
        } else {
            match serde_json::from_str::<serde_json::Value>(&self.payload_text) {
                Ok(serde_json::Value::Object(map)) => map,
                Ok(_) => {
                    return Err(DraftError::InvalidPayload(
                        "payload must be a JSON object".to_string(),
                    ))
                }
                Err(e) => return Err(DraftError::InvalidPayload(e.to_string())),
            }
        };
        let dependencies = self
            .dependencies
            .iter()
            .filter(|row| !row.key.is_empty())
            .map(|row| (row.key.clone(), row.value))
            .collect();
        Ok(Job {
            job_id: self.job_id.clone(),
            tenant_id: self.tenant_id.clone(),
            priority: self.priority,
            dependencies,
            payload,
        })
    }

    /// Visual -> raw JSON editor text.
    pub fn to_json_text(&self) -> Result<String, DraftError> {
        let job = self.to_job()?;
        serde_json::to_string_pretty(&job).map_err(|e| DraftError::InvalidJson(e.to_string()))
    }

    /// Raw JSON editor text -> visual.
    pub fn from_json_text(text: &str) -> Result<Self, DraftError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| DraftError::InvalidJson(e.to_string()))?;
        if !value.is_object() {
            return Err(DraftError::InvalidJson(
                "job must be a JSON object".to_string(),
            ));
        }
        let job: Job =
            serde_json::from_value(value).map_err(|e| DraftError::InvalidJson(e.to_string()))?;
        Ok(Self::from_job(&job))
    }

    /// Same draft under a fresh `job_<n>` id, for "add to batch and keep editing".
    pub fn with_fresh_id(&self) -> Self {
        let n = uuid::Uuid::new_v4().as_u128() % 10_000;
        Self {
            job_id: format!("job_{}", n),
            ..self.clone()
        }
    }
}

fn pretty_object(map: &serde_json::Map<String, serde_json::Value>) -> String {
    serde_json::to_string_pretty(map).unwrap_or_else(|_| "{}".to_string())
}

/// Jobs queued in the simulator plus the draft still being edited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchDraft {
    pub batch_name: String,
    pub jobs: Vec<Job>,
}

impl BatchDraft {
    pub fn new(batch_name: impl Into<String>) -> Self {
        Self {
            batch_name: batch_name.into(),
            jobs: Vec::new(),
        }
    }

    pub fn push(&mut self, draft: &JobDraft) -> Result<(), DraftError> {
        self.jobs.push(draft.to_job()?);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
    }

    /// The batch that would be submitted now. With nothing queued, the current draft is
    /// sent on its own under `standalone_job_<now_ms>`.
    pub fn preview(&self, current: Option<&JobDraft>, now_ms: i64) -> Result<Self, DraftError> {
        if !self.jobs.is_empty() {
            return Ok(self.clone());
        }
        let mut jobs = Vec::new();
        if let Some(draft) = current {
            jobs.push(draft.to_job()?);
        }
        Ok(Self {
            batch_name: format!("standalone_job_{}", now_ms),
            jobs,
        })
    }
}
