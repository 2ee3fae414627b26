//! Admission policy: the limits one owner's jobs are checked against.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const SUPPORTED_POLICY_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub version: u32,
    pub global_execution_limit: GlobalExecutionLimit,
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencyPolicy>,
    pub default_job_policy: JobPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalExecutionLimit {
    pub max_jobs: i64,
    pub window_ms: i64,
    /// Per-tenant bucket capacity; 0 disables the tenant quota.
    #[serde(default)]
    pub max_concurrent_per_tenant: i64,
    /// Jobs below this priority are turned away before any quota is touched.
    #[serde(default)]
    pub min_priority: i64,
    /// Burst smoothing on the global bucket.
    #[serde(default)]
    pub min_interval_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    #[default]
    ExternalApi,
    InternalService,
    Database,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_requests: i64,
    pub window_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concurrency {
    pub max_inflight: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyPolicy {
    #[serde(rename = "type", default)]
    pub kind: DependencyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrent: Option<Concurrency>,
    #[serde(default)]
    pub min_interval_ms: i64,
    /// Capacity ramps up linearly over this long after the bucket is first used.
    #[serde(default)]
    pub warmup_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPolicy {
    #[serde(default)]
    pub dependencies: BTreeMap<String, i64>,
    pub idempotency_window_ms: i64,
    #[serde(default)]
    pub scope_limits: BTreeMap<String, i64>,
    #[serde(default)]
    pub scope_keys: Vec<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub execution: ExecutionPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarantine: Option<QuarantinePolicy>,
}

/// Strikes-then-ban protection against jobs that keep failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantinePolicy {
    pub failure_threshold: i64,
    pub quarantine_duration_ms: i64,
    pub monitoring_window_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub max_attempts: i64,
    #[serde(default)]
    pub backoff: String,
    #[serde(default)]
    pub initial_delay_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    #[serde(default)]
    pub timeout_ms: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("failed to read policy file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid policy JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty config")]
    Empty,
    #[error("unsupported policy version: {0}")]
    UnsupportedVersion(u32),
    #[error("{0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> PolicyError {
    PolicyError::Invalid(msg.into())
}

/// Tokens per second for a bucket that refills `capacity` tokens every `window_ms`.
pub fn refill_rate(capacity: i64, window_ms: i64) -> f64 {
    let window_ms = if window_ms <= 0 { 1000 } else { window_ms };
    capacity as f64 / (window_ms as f64 / 1000.0)
}

impl Policy {
    /// Parse and validate a raw JSON policy.
    pub fn from_json(raw: &str) -> Result<Self, PolicyError> {
        if raw.trim().is_empty() {
            return Err(PolicyError::Empty);
        }
        let policy: Policy = serde_json::from_str(raw)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Parse and validate an already-decoded JSON value.
    pub fn from_value(raw: serde_json::Value) -> Result<Self, PolicyError> {
        let policy: Policy = serde_json::from_value(raw)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Read, parse and validate a policy file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.version != SUPPORTED_POLICY_VERSION {
            return Err(PolicyError::UnsupportedVersion(self.version));
        }

        let g = &self.global_execution_limit;
        if g.max_jobs <= 0 {
            return Err(invalid("max_jobs must be > 0"));
        }
        if g.window_ms <= 0 {
            return Err(invalid("window_ms must be > 0"));
        }
        if g.max_concurrent_per_tenant < 0 {
            return Err(invalid(
                "global_execution_limit max_concurrent_per_tenant cannot be negative",
            ));
        }
        if g.min_priority < 0 {
            return Err(invalid("global_execution_limit min_priority cannot be negative"));
        }
        if g.min_interval_ms < 0 {
            return Err(invalid(
                "global_execution_limit min_interval_ms cannot be negative",
            ));
        }

        for (name, dep) in &self.dependencies {
            if dep.rate_limit.is_none() && dep.concurrent.is_none() {
                return Err(invalid(format!(
                    "dependency '{}' must define rate_limit or concurrent",
                    name
                )));
            }
            if let Some(ref rl) = dep.rate_limit {
                if rl.max_requests <= 0 || rl.window_ms <= 0 {
                    return Err(invalid(format!(
                        "dependency '{}' rate_limit max_requests and window_ms must be > 0",
                        name
                    )));
                }
            }
            if let Some(ref c) = dep.concurrent {
                if c.max_inflight <= 0 {
                    return Err(invalid(format!(
                        "dependency '{}' concurrent max_inflight must be > 0",
                        name
                    )));
                }
            }
            if dep.min_interval_ms < 0 {
                return Err(invalid(format!(
                    "dependency '{}' min_interval_ms cannot be negative",
                    name
                )));
            }
            if dep.warmup_ms < 0 {
                return Err(invalid(format!(
                    "dependency '{}' warmup_ms cannot be negative",
                    name
                )));
            }
        }

        let jp = &self.default_job_policy;
        if jp.idempotency_window_ms <= 0 {
            return Err(invalid("idempotency_window_ms must be > 0"));
        }
        if let Some(ref q) = jp.quarantine {
            if q.failure_threshold <= 0 {
                return Err(invalid(
                    "default_job_policy quarantine failure_threshold must be > 0",
                ));
            }
            if q.quarantine_duration_ms <= 0 {
                return Err(invalid(
                    "default_job_policy quarantine quarantine_duration_ms must be > 0",
                ));
            }
            if q.monitoring_window_ms <= 0 {
                return Err(invalid(
                    "default_job_policy quarantine monitoring_window_ms must be > 0",
                ));
            }
        }

        Ok(())
    }
}
