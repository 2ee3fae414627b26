//! Traits for the state, account, and decision-log backends.

use crate::{ActiveConfig, DecisionListOptions, JobDecision, ServiceStatus};
use async_trait::async_trait;
use std::time::Duration;

/// How a quota key is limited.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QuotaKind {
    /// Refillable bucket: starts full, refills continuously up to `capacity`.
    TokenBucket { capacity: f64, refill_per_sec: f64 },
    /// Slots held until explicitly released.
    InFlight { max: i64 },
}

/// One limit an admission must satisfy.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaRequest {
    pub key: String,
    pub kind: QuotaKind,
    pub cost: i64,
    /// Minimum spacing between admissions on this key, in seconds. 0 disables.
    pub min_interval_secs: f64,
    /// Linear capacity ramp after the key is first used. 0 disables.
    pub warmup_ms: i64,
}

impl QuotaRequest {
    pub fn bucket(key: impl Into<String>, capacity: i64, refill_per_sec: f64, cost: i64) -> Self {
        Self {
            key: key.into(),
            kind: QuotaKind::TokenBucket {
                capacity: capacity as f64,
                refill_per_sec,
            },
            cost,
            min_interval_secs: 0.0,
            warmup_ms: 0,
        }
    }

    pub fn in_flight(key: impl Into<String>, max: i64, cost: i64) -> Self {
        Self {
            key: key.into(),
            kind: QuotaKind::InFlight { max },
            cost,
            min_interval_secs: 0.0,
            warmup_ms: 0,
        }
    }

    pub fn with_min_interval_ms(mut self, ms: i64) -> Self {
        self.min_interval_secs = ms.max(0) as f64 / 1000.0;
        self
    }

    pub fn with_warmup_ms(mut self, ms: i64) -> Self {
        self.warmup_ms = ms.max(0);
        self
    }
}

/// Admission state: idempotency marks, quota buckets, in-flight slots, quarantine.
///
/// Implementations must make `allow_request_atomic` all-or-nothing: either every request
/// is charged, or none is.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    /// Returns true if `job_key` was already marked within `window` (a duplicate).
    /// Otherwise marks it and returns false.
    async fn check_and_mark_admitted(
        &self,
        job_key: &str,
        window: Duration,
    ) -> Result<bool, StoreError>;

    /// True if `job_key` is marked and the mark has not expired. Never marks.
    async fn is_marked(&self, job_key: &str) -> Result<bool, StoreError>;

    /// Remove an idempotency mark (rejected admission or failed execution, to allow retry).
    async fn clear_idempotency(&self, job_key: &str) -> Result<(), StoreError>;

    /// Check every request and, only if all pass, charge them all.
    async fn allow_request_atomic(&self, reqs: &[QuotaRequest]) -> Result<bool, StoreError>;

    /// Same checks as `allow_request_atomic`, without charging anything.
    async fn would_allow(&self, reqs: &[QuotaRequest]) -> Result<bool, StoreError>;

    /// Return `amount` in-flight slots to `key`. Never goes below zero.
    async fn release_inflight(&self, key: &str, amount: i64) -> Result<(), StoreError>;

    /// Count a failure for `job_key` inside `window`. When the count reaches `threshold`
    /// the key is quarantined for `ban` and true is returned.
    async fn record_failure(
        &self,
        job_key: &str,
        threshold: i64,
        window: Duration,
        ban: Duration,
    ) -> Result<bool, StoreError>;

    async fn is_quarantined(&self, job_key: &str) -> Result<bool, StoreError>;

    /// Drop all state whose key starts with `prefix`.
    async fn flush_prefix(&self, prefix: &str) -> Result<(), StoreError>;

    /// Drop all state. Use with caution.
    async fn flush(&self) -> Result<(), StoreError>;
}

/// Per-user service switch and active policy.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Unknown users are not running; that is not an error.
    async fn is_service_running(&self, user_id: &str) -> Result<bool, AccountStoreError>;

    async fn service_status(&self, user_id: &str) -> Result<ServiceStatus, AccountStoreError>;

    async fn set_service_status(
        &self,
        user_id: &str,
        status: ServiceStatus,
    ) -> Result<(), AccountStoreError>;

    async fn active_config(&self, user_id: &str)
        -> Result<Option<ActiveConfig>, AccountStoreError>;

    async fn activate_config(
        &self,
        user_id: &str,
        config: ActiveConfig,
    ) -> Result<(), AccountStoreError>;

    /// Returns false if the user had no active config.
    async fn deactivate_config(&self, user_id: &str) -> Result<bool, AccountStoreError>;
}

/// Append-only record of decisions.
#[async_trait]
pub trait DecisionLog: Send + Sync {
    async fn append(&self, decision: JobDecision) -> Result<(), DecisionLogError>;

    /// Matching decisions, newest first, after offset/limit.
    async fn list(&self, opts: &DecisionListOptions)
        -> Result<Vec<JobDecision>, DecisionLogError>;
}

/// The in-memory store never fails; networked backends report outages here.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AccountStoreError {
    #[error("account store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DecisionLogError {
    #[error("decision log error: {0}")]
    Other(String),
    #[error("decision log io: {0}")]
    Io(#[from] std::io::Error),
    #[error("decision log encoding: {0}")]
    Json(#[from] serde_json::Error),
}
