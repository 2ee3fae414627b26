//! AdmissionController: the rule pipeline, batch-atomic admission, dry runs, and stats.

use crate::rules::{job_key, owner_prefix, quota_requests};
use janus_types::{
    DecisionReason, ExecutionOutcome, JobDecision, OutcomeResponse, OutcomeStatus, Policy,
    QuotaKind, QuotaRequest, SimulateResponse, StateStore, Stats, StepLatency, StoreError,
    SubmittedJob,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("admission check failed: {0}")]
    Store(#[from] StoreError),
    #[error("job {0} is not known to be admitted")]
    UnknownJob(String),
}

/// Decides admission for jobs against a caller-supplied policy.
///
/// The controller itself holds no policy: each request brings its owner's active one.
/// It does hold the in-flight slots of admitted jobs until their outcome is reported.
pub struct AdmissionController {
    store: Arc<dyn StateStore + Send + Sync>,
    stats: RwLock<Stats>,
    /// job key -> in-flight (quota key, slots) held by that job.
    held: Mutex<HashMap<String, Vec<(String, i64)>>>,
}

fn millis(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

fn inflight_holdings(reqs: &[QuotaRequest]) -> Vec<(String, i64)> {
    reqs.iter()
        .filter(|r| matches!(r.kind, QuotaKind::InFlight { .. }))
        .map(|r| (r.key.clone(), r.cost))
        .collect()
}

impl AdmissionController {
    pub fn new(store: Arc<dyn StateStore + Send + Sync>) -> Self {
        Self {
            store,
            stats: RwLock::new(Stats::default()),
            held: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore + Send + Sync> {
        &self.store
    }

    pub async fn stats(&self) -> Stats {
        self.stats.read().await.clone()
    }

    async fn record(&self, job: &SubmittedJob, reason: DecisionReason) -> JobDecision {
        let decision = JobDecision::new(job, reason);
        self.stats.write().await.record(&decision);
        tracing::info!(
            job_id = %decision.job_id,
            owner_id = %decision.owner_id,
            tenant_id = %decision.tenant_id,
            batch_id = %decision.batch_id,
            status = decision.status.as_str(),
            reason = %decision.reason,
            "admission decision"
        );
        decision
    }

    async fn hold(&self, key: String, reqs: &[QuotaRequest]) {
        let holdings = inflight_holdings(reqs);
        if holdings.is_empty() {
            return;
        }
        self.held
            .lock()
            .await
            .entry(key)
            .or_default()
            .extend(holdings);
    }

    /// Priority, quarantine and idempotency. On pass the job's idempotency key is marked.
    async fn pre_check(
        &self,
        job: &SubmittedJob,
        policy: &Policy,
    ) -> Result<Option<DecisionReason>, StoreError> {
        if job.job.priority < policy.global_execution_limit.min_priority {
            return Ok(Some(DecisionReason::PriorityTooLow));
        }
        let key = job_key(&job.owner_id, &job.job.job_id);
        if self.store.is_quarantined(&key).await? {
            return Ok(Some(DecisionReason::Quarantined));
        }
        let window = millis(policy.default_job_policy.idempotency_window_ms);
        if self.store.check_and_mark_admitted(&key, window).await? {
            return Ok(Some(DecisionReason::DuplicateRequest));
        }
        Ok(None)
    }

    async fn clear_marks(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.store.clear_idempotency(key).await {
                tracing::warn!(key = %key, error = %e, "failed to clear idempotency mark");
            }
        }
    }

    async fn evaluate(
        &self,
        job: &SubmittedJob,
        policy: &Policy,
    ) -> Result<DecisionReason, StoreError> {
        if let Some(reason) = self.pre_check(job, policy).await? {
            return Ok(reason);
        }
        let key = job_key(&job.owner_id, &job.job.job_id);
        let reqs = quota_requests(job, policy);
        match self.store.allow_request_atomic(&reqs).await {
            Ok(true) => {
                self.hold(key, &reqs).await;
                Ok(DecisionReason::Admitted)
            }
            Ok(false) => {
                self.clear_marks(&[key]).await;
                Ok(DecisionReason::RateLimitExceeded)
            }
            Err(e) => {
                self.clear_marks(&[key]).await;
                Err(e)
            }
        }
    }

    /// Admit or reject one job. A store failure is recorded as `store_error` and returned.
    pub async fn check(
        &self,
        job: &SubmittedJob,
        policy: &Policy,
    ) -> Result<JobDecision, AdmissionError> {
        match self.evaluate(job, policy).await {
            Ok(reason) => Ok(self.record(job, reason).await),
            Err(e) => {
                self.record(job, DecisionReason::StoreError).await;
                tracing::error!(job_id = %job.job.job_id, error = %e, "admission store failure");
                Err(e.into())
            }
        }
    }

    /// All-or-nothing admission of a batch. The first failing job keeps its own reason,
    /// every other job is `batch_rejected`; a quota failure rejects all as
    /// `rate_limit_exceeded`.
    pub async fn check_batch_atomic(
        &self,
        jobs: &[SubmittedJob],
        policy: &Policy,
    ) -> Result<Vec<JobDecision>, AdmissionError> {
        let mut marked: Vec<String> = Vec::with_capacity(jobs.len());

        for (i, job) in jobs.iter().enumerate() {
            match self.pre_check(job, policy).await {
                Ok(None) => marked.push(job_key(&job.owner_id, &job.job.job_id)),
                Ok(Some(reason)) => {
                    self.clear_marks(&marked).await;
                    let mut decisions = Vec::with_capacity(jobs.len());
                    for (j, other) in jobs.iter().enumerate() {
                        let r = if j == i {
                            reason
                        } else {
                            DecisionReason::BatchRejected
                        };
                        decisions.push(self.record(other, r).await);
                    }
                    return Ok(decisions);
                }
                Err(e) => {
                    self.clear_marks(&marked).await;
                    return Err(self.fail_batch(jobs, e).await);
                }
            }
        }

        let per_job: Vec<Vec<QuotaRequest>> =
            jobs.iter().map(|j| quota_requests(j, policy)).collect();
        let all: Vec<QuotaRequest> = per_job.iter().flatten().cloned().collect();

        let reason = match self.store.allow_request_atomic(&all).await {
            Ok(true) => {
                for (job, reqs) in jobs.iter().zip(&per_job) {
                    self.hold(job_key(&job.owner_id, &job.job.job_id), reqs)
                        .await;
                }
                DecisionReason::Admitted
            }
            Ok(false) => {
                self.clear_marks(&marked).await;
                DecisionReason::RateLimitExceeded
            }
            Err(e) => {
                self.clear_marks(&marked).await;
                return Err(self.fail_batch(jobs, e).await);
            }
        };

        let mut decisions = Vec::with_capacity(jobs.len());
        for job in jobs {
            decisions.push(self.record(job, reason).await);
        }
        Ok(decisions)
    }

    async fn fail_batch(&self, jobs: &[SubmittedJob], e: StoreError) -> AdmissionError {
        for job in jobs {
            self.record(job, DecisionReason::StoreError).await;
        }
        tracing::error!(jobs = jobs.len(), error = %e, "atomic batch store failure");
        e.into()
    }

    /// Run the pipeline without marking, charging, or recording anything.
    pub async fn dry_run(
        &self,
        job: &SubmittedJob,
        policy: &Policy,
    ) -> Result<SimulateResponse, AdmissionError> {
        let started = Instant::now();
        let key = job_key(&job.owner_id, &job.job.job_id);
        let mut steps = Vec::with_capacity(4);
        let mut reason = DecisionReason::Admitted;

        let t = Instant::now();
        let passed = job.job.priority >= policy.global_execution_limit.min_priority;
        steps.push(step("priority", t, passed));
        if !passed {
            reason = DecisionReason::PriorityTooLow;
        }

        if reason == DecisionReason::Admitted {
            let t = Instant::now();
            let passed = !self.store.is_quarantined(&key).await?;
            steps.push(step("quarantine", t, passed));
            if !passed {
                reason = DecisionReason::Quarantined;
            }
        }

        if reason == DecisionReason::Admitted {
            let t = Instant::now();
            let passed = !self.store.is_marked(&key).await?;
            steps.push(step("idempotency", t, passed));
            if !passed {
                reason = DecisionReason::DuplicateRequest;
            }
        }

        if reason == DecisionReason::Admitted {
            let t = Instant::now();
            let passed = self
                .store
                .would_allow(&quota_requests(job, policy))
                .await?;
            steps.push(step("quota", t, passed));
            if !passed {
                reason = DecisionReason::RateLimitExceeded;
            }
        }

        Ok(SimulateResponse {
            job_id: job.job.job_id.clone(),
            admitted: reason == DecisionReason::Admitted,
            reason,
            latency_ms: started.elapsed().as_millis() as u64,
            steps,
        })
    }

    /// Release the job's in-flight slots. A failure clears its idempotency mark so it can be
    /// resubmitted, and counts a strike towards quarantine when the policy has one.
    pub async fn report_outcome(
        &self,
        owner_id: &str,
        outcome: &ExecutionOutcome,
        policy: &Policy,
    ) -> Result<OutcomeResponse, AdmissionError> {
        let key = job_key(owner_id, &outcome.job_id);
        let holdings = self.held.lock().await.remove(&key);
        if holdings.is_none() && !self.store.is_marked(&key).await? {
            return Err(AdmissionError::UnknownJob(outcome.job_id.clone()));
        }

        let mut released = 0;
        for (quota_key, slots) in holdings.unwrap_or_default() {
            self.store.release_inflight(&quota_key, slots).await?;
            released += slots as usize;
        }

        let mut quarantined = false;
        if outcome.status == OutcomeStatus::Failure {
            self.store.clear_idempotency(&key).await?;
            if let Some(ref q) = policy.default_job_policy.quarantine {
                quarantined = self
                    .store
                    .record_failure(
                        &key,
                        q.failure_threshold,
                        millis(q.monitoring_window_ms),
                        millis(q.quarantine_duration_ms),
                    )
                    .await?;
            }
        }

        tracing::info!(
            job_id = %outcome.job_id,
            owner_id,
            status = ?outcome.status,
            released,
            quarantined,
            "execution outcome"
        );
        Ok(OutcomeResponse {
            job_id: outcome.job_id.clone(),
            released,
            quarantined,
        })
    }

    /// Drop every piece of quota state that belongs to `owner_id`, e.g. after a policy change.
    pub async fn reset_owner(&self, owner_id: &str) -> Result<(), AdmissionError> {
        let prefix = owner_prefix(owner_id);
        self.store.flush_prefix(&prefix).await?;
        self.held
            .lock()
            .await
            .retain(|k, _| !k.starts_with(&prefix));
        tracing::info!(owner_id, "owner quota state flushed");
        Ok(())
    }
}

fn step(name: &str, started: Instant, passed: bool) -> StepLatency {
    StepLatency {
        step: name.to_string(),
        micros: started.elapsed().as_micros() as u64,
        passed,
    }
}
