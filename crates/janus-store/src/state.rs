//! In-memory StateStore: one mutex over all admission state, so a multi-key check and its
//! commit are indivisible.

use crate::clock::{Clock, SystemClock};
use async_trait::async_trait;
use janus_types::{QuotaKind, QuotaRequest, StateStore, StoreError};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Idempotency marks are pruned of expired entries once the map grows past this.
const MARK_PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: f64,
    created: f64,
}

#[derive(Default)]
struct Inner {
    /// job key -> mark expiry.
    marks: HashMap<String, f64>,
    buckets: HashMap<String, Bucket>,
    inflight: HashMap<String, i64>,
    /// quota key -> time of last successful charge (for min-interval smoothing).
    last_admit: HashMap<String, f64>,
    /// job key -> failure times inside the monitoring window.
    failures: HashMap<String, VecDeque<f64>>,
    /// job key -> quarantine expiry.
    quarantine: HashMap<String, f64>,
}

/// A grouped request plus the state it would leave behind if charged.
enum Charge {
    Bucket(String, Bucket),
    InFlight(String, i64),
}

impl Charge {
    fn key(&self) -> &str {
        match self {
            Charge::Bucket(k, _) | Charge::InFlight(k, _) => k,
        }
    }
}

impl Inner {
    /// Requests sharing a key are merged (costs summed); the first one's limits apply.
    /// None if a summed cost overflows.
    fn group(reqs: &[QuotaRequest]) -> Option<Vec<QuotaRequest>> {
        let mut out: Vec<QuotaRequest> = Vec::with_capacity(reqs.len());
        for r in reqs {
            match out.iter_mut().find(|g| g.key == r.key) {
                Some(g) => g.cost = g.cost.checked_add(r.cost)?,
                None => out.push(r.clone()),
            }
        }
        Some(out)
    }

    /// Creates missing token buckets full, stamped with `now`. A bucket's warmup ramp runs
    /// from its first check, whether or not that check is charged.
    fn touch_buckets(&mut self, reqs: &[QuotaRequest], now: f64) {
        for req in reqs {
            if let QuotaKind::TokenBucket { capacity, .. } = req.kind {
                self.buckets.entry(req.key.clone()).or_insert(Bucket {
                    tokens: capacity,
                    last_refill: now,
                    created: now,
                });
            }
        }
    }

    fn effective_capacity(capacity: f64, created: f64, warmup_ms: i64, now: f64) -> f64 {
        if warmup_ms <= 0 {
            return capacity;
        }
        let warmup = warmup_ms as f64 / 1000.0;
        let age = (now - created).max(0.0);
        if age >= warmup {
            capacity
        } else {
            (capacity * age / warmup).max(1.0).min(capacity)
        }
    }

    /// Returns the charges to apply if every request passes, or None.
    fn evaluate(&self, reqs: &[QuotaRequest], now: f64) -> Option<Vec<Charge>> {
        let mut charges = Vec::new();
        for req in Self::group(reqs)? {
            if req.min_interval_secs > 0.0 {
                if let Some(last) = self.last_admit.get(&req.key) {
                    if now - last < req.min_interval_secs {
                        return None;
                    }
                }
            }
            match req.kind {
                QuotaKind::TokenBucket {
                    capacity,
                    refill_per_sec,
                } => {
                    let bucket = self.buckets.get(&req.key).copied().unwrap_or(Bucket {
                        tokens: capacity,
                        last_refill: now,
                        created: now,
                    });
                    let cap = Self::effective_capacity(capacity, bucket.created, req.warmup_ms, now);
                    let elapsed = (now - bucket.last_refill).max(0.0);
                    let tokens = (bucket.tokens + elapsed * refill_per_sec).min(cap);
                    let cost = req.cost as f64;
                    if tokens < cost {
                        return None;
                    }
                    charges.push(Charge::Bucket(
                        req.key,
                        Bucket {
                            tokens: tokens - cost,
                            last_refill: now,
                            created: bucket.created,
                        },
                    ));
                }
                QuotaKind::InFlight { max } => {
                    let held = self.inflight.get(&req.key).copied().unwrap_or(0);
                    let next = held.checked_add(req.cost)?;
                    if next > max {
                        return None;
                    }
                    charges.push(Charge::InFlight(req.key, next));
                }
            }
        }
        Some(charges)
    }

    fn commit(&mut self, charges: Vec<Charge>, now: f64) {
        for charge in charges {
            self.last_admit.insert(charge.key().to_string(), now);
            match charge {
                Charge::Bucket(k, b) => {
                    self.buckets.insert(k, b);
                }
                Charge::InFlight(k, held) => {
                    self.inflight.insert(k, held);
                }
            }
        }
    }

    fn retain_without_prefix(&mut self, prefix: &str) {
        let keep = |k: &String| !k.starts_with(prefix);
        self.marks.retain(|k, _| keep(k));
        self.buckets.retain(|k, _| keep(k));
        self.inflight.retain(|k, _| keep(k));
        self.last_admit.retain(|k, _| keep(k));
        self.failures.retain(|k, _| keep(k));
        self.quarantine.retain(|k, _| keep(k));
    }
}

/// In-memory StateStore. Process lifetime only.
pub struct InMemoryStateStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    /// Tokens currently in a bucket (after refill), if the bucket exists. For inspection.
    pub async fn tokens(&self, key: &str, refill_per_sec: f64, capacity: f64) -> Option<f64> {
        let now = self.clock.now();
        let guard = self.inner.lock().await;
        guard.buckets.get(key).map(|b| {
            let elapsed = (now - b.last_refill).max(0.0);
            (b.tokens + elapsed * refill_per_sec).min(capacity)
        })
    }

    pub async fn inflight(&self, key: &str) -> i64 {
        self.inner.lock().await.inflight.get(key).copied().unwrap_or(0)
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn check_and_mark_admitted(
        &self,
        job_key: &str,
        window: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut guard = self.inner.lock().await;
        if guard.marks.len() > MARK_PRUNE_THRESHOLD {
            guard.marks.retain(|_, expiry| *expiry > now);
        }
        if let Some(expiry) = guard.marks.get(job_key) {
            if *expiry > now {
                return Ok(true);
            }
        }
        guard
            .marks
            .insert(job_key.to_string(), now + window.as_secs_f64());
        Ok(false)
    }

    async fn is_marked(&self, job_key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let guard = self.inner.lock().await;
        Ok(guard.marks.get(job_key).is_some_and(|expiry| *expiry > now))
    }

    async fn clear_idempotency(&self, job_key: &str) -> Result<(), StoreError> {
        self.inner.lock().await.marks.remove(job_key);
        Ok(())
    }

    async fn allow_request_atomic(&self, reqs: &[QuotaRequest]) -> Result<bool, StoreError> {
        if reqs.is_empty() {
            return Ok(true);
        }
        let now = self.clock.now();
        let mut guard = self.inner.lock().await;
        guard.touch_buckets(reqs, now);
        match guard.evaluate(reqs, now) {
            Some(charges) => {
                guard.commit(charges, now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn would_allow(&self, reqs: &[QuotaRequest]) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let guard = self.inner.lock().await;
        Ok(guard.evaluate(reqs, now).is_some())
    }

    async fn release_inflight(&self, key: &str, amount: i64) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let remaining = match guard.inflight.get_mut(key) {
            Some(held) => {
                *held = (*held - amount).max(0);
                *held
            }
            None => return Ok(()),
        };
        if remaining == 0 {
            guard.inflight.remove(key);
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        job_key: &str,
        threshold: i64,
        window: Duration,
        ban: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let horizon = now - window.as_secs_f64();
        let mut guard = self.inner.lock().await;
        let strikes = guard.failures.entry(job_key.to_string()).or_default();
        while strikes.front().is_some_and(|t| *t <= horizon) {
            strikes.pop_front();
        }
        strikes.push_back(now);
        if strikes.len() as i64 >= threshold {
            guard.failures.remove(job_key);
            guard
                .quarantine
                .insert(job_key.to_string(), now + ban.as_secs_f64());
            tracing::warn!(job_key, threshold, "job quarantined after repeated failures");
            return Ok(true);
        }
        Ok(false)
    }

    async fn is_quarantined(&self, job_key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut guard = self.inner.lock().await;
        match guard.quarantine.get(job_key) {
            Some(expiry) if *expiry > now => Ok(true),
            Some(_) => {
                guard.quarantine.remove(job_key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn flush_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        self.inner.lock().await.retain_without_prefix(prefix);
        Ok(())
    }

    async fn flush(&self) -> Result<(), StoreError> {
        *self.inner.lock().await = Inner::default();
        Ok(())
    }
}
