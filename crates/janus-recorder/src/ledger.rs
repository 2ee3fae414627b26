//! Batch and per-config rollups built from the stream of recorded decisions.

use janus_types::{BatchSummary, ConfigAssociation, JobDecision};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    batches: HashMap<String, BatchSummary>,
    /// Keyed by (owner_id, config_id).
    associations: HashMap<(String, String), ConfigAssociation>,
    /// Batches already counted toward an association.
    counted: HashSet<(String, String, String)>,
}

pub struct BatchLedger {
    inner: RwLock<Inner>,
}

impl BatchLedger {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Fold one decision into its batch rollup and, when it carries a config id, the
    /// config association. The first decision of a batch creates the batch.
    pub async fn apply(&self, decision: &JobDecision) {
        let mut inner = self.inner.write().await;
        let batch = inner
            .batches
            .entry(decision.batch_id.clone())
            .or_insert_with(|| BatchSummary {
                batch_id: decision.batch_id.clone(),
                batch_name: decision.batch_name.clone(),
                owner_id: decision.owner_id.clone(),
                total_jobs: 0,
                admitted_jobs: 0,
                created_at: decision.timestamp.clone(),
            });
        batch.total_jobs += 1;
        if decision.is_accepted() {
            batch.admitted_jobs += 1;
        }

        if decision.config_id.is_empty() {
            return;
        }
        let first_in_batch = inner.counted.insert((
            decision.owner_id.clone(),
            decision.config_id.clone(),
            decision.batch_id.clone(),
        ));
        let assoc = inner
            .associations
            .entry((decision.owner_id.clone(), decision.config_id.clone()))
            .or_insert_with(|| ConfigAssociation {
                config_id: decision.config_id.clone(),
                owner_id: decision.owner_id.clone(),
                total_jobs: 0,
                succeeded_jobs: 0,
                failed_jobs: 0,
                no_of_batches: 0,
            });
        assoc.total_jobs += 1;
        if decision.is_accepted() {
            assoc.succeeded_jobs += 1;
        } else {
            assoc.failed_jobs += 1;
        }
        if first_in_batch {
            assoc.no_of_batches += 1;
        }
    }

    pub async fn batch(&self, batch_id: &str) -> Option<BatchSummary> {
        self.inner.read().await.batches.get(batch_id).cloned()
    }

    /// Batches of one owner, newest first.
    pub async fn batches(&self, owner_id: &str) -> Vec<BatchSummary> {
        let inner = self.inner.read().await;
        let mut out: Vec<BatchSummary> = inner
            .batches
            .values()
            .filter(|b| b.owner_id == owner_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub async fn association(&self, owner_id: &str, config_id: &str) -> Option<ConfigAssociation> {
        self.inner
            .read()
            .await
            .associations
            .get(&(owner_id.to_string(), config_id.to_string()))
            .cloned()
    }
}

impl Default for BatchLedger {
    fn default() -> Self {
        Self::new()
    }
}
