//! Decision recorder: bounded queue + a small pool of writer tasks.

use crate::{BatchLedger, DecisionSink, RecorderError};
use async_trait::async_trait;
use janus_types::{DecisionLog, JobDecision};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_WRITERS: usize = 2;

/// Queues decisions and writes them off the request path. Each writer appends to the
/// decision log and then folds the decision into the batch ledger.
pub struct DecisionRecorder {
    tx: RwLock<Option<mpsc::Sender<JobDecision>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    ledger: Arc<BatchLedger>,
}

impl DecisionRecorder {
    /// Spawn `writers` tasks sharing one queue of `capacity` slots. Zero values fall back
    /// to one writer and one slot.
    pub fn start(
        log: Arc<dyn DecisionLog + Send + Sync>,
        ledger: Arc<BatchLedger>,
        writers: usize,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<JobDecision>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let writers = writers.max(1);

        let workers = (0..writers)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let log = Arc::clone(&log);
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move {
                    loop {
                        // Hold the receiver only while waiting for the next item.
                        let next = { rx.lock().await.recv().await };
                        let Some(decision) = next else {
                            break;
                        };
                        if let Err(e) = log.append(decision.clone()).await {
                            tracing::error!(
                                worker,
                                job_id = %decision.job_id,
                                error = %e,
                                "decision log append failed"
                            );
                        }
                        ledger.apply(&decision).await;
                    }
                    tracing::debug!(worker, "decision writer stopped");
                })
            })
            .collect();

        tracing::info!(writers, capacity, "decision recorder started");
        Self {
            tx: RwLock::new(Some(tx)),
            workers: Mutex::new(workers),
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<BatchLedger> {
        &self.ledger
    }

    /// Close the queue and wait for the writers to drain it.
    pub async fn shutdown(&self) {
        self.tx.write().await.take();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for h in handles {
            if let Err(e) = h.await {
                tracing::error!(error = %e, "decision writer panicked");
            }
        }
        tracing::info!("decision recorder drained");
    }
}

#[async_trait]
impl DecisionSink for DecisionRecorder {
    async fn record(&self, decision: JobDecision) -> Result<(), RecorderError> {
        let tx = {
            let guard = self.tx.read().await;
            guard.clone().ok_or(RecorderError::Closed)?
        };
        tx.send(decision).await.map_err(|_| RecorderError::Closed)
    }
}
