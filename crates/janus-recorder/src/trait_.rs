//! Sink trait: hand off a decision for asynchronous recording.

use async_trait::async_trait;
use janus_types::JobDecision;

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("recorder is shut down")]
    Closed,
}

/// Where handlers send decisions once the caller has been answered.
///
/// Contract: `record` returns once the decision is queued, not once it is written. It waits
/// for queue space rather than dropping decisions.
#[async_trait]
pub trait DecisionSink: Send + Sync {
    async fn record(&self, decision: JobDecision) -> Result<(), RecorderError>;

    async fn record_all(&self, decisions: &[JobDecision]) -> Result<(), RecorderError> {
        for d in decisions {
            self.record(d.clone()).await?;
        }
        Ok(())
    }
}
