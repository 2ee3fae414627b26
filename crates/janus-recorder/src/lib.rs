//! Asynchronous decision recording: a bounded queue drained by writer tasks into a
//! `DecisionLog`, plus batch and per-config rollups.

mod ledger;
mod log;
mod recorder;
mod trait_;

pub use ledger::BatchLedger;
pub use log::{InMemoryDecisionLog, JsonlDecisionLog};
pub use recorder::{DecisionRecorder, DEFAULT_QUEUE_CAPACITY, DEFAULT_WRITERS};
pub use trait_::{DecisionSink, RecorderError};
