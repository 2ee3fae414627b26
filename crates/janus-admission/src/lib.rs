//! Admission controller: decides, per submitted job, whether it may proceed.

mod controller;
mod rules;

pub use controller::{AdmissionController, AdmissionError};
pub use janus_types::{DecisionReason, JobDecision, Stats};
pub use rules::{job_key, owner_prefix, quota_requests};
