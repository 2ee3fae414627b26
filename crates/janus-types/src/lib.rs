//! Core types and traits for the Janus job-admission service.
//!
//! Wire types (`Job`, `JobDecision`, batch DTOs) match the JSON accepted and returned by
//! the HTTP API and written to the decision log.

mod decision;
pub mod draft;
mod dto;
mod job;
pub mod page;
mod policy;
mod traits;

pub use decision::*;
pub use dto::*;
pub use job::*;
pub use policy::*;
pub use traits::*;
