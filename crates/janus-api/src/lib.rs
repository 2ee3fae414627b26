//! HTTP surface of Janus: job admission routes, service guard, and per-user policy.

pub mod config;
pub mod error;
pub mod guard;
pub mod server;
