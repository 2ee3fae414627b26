//! Server configuration, read once from the environment.

use janus_recorder::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WRITERS};
use std::path::PathBuf;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";

#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub listen: String,
    /// JSONL decision log; in-memory when unset.
    pub decision_log: Option<PathBuf>,
    pub writers: usize,
    pub queue_capacity: usize,
    /// Policy file activated for `bootstrap_user` at startup.
    pub default_policy: Option<PathBuf>,
    pub bootstrap_user: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            decision_log: None,
            writers: DEFAULT_WRITERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            default_policy: None,
            bootstrap_user: None,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        Self {
            listen: non_empty("JANUS_LISTEN").unwrap_or(defaults.listen),
            decision_log: non_empty("JANUS_DECISION_LOG").map(PathBuf::from),
            writers: parse_count(non_empty("JANUS_WRITERS"), "JANUS_WRITERS", defaults.writers),
            queue_capacity: parse_count(
                non_empty("JANUS_QUEUE_CAPACITY"),
                "JANUS_QUEUE_CAPACITY",
                defaults.queue_capacity,
            ),
            default_policy: non_empty("JANUS_DEFAULT_POLICY").map(PathBuf::from),
            bootstrap_user: non_empty("JANUS_BOOTSTRAP_USER"),
        }
    }
}

fn parse_count(raw: Option<String>, name: &str, default: usize) -> usize {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => n,
        _ => {
            tracing::warn!(var = name, value = %raw, default, "invalid value, using default");
            default
        }
    }
}
