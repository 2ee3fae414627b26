//! DecisionLog implementations: in-memory and JSONL file.

use janus_types::{DecisionListOptions, DecisionLog, DecisionLogError, JobDecision};
use tokio::io::AsyncWriteExt;

/// In-memory DecisionLog (process lifetime only).
pub struct InMemoryDecisionLog {
    decisions: tokio::sync::RwLock<Vec<JobDecision>>,
}

impl InMemoryDecisionLog {
    pub fn new() -> Self {
        Self {
            decisions: tokio::sync::RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryDecisionLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DecisionLog for InMemoryDecisionLog {
    async fn append(&self, decision: JobDecision) -> Result<(), DecisionLogError> {
        self.decisions.write().await.push(decision);
        Ok(())
    }

    async fn list(&self, opts: &DecisionListOptions) -> Result<Vec<JobDecision>, DecisionLogError> {
        let guard = self.decisions.read().await;
        let mut out: Vec<JobDecision> = guard.iter().filter(|d| opts.matches(d)).cloned().collect();
        apply_list_opts(&mut out, opts);
        Ok(out)
    }
}

/// JSONL file-backed DecisionLog (persists across restarts).
pub struct JsonlDecisionLog {
    path: std::path::PathBuf,
    append_lock: tokio::sync::Mutex<()>,
}

impl JsonlDecisionLog {
    pub fn new(path: impl AsRef<std::path::Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            append_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl DecisionLog for JsonlDecisionLog {
    async fn append(&self, decision: JobDecision) -> Result<(), DecisionLogError> {
        let _guard = self.append_lock.lock().await;
        let line = serde_json::to_string(&decision)?;
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        f.write_all(format!("{}\n", line).as_bytes()).await?;
        Ok(())
    }

    async fn list(&self, opts: &DecisionListOptions) -> Result<Vec<JobDecision>, DecisionLogError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out: Vec<JobDecision> = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<JobDecision>(line) {
                Ok(d) if opts.matches(&d) => out.push(d),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "skipping unreadable decision log line"),
            }
        }
        apply_list_opts(&mut out, opts);
        Ok(out)
    }
}

/// Newest first by decision time, then offset/limit. Unset limit means all.
///
/// Concurrent writers may append out of time order; decisions with equal (or unreadable)
/// timestamps stay in reverse append order.
fn apply_list_opts(out: &mut Vec<JobDecision>, opts: &DecisionListOptions) {
    out.reverse();
    out.sort_by(|a, b| b.recorded_at().cmp(&a.recorded_at()));
    let offset = opts.offset.unwrap_or(0) as usize;
    let limit = opts.limit.map(|l| l as usize).unwrap_or(usize::MAX);
    let taken: Vec<JobDecision> = std::mem::take(out)
        .into_iter()
        .skip(offset)
        .take(limit)
        .collect();
    *out = taken;
}
