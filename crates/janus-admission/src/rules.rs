//! Translation of a policy and a job into store keys and quota requests.
//!
//! Every key is scoped by owner so one user's policy change can reset only their state.

use janus_types::{refill_rate, Policy, QuotaRequest, SubmittedJob};

/// Leading segment of every key owned by `owner_id`. The owner is length-prefixed so no
/// owner's prefix is a prefix of another owner's keys, whatever characters the id holds.
pub fn owner_prefix(owner_id: &str) -> String {
    format!("{}#{}:", owner_id.len(), owner_id)
}

/// Idempotency and quarantine key of a job.
pub fn job_key(owner_id: &str, job_id: &str) -> String {
    format!("{}job:{}", owner_prefix(owner_id), job_id)
}

fn global_key(owner_id: &str) -> String {
    format!("{}global", owner_prefix(owner_id))
}

fn tenant_key(owner_id: &str, tenant_id: &str) -> String {
    format!("{}tenant:{}", owner_prefix(owner_id), tenant_id)
}

fn dependency_key(owner_id: &str, name: &str) -> String {
    format!("{}dep:{}", owner_prefix(owner_id), name)
}

/// Limits a job must fit inside: global bucket, tenant bucket, then one request per
/// dependency the policy knows about. Unknown dependencies are unconstrained.
pub fn quota_requests(job: &SubmittedJob, policy: &Policy) -> Vec<QuotaRequest> {
    let owner = job.owner_id.as_str();
    let g = &policy.global_execution_limit;
    let mut reqs = Vec::with_capacity(2 + job.job.dependencies.len());

    reqs.push(
        QuotaRequest::bucket(
            global_key(owner),
            g.max_jobs,
            refill_rate(g.max_jobs, g.window_ms),
            1,
        )
        .with_min_interval_ms(g.min_interval_ms),
    );

    if g.max_concurrent_per_tenant > 0 {
        reqs.push(QuotaRequest::bucket(
            tenant_key(owner, &job.job.tenant_id),
            g.max_concurrent_per_tenant,
            refill_rate(g.max_concurrent_per_tenant, g.window_ms),
            1,
        ));
    }

    for (name, cost) in &job.job.dependencies {
        let Some(dep) = policy.dependencies.get(name) else {
            continue;
        };
        let key = dependency_key(owner, name);
        if let Some(ref rl) = dep.rate_limit {
            reqs.push(
                QuotaRequest::bucket(
                    key.clone(),
                    rl.max_requests,
                    refill_rate(rl.max_requests, rl.window_ms),
                    *cost,
                )
                .with_min_interval_ms(dep.min_interval_ms)
                .with_warmup_ms(dep.warmup_ms),
            );
        }
        if let Some(ref c) = dep.concurrent {
            let mut req = QuotaRequest::in_flight(format!("{}:inflight", key), c.max_inflight, 1);
            if dep.rate_limit.is_none() {
                req = req.with_min_interval_ms(dep.min_interval_ms);
            }
            reqs.push(req);
        }
    }

    reqs
}
