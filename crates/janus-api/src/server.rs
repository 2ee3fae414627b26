//! Axum server and routes.

use crate::error::ApiError;
use crate::guard::{service_guard, ActiveContext};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use janus_admission::AdmissionController;
use janus_recorder::{BatchLedger, DecisionSink};
use janus_store::ConfigCache;
use janus_types::page::{Page, Paged};
use janus_types::{
    ActiveConfig, BatchStatus, BatchSummary, ConfigAssociation, ConfigUpdateRequest,
    DecisionListOptions, DecisionLog, DecisionReason, DecisionStatus, ExecutionOutcome, Job,
    JobBatchRequest, JobBatchResponse, JobDecision, JobSource, OutcomeResponse, Policy,
    parse_timestamp, ServiceStatusBody, SimulateResponse, StatsResponse, SubmittedJob,
    MAX_BATCH_SIZE,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub struct AppState {
    pub controller: Arc<AdmissionController>,
    /// Active policy per user, in front of the account store.
    pub configs: Arc<ConfigCache>,
    pub recorder: Arc<dyn DecisionSink + Send + Sync>,
    pub decision_log: Arc<dyn DecisionLog + Send + Sync>,
    pub ledger: Arc<BatchLedger>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let guarded = Router::new()
        .route("/system/jobs", post(system_job))
        .route("/system/jobs/batch", post(system_batch))
        .route("/system/jobs/batch/atomic", post(system_batch_atomic))
        .route("/dashboard/jobs", post(dashboard_job))
        .route("/dashboard/jobs/batch", post(dashboard_batch))
        .route("/dashboard/jobs/batch/atomic", post(dashboard_batch_atomic))
        .route("/outcomes", post(handle_outcome))
        .route("/simulate", post(handle_simulate))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            service_guard,
        ));

    Router::new()
        .merge(guarded)
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .route("/decisions", get(handle_decisions))
        .route("/batches/:batch_id", get(handle_batch))
        .route(
            "/users/:user_id/config",
            get(get_config).put(put_config).delete(delete_config),
        )
        .route("/users/:user_id/config/association", get(get_association))
        .route("/users/:user_id/batches", get(list_batches))
        .route("/users/:user_id/service", get(get_service).put(put_service))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Hand decisions to the recorder. The caller has its answer either way.
async fn push_decisions(state: &AppState, decisions: &[JobDecision]) {
    if let Err(e) = state.recorder.record_all(decisions).await {
        tracing::error!(error = %e, count = decisions.len(), "failed to queue decisions");
    }
}

fn decision_status(decision: &JobDecision) -> StatusCode {
    match decision.reason {
        DecisionReason::Admitted => StatusCode::ACCEPTED,
        DecisionReason::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::FORBIDDEN,
    }
}

fn envelope(job: Job, source: JobSource, ctx: &ActiveContext) -> SubmittedJob {
    SubmittedJob::new(job, source, ctx.user_id.as_str()).with_config_id(ctx.config_id.as_str())
}

// ---- single jobs ----

async fn system_job(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<ActiveContext>,
    body: Result<Json<Job>, JsonRejection>,
) -> Result<(StatusCode, Json<JobDecision>), ApiError> {
    submit_job(&state, JobSource::System, &ctx, body).await
}

async fn dashboard_job(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<ActiveContext>,
    body: Result<Json<Job>, JsonRejection>,
) -> Result<(StatusCode, Json<JobDecision>), ApiError> {
    submit_job(&state, JobSource::Dashboard, &ctx, body).await
}

async fn submit_job(
    state: &AppState,
    source: JobSource,
    ctx: &ActiveContext,
    body: Result<Json<Job>, JsonRejection>,
) -> Result<(StatusCode, Json<JobDecision>), ApiError> {
    let Json(job) = body?;
    job.validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let submitted = envelope(job, source, ctx);
    let decision = state.controller.check(&submitted, &ctx.policy).await?;
    push_decisions(state, std::slice::from_ref(&decision)).await;
    Ok((decision_status(&decision), Json(decision)))
}

// ---- partial batches ----

async fn system_batch(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<ActiveContext>,
    body: Result<Json<JobBatchRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobBatchResponse>), ApiError> {
    submit_batch(&state, JobSource::System, &ctx, body).await
}

async fn dashboard_batch(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<ActiveContext>,
    body: Result<Json<JobBatchRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobBatchResponse>), ApiError> {
    submit_batch(&state, JobSource::Dashboard, &ctx, body).await
}

fn check_batch_shape(req: &JobBatchRequest) -> Result<(), ApiError> {
    if req.batch_name.trim().is_empty() {
        return Err(ApiError::BadRequest("batch_name is required".to_string()));
    }
    if req.jobs.is_empty() {
        return Err(ApiError::BadRequest(
            "include at least 1 job in the batch".to_string(),
        ));
    }
    if req.jobs.len() > MAX_BATCH_SIZE {
        return Err(ApiError::PayloadTooLarge(format!(
            "batch too large: {} jobs, limit is {}",
            req.jobs.len(),
            MAX_BATCH_SIZE
        )));
    }
    Ok(())
}

/// Jobs are checked one by one; the first invalid job (or a store failure) ends the batch
/// and every job not admitted counts as rejected.
async fn submit_batch(
    state: &AppState,
    source: JobSource,
    ctx: &ActiveContext,
    body: Result<Json<JobBatchRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobBatchResponse>), ApiError> {
    let Json(req) = body?;
    check_batch_shape(&req)?;
    let batch_id = source.new_batch_id();
    let total = req.jobs.len();

    let mut decisions = Vec::with_capacity(total);
    for job in req.jobs {
        if let Err(e) = job.validate() {
            tracing::warn!(batch_id = %batch_id, job_id = %job.job_id, error = %e, "invalid job ends batch");
            break;
        }
        let submitted = envelope(job, source, ctx).in_batch(req.batch_name.as_str(), batch_id.as_str());
        match state.controller.check(&submitted, &ctx.policy).await {
            Ok(d) => decisions.push(d),
            Err(e) => {
                tracing::error!(batch_id = %batch_id, error = %e, "batch stopped on store failure");
                break;
            }
        }
    }
    push_decisions(state, &decisions).await;

    let admitted = decisions.iter().filter(|d| d.is_accepted()).count();
    let rejected = total - admitted;
    tracing::info!(batch_id = %batch_id, admitted, rejected, "batch processed");
    Ok((
        StatusCode::ACCEPTED,
        Json(JobBatchResponse {
            batch_name: req.batch_name,
            batch_id,
            status: BatchStatus::from_counts(admitted, rejected),
            admitted,
            rejected,
            decisions,
        }),
    ))
}

// ---- atomic batches ----

async fn system_batch_atomic(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<ActiveContext>,
    body: Result<Json<JobBatchRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Vec<JobDecision>>), ApiError> {
    submit_batch_atomic(&state, JobSource::System, &ctx, body).await
}

async fn dashboard_batch_atomic(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<ActiveContext>,
    body: Result<Json<JobBatchRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Vec<JobDecision>>), ApiError> {
    submit_batch_atomic(&state, JobSource::Dashboard, &ctx, body).await
}

async fn submit_batch_atomic(
    state: &AppState,
    source: JobSource,
    ctx: &ActiveContext,
    body: Result<Json<JobBatchRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Vec<JobDecision>>), ApiError> {
    let Json(req) = body?;
    check_batch_shape(&req)?;
    let batch_id = source.new_batch_id();

    let mut jobs = Vec::with_capacity(req.jobs.len());
    for (i, job) in req.jobs.into_iter().enumerate() {
        job.validate()
            .map_err(|e| ApiError::BadRequest(format!("invalid job at index {}: {}", i, e)))?;
        jobs.push(envelope(job, source, ctx).in_batch(req.batch_name.as_str(), batch_id.as_str()));
    }

    let decisions = state.controller.check_batch_atomic(&jobs, &ctx.policy).await?;
    push_decisions(state, &decisions).await;

    let status = if decisions.iter().all(|d| d.is_accepted()) {
        StatusCode::ACCEPTED
    } else {
        StatusCode::FORBIDDEN
    };
    Ok((status, Json(decisions)))
}

// ---- outcomes and simulation ----

async fn handle_outcome(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<ActiveContext>,
    body: Result<Json<ExecutionOutcome>, JsonRejection>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let Json(outcome) = body?;
    if outcome.job_id.trim().is_empty() {
        return Err(ApiError::BadRequest("missing job_id".to_string()));
    }
    let res = state
        .controller
        .report_outcome(&ctx.user_id, &outcome, &ctx.policy)
        .await?;
    Ok(Json(res))
}

async fn handle_simulate(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<ActiveContext>,
    body: Result<Json<Job>, JsonRejection>,
) -> Result<Json<SimulateResponse>, ApiError> {
    let Json(mut job) = body?;
    if job.job_id.trim().is_empty() {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        job.job_id = format!("sim_{}", nanos);
    }
    job.validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let submitted = envelope(job, JobSource::Dashboard, &ctx);
    let res = state.controller.dry_run(&submitted, &ctx.policy).await?;
    Ok(Json(res))
}

// ---- read models ----

async fn handle_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(state.controller.stats().await.into())
}

#[derive(Debug, Deserialize)]
pub struct DecisionsQuery {
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub since: Option<String>,
}

async fn handle_decisions(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DecisionsQuery>,
) -> Result<Json<Paged<JobDecision>>, ApiError> {
    let status = match q.status.as_deref().filter(|s| !s.is_empty()) {
        Some(s) => Some(s.parse::<DecisionStatus>().map_err(ApiError::BadRequest)?),
        None => None,
    };
    let since = q.since.filter(|s| !s.is_empty());
    if let Some(ref s) = since {
        if parse_timestamp(s).is_none() {
            return Err(ApiError::BadRequest(format!(
                "since must be an RFC 3339 timestamp, got '{}'",
                s
            )));
        }
    }
    let opts = DecisionListOptions {
        owner_id: q.owner,
        batch_id: q.batch_id,
        status,
        since,
        limit: None,
        offset: None,
    };
    let all = state.decision_log.list(&opts).await?;
    Ok(Json(Page::new(q.page, q.page_size).slice(&all)))
}

async fn handle_batch(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchSummary>, ApiError> {
    state
        .ledger
        .batch(&batch_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("batch {} not found", batch_id)))
}

async fn list_batches(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Json<Vec<BatchSummary>> {
    Json(state.ledger.batches(&user_id).await)
}

// ---- per-user config and service switch ----

async fn get_config(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<ActiveConfig>, ApiError> {
    state
        .configs
        .accounts()
        .active_config(&user_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no active config for user {}", user_id)))
}

/// Validate and activate a policy. The user's cached policy and quota state are reset so
/// the new limits apply from the next request.
async fn put_config(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    body: Result<Json<ConfigUpdateRequest>, JsonRejection>,
) -> Result<Json<ActiveConfig>, ApiError> {
    let Json(req) = body?;
    Policy::from_value(req.config.clone())
        .map_err(|e| ApiError::BadRequest(format!("invalid policy: {}", e)))?;
    let config_id = req
        .config_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let active = ActiveConfig {
        config_id,
        config: req.config,
    };

    state
        .configs
        .accounts()
        .activate_config(&user_id, active.clone())
        .await?;
    state.configs.refresh(&user_id).await?;
    state.controller.reset_owner(&user_id).await?;
    tracing::info!(user_id = %user_id, config_id = %active.config_id, "config activated");
    Ok(Json(active))
}

async fn delete_config(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let removed = state.configs.accounts().deactivate_config(&user_id).await?;
    state.configs.invalidate(&user_id).await;
    if !removed {
        return Err(ApiError::NotFound(format!(
            "no active config for user {}",
            user_id
        )));
    }
    state.controller.reset_owner(&user_id).await?;
    tracing::info!(user_id = %user_id, "config deactivated");
    Ok(StatusCode::NO_CONTENT)
}

async fn get_association(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<ConfigAssociation>, ApiError> {
    let active = state
        .configs
        .get(&user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no active config for user {}", user_id)))?;
    state
        .ledger
        .association(&user_id, &active.config_id)
        .await
        .map(Json)
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "config {} has no recorded decisions",
                active.config_id
            ))
        })
}

async fn get_service(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<ServiceStatusBody>, ApiError> {
    let status = state.configs.accounts().service_status(&user_id).await?;
    Ok(Json(ServiceStatusBody { status }))
}

async fn put_service(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    body: Result<Json<ServiceStatusBody>, JsonRejection>,
) -> Result<Json<ServiceStatusBody>, ApiError> {
    let Json(req) = body?;
    state
        .configs
        .accounts()
        .set_service_status(&user_id, req.status)
        .await?;
    tracing::info!(user_id = %user_id, status = ?req.status, "service status changed");
    Ok(Json(req))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
