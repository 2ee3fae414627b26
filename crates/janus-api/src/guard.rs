//! Service guard for job routes: the caller names a user whose service is running and who
//! has an active policy.

use crate::error::ApiError;
use crate::server::AppState;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use janus_types::Policy;
use std::sync::Arc;

pub const USER_HEADER: &str = "x-user-id";

pub const PAUSED_MESSAGE: &str = "Service is paused, please enable it from dashboard";
pub const NO_CONFIG_MESSAGE: &str = "No active config found, please create one from dashboard";

/// Attached to guarded requests as an extension.
#[derive(Debug, Clone)]
pub struct ActiveContext {
    pub user_id: String,
    pub config_id: String,
    pub policy: Arc<Policy>,
}

pub async fn service_guard(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    match resolve(&state, request.headers()).await {
        Ok(ctx) => {
            tracing::debug!(user_id = %ctx.user_id, config_id = %ctx.config_id, "request admitted by guard");
            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

async fn resolve(state: &AppState, headers: &HeaderMap) -> Result<ActiveContext, ApiError> {
    let user_id = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing X-User-ID header".to_string()))?
        .to_string();

    if !state.configs.accounts().is_service_running(&user_id).await? {
        tracing::warn!(user_id = %user_id, "request for paused service");
        return Err(ApiError::Forbidden(PAUSED_MESSAGE.to_string()));
    }

    let Some(active) = state.configs.get(&user_id).await? else {
        return Err(ApiError::Forbidden(NO_CONFIG_MESSAGE.to_string()));
    };

    Ok(ActiveContext {
        user_id,
        config_id: active.config_id,
        policy: active.policy,
    })
}
