//! HTTP error type: every failure leaves as `{ "error": <message> }` with a status code.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use janus_admission::AdmissionError;
use janus_store::ConfigCacheError;
use janus_types::{AccountStoreError, DecisionLogError, ErrorResponse};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(r: JsonRejection) -> Self {
        ApiError::BadRequest(format!("invalid json: {}", r.body_text()))
    }
}

impl From<AdmissionError> for ApiError {
    fn from(e: AdmissionError) -> Self {
        match e {
            AdmissionError::UnknownJob(_) => ApiError::NotFound(e.to_string()),
            AdmissionError::Store(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<AccountStoreError> for ApiError {
    fn from(e: AccountStoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<ConfigCacheError> for ApiError {
    fn from(e: ConfigCacheError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<DecisionLogError> for ApiError {
    fn from(e: DecisionLogError) -> Self {
        ApiError::Internal(e.to_string())
    }
}
