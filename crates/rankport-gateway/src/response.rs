//! Response envelope and error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rankport_core::error::RankportError;
use serde::Serialize;

/// `{status, data?, message?}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T = serde_json::Value> {
    pub status: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self { status: true, data: Some(data), message: None })
    }
}

impl ApiResponse {
    /// Success with no payload.
    pub fn done() -> Json<Self> {
        Json(Self { status: true, data: None, message: None })
    }
}

/// Handler error. Wraps the engine error so it can be turned into a response.
#[derive(Debug)]
pub struct ApiError(pub RankportError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<RankportError> for ApiError {
    fn from(e: RankportError) -> Self {
        Self(e)
    }
}

pub fn status_for(e: &RankportError) -> StatusCode {
    match e {
        RankportError::Auth(_) => StatusCode::UNAUTHORIZED,
        RankportError::Forbidden(_) => StatusCode::FORBIDDEN,
        RankportError::Validation(_) => StatusCode::BAD_REQUEST,
        RankportError::Conflict(_) => StatusCode::CONFLICT,
        RankportError::NotFound(_) => StatusCode::NOT_FOUND,
        RankportError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        match &self.0 {
            RankportError::Internal(_) => tracing::error!("request failed: {}", self.0),
            other => tracing::debug!(kind = other.kind(), "request rejected: {other}"),
        }
        let body = ApiResponse::<serde_json::Value> {
            status: false,
            data: None,
            message: Some(self.0.public_message()),
        };
        (status, Json(body)).into_response()
    }
}
