use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::generator::GeneratorError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Image generation failed: {0}")]
    Generation(#[from] GeneratorError),

    #[error("Bad gateway: {0}")]
    BadGateway(String),

    #[error("Storage error: {0}")]
    Storage(anyhow::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Generation(GeneratorError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Generation(_) | AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error, details) = match self {
            AppError::BadRequest(message) => (message, None),
            AppError::NotFound(message) => (message, None),
            AppError::Generation(err) => {
                tracing::error!("image generation failed: {err}");
                ("Image generation failed".to_string(), Some(err.to_string()))
            }
            AppError::BadGateway(message) => {
                tracing::error!("upstream failure: {message}");
                ("Bad gateway".to_string(), Some(message))
            }
            AppError::Storage(err) => {
                tracing::error!("storage failure: {err:#}");
                ("Storage error".to_string(), Some(err.to_string()))
            }
            AppError::Internal(err) => {
                tracing::error!("internal error: {err:#}");
                ("Internal server error".to_string(), None)
            }
        };
        (status, Json(ErrorResponse { error, details })).into_response()
    }
}
