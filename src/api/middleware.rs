use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::SchemaError;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Schema unavailable: {0}")]
    SchemaUnavailable(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Budget of {requested} is below the minimum viable size {minimum}")]
    BudgetTooSmall { requested: usize, minimum: usize },

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match self {
            AppError::SchemaUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorDetail::new("SCHEMA_UNAVAILABLE", msg).with_details(
                    "Query generation can proceed without schema context; retry later for a fresh discovery.",
                ),
            ),
            AppError::Connection(msg) => (
                StatusCode::BAD_GATEWAY,
                ErrorDetail::new("CONNECTION_ERROR", msg)
                    .with_details("Check that the graph database is running and the URI is correct."),
            ),
            AppError::BudgetTooSmall { requested, minimum } => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new(
                    "BUDGET_TOO_SMALL",
                    format!("max_size {} is below the minimum viable size", requested),
                )
                .with_details(format!("Use max_size >= {}", minimum)),
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("VALIDATION_ERROR", msg),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_detail,
        });

        (status, body).into_response()
    }
}

impl From<SchemaError> for AppError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::Unavailable(msg) => AppError::SchemaUnavailable(msg),
            SchemaError::Connection(msg) => AppError::Connection(msg),
            SchemaError::BudgetTooSmall { requested, minimum } => {
                AppError::BudgetTooSmall { requested, minimum }
            }
        }
    }
}
