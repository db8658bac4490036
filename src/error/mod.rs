use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Expected failure carrying the status and message shown to the client
    #[error("{message}")]
    Business { status: StatusCode, message: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    pub fn business(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Business {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::business(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::business(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Uniform JSON envelope for every API response
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            message: "Success".to_string(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn failure(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            message: message.into(),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, client_message, log_message) = match &self {
            AppError::Business { status, message } => {
                tracing::debug!(
                    status = %status.as_u16(),
                    message = %message,
                    "Business error"
                );
                return ApiResponse::failure(*status, message.clone()).into_response();
            }
            AppError::Config(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error",
                e.to_string(),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
                msg.clone(),
            ),
            AppError::Redis(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable",
                e.to_string(),
            ),
            AppError::Database(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable",
                e.to_string(),
            ),
        };

        // Always log the detailed error server-side
        tracing::error!(
            status = %status.as_u16(),
            message = %log_message,
            "API error"
        );

        let message = if is_production() {
            client_message.to_string()
        } else {
            log_message
        };

        ApiResponse::failure(status, message).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
