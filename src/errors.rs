use crate::{
    handlers::pages,
    services::{object_store::StoreError, rate_limiter::LedgerError},
};
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Message shown for every unknown, expired, deleted or malformed id.
pub const NOT_FOUND_MESSAGE: &str = "File not found or expired";

const INTERNAL_MESSAGE: &str = "Internal server error";

/// How an error body is rendered for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorFormat {
    #[default]
    Json,
    /// `Error: ...` lines for command-line clients.
    Text,
    Html,
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub format: ErrorFormat,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            format: ErrorFormat::default(),
        }
    }

    /// Shortcut for a 500 Internal Server Error. The detail is logged, never
    /// sent to the client.
    pub fn internal(detail: impl fmt::Display) -> Self {
        tracing::error!(error = %detail, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE)
    }

    /// Shortcut for 404 Not Found with the uniform message.
    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// 429 including the limit parameters so clients know how to back off.
    pub fn rate_limited(max_uploads: u32, window_secs: i64) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            format!(
                "Rate limit exceeded. Maximum {} uploads per {} seconds.",
                max_uploads, window_secs
            ),
        )
    }

    /// Fixed 403 for the maintenance trigger, whatever the reason.
    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "Forbidden")
    }

    pub fn with_format(mut self, format: ErrorFormat) -> Self {
        self.format = format;
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.format {
            ErrorFormat::Json => {
                let body = Json(json!({
                    "error": self.message,
                    "status": self.status.as_u16()
                }));
                (self.status, body).into_response()
            }
            ErrorFormat::Text => {
                let mut response =
                    (self.status, format!("Error: {}\n", self.message)).into_response();
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                );
                response
            }
            ErrorFormat::Html => {
                (self.status, Html(pages::error_page(&self.message))).into_response()
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(err) => AppError::bad_request(err.to_string()),
            StoreError::NotFound => AppError::not_found(),
            other => AppError::internal(other),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError::internal(err)
    }
}
