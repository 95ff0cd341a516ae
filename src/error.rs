//! Error types for chatrelay.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::admission::Busy;

/// Result type alias for chatrelay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chatrelay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Auth(String),

    #[error("Server busy, please retry")]
    RateLimit { retry_after_secs: u64 },

    #[error("{message}")]
    Upstream {
        status: u16,
        message: String,
        retry_after: Option<String>,
    },

    #[error("{0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Taxonomy label rendered as `error.type`.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::BadRequest(_) => "bad_request",
            Error::Auth(_) => "auth",
            Error::RateLimit { .. } => "rate_limit",
            Error::Upstream { .. } | Error::Transport(_) => "upstream",
            Error::Config(_) | Error::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Error::Transport(_) => StatusCode::BAD_GATEWAY,
            Error::Config(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Value for the `Retry-After` response header, if any.
    pub fn retry_after(&self) -> Option<String> {
        match self {
            Error::RateLimit { retry_after_secs } => Some(retry_after_secs.to_string()),
            Error::Upstream { retry_after, .. } => retry_after.clone(),
            _ => None,
        }
    }
}

impl From<Busy> for Error {
    fn from(busy: Busy) -> Self {
        Error::RateLimit {
            retry_after_secs: busy.retry_after_secs,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        // OpenAI-compatible error envelope
        let body = serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": self.kind(),
                "code": status.as_u16()
            }
        });

        let mut response = (status, axum::Json(body)).into_response();
        if let Some(value) = self
            .retry_after()
            .and_then(|v| HeaderValue::from_str(&v).ok())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}
