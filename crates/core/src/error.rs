//! Error taxonomy and the single boundary that maps it to the client-facing
//! `{error, code, description?}` envelope.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Errors a token/project store or response cache can return. Kept as a
/// small closed set so middleware can map exhaustively.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("rate limited")]
    RateLimit,
    #[error("store unavailable: {0}")]
    Transient(String),
    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Wrap any error, obfuscating it first so a raw token value can never
    /// reach this variant's `Display` output.
    pub fn transient(err: impl std::fmt::Display) -> Self {
        StoreError::Transient(err.to_string())
    }
}

/// Errors the token validator can return.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid token")]
    Invalid,
    #[error("token expired")]
    Expired,
    #[error("rate limited")]
    RateLimited,
    #[error("token deactivated")]
    Deactivated,
    #[error("unknown token")]
    Unknown,
    #[error("store unavailable")]
    StoreUnavailable,
}

impl From<StoreError> for ValidationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ValidationError::Unknown,
            StoreError::RateLimit => ValidationError::RateLimited,
            StoreError::Conflict | StoreError::Internal(_) => ValidationError::StoreUnavailable,
            StoreError::Transient(_) => ValidationError::StoreUnavailable,
        }
    }
}

/// The machine-readable codes returned to clients alongside an HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    MissingToken,
    InvalidToken,
    RateLimited,
    ProjectInactive,
    EndpointNotAllowed,
    MethodNotAllowed,
    ServiceUnavailable,
    UpstreamError,
    InternalError,
    Validation,
    Conflict,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::MissingToken => "missing_token",
            ErrorCode::InvalidToken => "invalid_token",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::ProjectInactive => "project_inactive",
            ErrorCode::EndpointNotAllowed => "endpoint_not_allowed",
            ErrorCode::MethodNotAllowed => "method_not_allowed",
            ErrorCode::ServiceUnavailable => "service_unavailable",
            ErrorCode::UpstreamError => "upstream_error",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::Validation => "validation_error",
            ErrorCode::Conflict => "conflict",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::MissingToken | ErrorCode::InvalidToken => StatusCode::UNAUTHORIZED,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::ProjectInactive => StatusCode::FORBIDDEN,
            ErrorCode::EndpointNotAllowed => StatusCode::NOT_FOUND,
            ErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::UpstreamError => StatusCode::BAD_GATEWAY,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Validation => StatusCode::BAD_REQUEST,
            ErrorCode::Conflict => StatusCode::CONFLICT,
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

/// The single boundary error type the pipeline converts every internal
/// failure into before responding to a client.
#[derive(Debug)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub description: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn missing_token() -> Self {
        Self::new(ErrorCode::MissingToken, "Missing bearer token")
    }

    pub fn invalid_token() -> Self {
        Self::new(ErrorCode::InvalidToken, "Invalid or expired token")
    }

    pub fn rate_limited() -> Self {
        Self::new(ErrorCode::RateLimited, "Token has exceeded its request quota")
    }

    pub fn project_inactive() -> Self {
        Self::new(ErrorCode::ProjectInactive, "Project is inactive")
    }

    pub fn endpoint_not_allowed() -> Self {
        Self::new(ErrorCode::EndpointNotAllowed, "Endpoint is not allowed")
    }

    pub fn method_not_allowed() -> Self {
        Self::new(ErrorCode::MethodNotAllowed, "Method is not allowed for this endpoint")
    }

    pub fn service_unavailable() -> Self {
        Self::new(ErrorCode::ServiceUnavailable, "Upstream service is temporarily unavailable")
    }

    pub fn upstream_error() -> Self {
        Self::new(ErrorCode::UpstreamError, "Upstream request failed")
    }

    pub fn internal() -> Self {
        Self::new(ErrorCode::InternalError, "Internal error")
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Invalid | ValidationError::Unknown | ValidationError::Deactivated => {
                ApiError::invalid_token()
            }
            ValidationError::Expired => ApiError::invalid_token(),
            ValidationError::RateLimited => ApiError::rate_limited(),
            ValidationError::StoreUnavailable => ApiError::service_unavailable(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code.as_str())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.status();
        let body = ErrorEnvelope {
            error: self.message,
            code: self.code.as_str(),
            description: self.description,
        };
        (status, Json(body)).into_response()
    }
}
