use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// User-visible error taxonomy. Every failure the gateway surfaces maps onto
/// exactly one of these kinds; internal retries never reach the caller.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Organization context required")]
    OrganizationRequired,

    /// Cross-tenant access attempt. Surfaced externally as NotFound so that
    /// resource existence never leaks across organizations.
    #[error("Cross-organization access denied: {0}")]
    OrganizationForbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("Index write failed: {0}")]
    IndexWriteFailed(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Stable kind string used in error responses, WS `error` frames and
    /// `QueryEvent.error_kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "Unauthenticated",
            Self::OrganizationRequired => "OrganizationRequired",
            // externally indistinguishable from a missing resource
            Self::OrganizationForbidden(_) => "NotFound",
            Self::NotFound(_) => "NotFound",
            Self::PermissionDenied(_) => "PermissionDenied",
            Self::InvalidInput(_) => "InvalidInput",
            Self::Busy(_) => "Busy",
            Self::EmbeddingUnavailable(_) => "EmbeddingUnavailable",
            Self::IndexUnavailable(_) => "IndexUnavailable",
            Self::LlmUnavailable(_) => "LLMUnavailable",
            Self::IndexWriteFailed(_) => "IndexWriteFailed",
            Self::Cancelled => "Cancelled",
            Self::Internal(_) => "Internal",
        }
    }

    /// Kind recorded in analytics. Unlike `kind()` this keeps the real cause
    /// of a cross-org denial so security review can find it.
    pub fn internal_kind(&self) -> &'static str {
        match self {
            Self::OrganizationForbidden(_) => "OrganizationForbidden",
            other => other.kind(),
        }
    }

    /// Message safe to show a caller. Cross-org details never leave the
    /// process.
    pub fn public_message(&self) -> String {
        match self {
            Self::OrganizationForbidden(_) => "resource not found".to_string(),
            other => other.to_string(),
        }
    }

    /// True for downstream outages that the orchestrator may answer with
    /// partial retrieval context.
    pub fn is_downstream_outage(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingUnavailable(_) | Self::IndexUnavailable(_) | Self::LlmUnavailable(_)
        )
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthenticated(msg) => {
                tracing::warn!("Unauthenticated: {}", msg);
                (StatusCode::UNAUTHORIZED, msg.clone())
            }
            ApiError::OrganizationRequired => {
                tracing::warn!("Request without organization context");
                (StatusCode::FORBIDDEN, self.to_string())
            }
            ApiError::OrganizationForbidden(msg) => {
                // Security event: logged with the real cause, answered as 404.
                tracing::warn!(security_event = true, "Cross-organization attempt: {}", msg);
                (StatusCode::NOT_FOUND, "resource not found".to_string())
            }
            ApiError::NotFound(msg) => {
                tracing::debug!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, msg.clone())
            }
            ApiError::PermissionDenied(msg) => {
                tracing::warn!("Permission denied: {}", msg);
                (StatusCode::FORBIDDEN, msg.clone())
            }
            ApiError::InvalidInput(msg) => {
                tracing::warn!("Invalid input: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            ApiError::Busy(msg) => {
                tracing::warn!("Busy: {}", msg);
                (StatusCode::CONFLICT, msg.clone())
            }
            ApiError::EmbeddingUnavailable(msg)
            | ApiError::IndexUnavailable(msg)
            | ApiError::LlmUnavailable(msg) => {
                tracing::error!("Downstream unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
            }
            ApiError::IndexWriteFailed(msg) => {
                tracing::error!("Index write failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            ApiError::Cancelled => {
                tracing::debug!("Request cancelled by caller");
                (StatusCode::REQUEST_TIMEOUT, self.to_string())
            }
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
        };

        let body = Json(ErrorResponse {
            error: self.kind().to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => ApiError::NotFound("row not found".to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
