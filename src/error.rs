use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::telemetry::{IngestError, LifecycleError, StoreError};

/// Application error types
#[derive(Debug)]
pub enum AppError {
    /// Malformed or missing required fields
    Validation(String),
    /// Absent or invalid credential
    Unauthorized(String),
    /// Valid credential, insufficient role
    Forbidden(String),
    /// Lifecycle operation on an unknown identifier
    NotFound(String),
    /// Duplicate identifier or already-closed entity
    Conflict(String),
    /// Storage collaborator failure (detail is logged, not returned)
    Storage(String),
    /// Internal server error
    InternalError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "Validation error: {}", msg),
            Self::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            Self::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
            Self::Conflict(msg) => write!(f, "Conflict: {}", msg),
            Self::Storage(msg) => write!(f, "Storage error: {}", msg),
            Self::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Storage(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match &self {
            Self::Validation(msg)
            | Self::Unauthorized(msg)
            | Self::Forbidden(msg)
            | Self::NotFound(msg)
            | Self::Conflict(msg)
            | Self::InternalError(msg) => msg.clone(),
            // Storage details stay in the server log
            Self::Storage(_) => "Storage operation failed".to_string(),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": error_type_name(&self),
            }
        }));

        (status, body).into_response()
    }
}

fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::Validation(_) => "validation_error",
        AppError::Unauthorized(_) => "unauthorized",
        AppError::Forbidden(_) => "forbidden",
        AppError::NotFound(_) => "not_found",
        AppError::Conflict(_) => "conflict",
        AppError::Storage(_) => "storage_error",
        AppError::InternalError(_) => "internal_error",
    }
}

// Implement conversions from domain error types
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(err: JsonRejection) -> Self {
        Self::Validation(format!("Invalid request body: {}", err.body_text()))
    }
}

impl From<QueryRejection> for AppError {
    fn from(err: QueryRejection) -> Self {
        Self::Validation(format!("Invalid query parameters: {}", err.body_text()))
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(what) => Self::Conflict(format!("{} already exists", what)),
            other => {
                tracing::error!(error = %other, "Storage collaborator failure");
                Self::Storage(other.to_string())
            }
        }
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Validation(msg) => Self::Validation(msg),
            err @ LifecycleError::NotFound { .. } => Self::NotFound(err.to_string()),
            err @ LifecycleError::AlreadyClosed { .. } => Self::Conflict(err.to_string()),
            LifecycleError::Store(e) => e.into(),
        }
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            err @ IngestError::Invalid { .. } => Self::Validation(err.to_string()),
            err @ IngestError::BatchTooLarge { .. } => Self::Validation(err.to_string()),
            IngestError::Store(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AppError::NotFound("trace abc".to_string());
        assert_eq!(error.to_string(), "Not found: trace abc");
    }

    #[test]
    fn test_error_type_name() {
        assert_eq!(error_type_name(&AppError::Unauthorized("test".to_string())), "unauthorized");
        assert_eq!(error_type_name(&AppError::Forbidden("test".to_string())), "forbidden");
    }

    #[tokio::test]
    async fn test_unauthorized_and_forbidden_are_distinct() {
        let unauthorized = AppError::Unauthorized("missing credential".to_string()).into_response();
        let forbidden = AppError::Forbidden("role user required".to_string()).into_response();
        assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_storage_error_hides_detail() {
        let response = AppError::Storage("disk I/O error at page 12".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["type"], "storage_error");
        assert!(!value["error"]["message"].as_str().unwrap().contains("disk"));
    }

    #[test]
    fn test_duplicate_maps_to_conflict() {
        let err: AppError = StoreError::Duplicate("trace t-1".to_string()).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }
}
