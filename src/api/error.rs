use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// JSON body of every error response
#[derive(Serialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Bad Request: {message} ({details})")]
    BadRequestWithDetails { message: String, details: String },

    #[error("Invalid ZIP file: {0}")]
    InvalidArchive(String),

    #[error("LaTeX compilation failed")]
    CompilationFailed { details: String },

    #[error("LaTeX compilation timed out after {0}s")]
    CompilationTimeout(u64),

    #[error("PDF not generated")]
    OutputMissing,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_)
            | AppError::BadRequestWithDetails { .. }
            | AppError::InvalidArchive(_) => StatusCode::BAD_REQUEST,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::CompilationFailed { .. }
            | AppError::CompilationTimeout(_)
            | AppError::OutputMissing
            | AppError::Internal(_)
            | AppError::Io(_)
            | AppError::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error, details) = match self {
            AppError::BadRequest(msg) => (msg, None),
            AppError::BadRequestWithDetails { message, details } => (message, Some(details)),
            AppError::InvalidArchive(reason) => ("Invalid ZIP file".to_string(), Some(reason)),
            AppError::CompilationFailed { details } => {
                tracing::warn!("LaTeX compilation failed");
                ("LaTeX compilation failed".to_string(), Some(details))
            }
            AppError::CompilationTimeout(secs) => {
                tracing::warn!("LaTeX compilation timed out after {}s", secs);
                (
                    "LaTeX compilation timed out".to_string(),
                    Some(format!("The compiler was stopped after {} seconds", secs)),
                )
            }
            AppError::OutputMissing => {
                tracing::error!("Compiler reported success but produced no PDF");
                ("PDF not generated".to_string(), None)
            }
            AppError::MethodNotAllowed => ("Method not allowed".to_string(), None),
            AppError::PayloadTooLarge(msg) => (msg, None),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ("Internal Server Error".to_string(), None)
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {:?}", e);
                ("Internal Server Error".to_string(), None)
            }
            AppError::Anyhow(e) => {
                tracing::error!("Anyhow error: {:?}", e);
                ("Internal Server Error".to_string(), None)
            }
        };

        (status, Json(ErrorResponse { error, details })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn render(err: AppError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_bad_request_has_no_details() {
        let (status, json) = render(AppError::BadRequest("No file provided".to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "No file provided");
        assert!(json.get("details").is_none());
    }

    #[tokio::test]
    async fn test_invalid_archive() {
        let (status, json) = render(AppError::InvalidArchive("bad header".to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Invalid ZIP file");
        assert_eq!(json["details"], "bad header");
    }

    #[tokio::test]
    async fn test_compilation_failed() {
        let (status, json) = render(AppError::CompilationFailed {
            details: "! Undefined control sequence.".to_string(),
        })
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "LaTeX compilation failed");
        assert_eq!(json["details"], "! Undefined control sequence.");
    }

    #[tokio::test]
    async fn test_internal_errors_are_masked() {
        let (status, json) = render(AppError::Internal("disk on fire".to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "Internal Server Error");

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let (status, json) = render(AppError::from(io)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "Internal Server Error");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::MethodNotAllowed.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            AppError::PayloadTooLarge("too big".to_string()).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(AppError::CompilationTimeout(5).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AppError::OutputMissing.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
