use crate::AppState;
use crate::api::error::{AppError, ErrorResponse};
use crate::services::compile_service::CompiledDocument;
use crate::services::staging::{StagingArea, UploadError};
use crate::utils::validation::validate_archive_filename;
use axum::{
    body::Body,
    extract::{
        Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{StatusCode, header},
    response::Response,
};
use futures::{StreamExt, TryStreamExt};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::path::PathBuf;
use tokio_util::io::{ReaderStream, StreamReader};
use utoipa::ToSchema;

/// Multipart form accepted by `POST /compile`
#[derive(ToSchema)]
pub struct CompileUpload {
    /// ZIP archive with `document.tex` at its root
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

#[utoipa::path(
    post,
    path = "/compile",
    request_body(content = CompileUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Rendered PDF, sent as an application/pdf attachment"),
        (status = 400, description = "Missing file, wrong file type, invalid ZIP, or no document.tex", body = ErrorResponse),
        (status = 413, description = "Upload too large", body = ErrorResponse),
        (status = 500, description = "LaTeX compilation failed", body = ErrorResponse)
    ),
    tag = "compile"
)]
pub async fn compile_document(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let mut multipart = multipart.map_err(|e| AppError::BadRequestWithDetails {
        message: "Failed to parse multipart form".to_string(),
        details: e.body_text(),
    })?;
    let config = &state.config;
    let mut staged: Option<(StagingArea, PathBuf)> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(config.form_field.as_str()) {
            continue;
        }
        if staged.is_some() {
            tracing::warn!("Ignoring repeated '{}' field", config.form_field);
            continue;
        }

        // 1. Validate before touching the filesystem
        let original_filename = field.file_name().unwrap_or_default().to_string();
        let filename = validate_archive_filename(&original_filename, &config.archive_suffix)
            .map_err(|e| {
                tracing::warn!("Rejected upload '{}': {}", original_filename, e);
                AppError::BadRequest(e.message)
            })?;

        // 2. Stage the upload
        let staging = StagingArea::create(config.staging_root.as_deref())?;
        let reader = std::pin::pin!(StreamReader::new(field.map_err(std::io::Error::other)));
        let archive_path = staging
            .save_upload(&filename, reader, config.max_upload_size as u64)
            .await
            .map_err(upload_error)?;

        staged = Some((staging, archive_path));
    }

    let (staging, archive_path) =
        staged.ok_or_else(|| AppError::BadRequest("No file provided".to_string()))?;

    // 3. Extract, compile, check output
    let document = state
        .compile_service
        .compile_archive(staging, &archive_path)
        .await?;

    // 4. Deliver
    pdf_response(document).await
}

/// Fallback for non-POST requests on `/compile`
pub async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

async fn pdf_response(document: CompiledDocument) -> Result<Response, AppError> {
    let CompiledDocument {
        staging,
        path,
        filename,
        size,
    } = document;

    let file = tokio::fs::File::open(&path).await?;
    let body = async_stream::stream! {
        // The staging directory lives until the body finishes or the client goes away
        let _staging = staging;
        let mut chunks = ReaderStream::new(file);
        while let Some(chunk) = chunks.next().await {
            yield chunk;
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime::APPLICATION_PDF.as_ref())
        .header(header::CONTENT_DISPOSITION, content_disposition(&filename))
        .header(header::CONTENT_LENGTH, size)
        .body(Body::from_stream(body))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

/// `attachment` disposition with an ASCII fallback plus the RFC 5987 form
pub fn content_disposition(filename: &str) -> String {
    let fallback_filename: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded_filename = utf8_percent_encode(filename, NON_ALPHANUMERIC);

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback_filename, encoded_filename
    )
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequestWithDetails {
            message: "Failed to parse multipart form".to_string(),
            details: e.body_text(),
        }
    }
}

fn upload_error(e: UploadError) -> AppError {
    match e {
        UploadError::TooLarge { limit } => AppError::PayloadTooLarge(format!(
            "Upload exceeds the maximum allowed size of {} MB",
            limit / 1024 / 1024
        )),
        UploadError::Read(e) => match e
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<MultipartError>())
        {
            Some(inner) if inner.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                AppError::PayloadTooLarge(
                    "Request body exceeds the maximum allowed limit".to_string(),
                )
            }
            _ => AppError::BadRequestWithDetails {
                message: "Failed to save upload".to_string(),
                details: e.to_string(),
            },
        },
        UploadError::Io(e) => AppError::Io(e),
    }
}
