/// Error types for Conversion Service
///
/// Permanent task failures (oversize files, existing destinations, renderer
/// rejections) travel inside the published result. Infrastructure failures
/// surface through logs, metrics and the readiness probe.
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use s3_utils::StorageError;
use std::path::PathBuf;
use std::time::Duration;

/// Result type for conversion-service operations
pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("mime type '{0}' is not available")]
    MimeTypeNotAvailable(String),

    #[error("mime type '{0}' has no extensions")]
    MimeTypeHasNoExtensions(String),

    #[error("duplicate mime type '{0}'")]
    DuplicateMimeType(String),

    #[error("file size for mime type '{0}' did not pass the internal check")]
    LimitAboveInternalCap(String),

    #[error("file size limit settings are malformed: {0}")]
    LimitSettings(String),

    #[error("file size ({size}) is too big, limit is {limit}")]
    FileTooBig { size: u64, limit: u64 },

    #[error("file '{path}' already exists in bucket '{bucket}'")]
    AlreadyExists { bucket: String, path: String },

    #[error("renderer exited with {status}")]
    RendererFailed { status: String },

    #[error("renderer timed out after {0:?}")]
    RendererTimeout(Duration),

    #[error("no lines to process")]
    NoOutputLines,

    #[error("arrow/colon separated parts count mismatch, {found} vs {expected}")]
    OutputPartsMismatch { found: usize, expected: usize },

    #[error("unsupported image format '{0}'")]
    UnsupportedImageFormat(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("operation '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to remove '{path}': {source}")]
    Cleanup {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{primary}; cleanup failed: {cleanup}")]
    Combined {
        primary: Box<AppError>,
        cleanup: Box<AppError>,
    },

    #[error("Kafka error: {0}")]
    Kafka(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("service is already started")]
    AlreadyStarted,

    #[error("service is not started")]
    NotStarted,

    #[error("no topics")]
    NoTopics,

    #[error("{0}")]
    NotReady(&'static str),

    #[error("task panicked: {0}")]
    Panic(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Failures that redelivery cannot fix
    pub fn is_permanent(&self) -> bool {
        match self {
            AppError::MimeTypeNotAvailable(_)
            | AppError::MimeTypeHasNoExtensions(_)
            | AppError::FileTooBig { .. }
            | AppError::AlreadyExists { .. }
            | AppError::RendererFailed { .. }
            | AppError::NoOutputLines
            | AppError::OutputPartsMismatch { .. }
            | AppError::UnsupportedImageFormat(_) => true,
            AppError::Combined { primary, .. } => primary.is_permanent(),
            _ => false,
        }
    }

    /// Join a pipeline error with an optional cleanup error
    pub fn combine(primary: Option<AppError>, cleanup: Option<AppError>) -> Option<AppError> {
        match (primary, cleanup) {
            (None, None) => None,
            (Some(p), None) => Some(p),
            (None, Some(c)) => Some(c),
            (Some(p), Some(c)) => Some(AppError::Combined {
                primary: Box::new(p),
                cleanup: Box::new(c),
            }),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotReady(_)
            | AppError::NotStarted
            | AppError::NoTopics
            | AppError::Storage(_)
            | AppError::Timeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .content_type("text/plain; charset=utf-8")
            .body(self.to_string())
    }
}
