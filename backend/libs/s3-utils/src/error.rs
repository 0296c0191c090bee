use std::time::Duration;

/// Object storage error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object '{path}' not found in bucket '{bucket}'")]
    NotFound { bucket: String, path: String },

    #[error("uploaded data size mismatch: file size is {file_size}, but uploaded bytes count is {uploaded}")]
    SizeMismatch { file_size: u64, uploaded: u64 },

    #[error("object store returned no upload id")]
    MissingUploadId,

    #[error("object store returned no entity tag for part {0}")]
    MissingETag(i32),

    #[error("object store returned no content length for '{0}'")]
    MissingContentLength(String),

    #[error("S3 error: {0}")]
    Sdk(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{primary}; aborting the multipart upload also failed: {abort}")]
    AbortFailed {
        primary: Box<StorageError>,
        abort: Box<StorageError>,
    },
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
