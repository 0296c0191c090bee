/// Multipart upload protocol driver
///
/// Streams a local file in fixed-size parts, verifies the uploaded byte count
/// against the size recorded before the upload started and completes the
/// session. Any failure after initiation aborts the session before the error
/// is returned.
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Default part size (64 MiB)
pub const PART_SIZE: usize = 64 * 1024 * 1024;

/// Default timeout for a single part request
pub const PART_TIMEOUT: Duration = Duration::from_secs(60);

/// Descriptor of an uploaded part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartTag {
    pub part_number: i32,
    pub e_tag: String,
}

/// Server-side multipart primitives
#[async_trait]
pub trait MultipartApi: Send + Sync {
    async fn create_upload(&self, bucket: &str, path: &str, content_type: &str)
        -> StorageResult<String>;

    /// Returns the entity tag of the stored part
    async fn upload_part(
        &self,
        bucket: &str,
        path: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> StorageResult<String>;

    async fn complete_upload(
        &self,
        bucket: &str,
        path: &str,
        upload_id: &str,
        parts: Vec<PartTag>,
    ) -> StorageResult<()>;

    async fn abort_upload(&self, bucket: &str, path: &str, upload_id: &str) -> StorageResult<()>;
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub part_size: usize,
    pub part_timeout: Duration,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            part_size: PART_SIZE,
            part_timeout: PART_TIMEOUT,
        }
    }
}

/// Upload `local_file` to `bucket`/`path` as a multipart object
pub async fn upload_file<A>(
    api: &A,
    local_file: &Path,
    content_type: &str,
    bucket: &str,
    path: &str,
    options: &UploadOptions,
) -> StorageResult<()>
where
    A: MultipartApi + ?Sized,
{
    let file_size = tokio::fs::metadata(local_file).await?.len();
    let mut file = tokio::fs::File::open(local_file).await?;

    let upload_id = api.create_upload(bucket, path, content_type).await?;

    let outcome = match send_parts(api, &mut file, bucket, path, &upload_id, file_size, options).await
    {
        Ok(parts) => {
            debug!(bucket, path, parts = parts.len(), "Completing multipart upload");
            api.complete_upload(bucket, path, &upload_id, parts).await
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok(()) => Ok(()),
        Err(e) => Err(abort_after(api, bucket, path, &upload_id, e).await),
    }
}

async fn send_parts<A>(
    api: &A,
    file: &mut tokio::fs::File,
    bucket: &str,
    path: &str,
    upload_id: &str,
    file_size: u64,
    options: &UploadOptions,
) -> StorageResult<Vec<PartTag>>
where
    A: MultipartApi + ?Sized,
{
    let mut parts = Vec::new();
    let mut uploaded: u64 = 0;

    loop {
        let chunk = read_chunk(file, options.part_size).await?;
        // An empty file still goes up as a single empty part.
        if chunk.is_empty() && !parts.is_empty() {
            break;
        }

        let chunk_len = chunk.len() as u64;
        let part_number = parts.len() as i32 + 1;

        let e_tag = tokio::time::timeout(
            options.part_timeout,
            api.upload_part(bucket, path, upload_id, part_number, chunk),
        )
        .await
        .map_err(|_| StorageError::Timeout(options.part_timeout))??;

        uploaded += chunk_len;
        parts.push(PartTag { part_number, e_tag });
    }

    if uploaded != file_size {
        return Err(StorageError::SizeMismatch {
            file_size,
            uploaded,
        });
    }

    Ok(parts)
}

async fn read_chunk(file: &mut tokio::fs::File, part_size: usize) -> StorageResult<Vec<u8>> {
    let mut buffer = Vec::with_capacity(part_size.min(8 * 1024 * 1024));
    (&mut *file)
        .take(part_size as u64)
        .read_to_end(&mut buffer)
        .await?;
    Ok(buffer)
}

async fn abort_after<A>(
    api: &A,
    bucket: &str,
    path: &str,
    upload_id: &str,
    primary: StorageError,
) -> StorageError
where
    A: MultipartApi + ?Sized,
{
    warn!(bucket, path, upload_id, error = %primary, "Aborting multipart upload");

    match api.abort_upload(bucket, path, upload_id).await {
        Ok(()) => primary,
        Err(abort) => StorageError::AbortFailed {
            primary: Box::new(primary),
            abort: Box::new(abort),
        },
    }
}
