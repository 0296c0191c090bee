/// S3 operations backing `ObjectStore` and `MultipartApi`
use crate::error::{StorageError, StorageResult};
use crate::multipart::{self, MultipartApi, PartTag};
use crate::store::{local_file_name, DownloadedFile, ObjectStore};
use crate::{S3Client, PING_TIMEOUT};
use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

fn sdk_error<E>(err: E) -> StorageError
where
    E: std::error::Error,
{
    StorageError::Sdk(DisplayErrorContext(err).to_string())
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn size(&self, bucket: &str, path: &str) -> StorageResult<u64> {
        let response = self
            .client()
            .head_object()
            .bucket(bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| {
                let not_found = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    StorageError::NotFound {
                        bucket: bucket.to_string(),
                        path: path.to_string(),
                    }
                } else {
                    sdk_error(e)
                }
            })?;

        let length = response
            .content_length()
            .ok_or_else(|| StorageError::MissingContentLength(path.to_string()))?;

        Ok(length.max(0) as u64)
    }

    async fn download(
        &self,
        bucket: &str,
        path: &str,
        dest_dir: &Path,
    ) -> StorageResult<DownloadedFile> {
        let response = self
            .client()
            .get_object()
            .bucket(bucket)
            .key(path)
            .send()
            .await
            .map_err(sdk_error)?;

        let file_name = local_file_name(path);
        let local_path = dest_dir.join(&file_name);

        let mut body = response.body;
        let mut file = tokio::fs::File::create(&local_path).await?;

        let copied: StorageResult<u64> = async {
            let mut written = 0u64;
            while let Some(chunk) = body.try_next().await.map_err(sdk_error)? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok(written)
        }
        .await;

        match copied {
            Ok(written) => {
                debug!(bucket, path, bytes = written, local = %local_path.display(), "Object downloaded");
                Ok(DownloadedFile {
                    file_name,
                    path: local_path,
                })
            }
            Err(e) => {
                drop(file);
                if let Err(remove_err) = tokio::fs::remove_file(&local_path).await {
                    warn!(error = %remove_err, local = %local_path.display(), "Failed to remove partial download");
                }
                Err(e)
            }
        }
    }

    async fn upload(
        &self,
        local_file: &Path,
        content_type: &str,
        bucket: &str,
        path: &str,
    ) -> StorageResult<()> {
        multipart::upload_file(self, local_file, content_type, bucket, path, self.upload_options())
            .await
    }

    async fn ping(&self) -> StorageResult<()> {
        tokio::time::timeout(PING_TIMEOUT, self.client().list_buckets().send())
            .await
            .map_err(|_| StorageError::Timeout(PING_TIMEOUT))?
            .map_err(sdk_error)?;

        Ok(())
    }
}

#[async_trait]
impl MultipartApi for S3Client {
    async fn create_upload(
        &self,
        bucket: &str,
        path: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        let response = self
            .client()
            .create_multipart_upload()
            .bucket(bucket)
            .key(path)
            .content_type(content_type)
            .send()
            .await
            .map_err(sdk_error)?;

        response
            .upload_id()
            .map(str::to_string)
            .ok_or(StorageError::MissingUploadId)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        path: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> StorageResult<String> {
        let response = self
            .client()
            .upload_part()
            .bucket(bucket)
            .key(path)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_length(body.len() as i64)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(sdk_error)?;

        response
            .e_tag()
            .map(str::to_string)
            .ok_or(StorageError::MissingETag(part_number))
    }

    async fn complete_upload(
        &self,
        bucket: &str,
        path: &str,
        upload_id: &str,
        parts: Vec<PartTag>,
    ) -> StorageResult<()> {
        let completed: Vec<CompletedPart> = parts
            .into_iter()
            .map(|part| {
                CompletedPart::builder()
                    .e_tag(part.e_tag)
                    .part_number(part.part_number)
                    .build()
            })
            .collect();

        self.client()
            .complete_multipart_upload()
            .bucket(bucket)
            .key(path)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(())
    }

    async fn abort_upload(&self, bucket: &str, path: &str, upload_id: &str) -> StorageResult<()> {
        self.client()
            .abort_multipart_upload()
            .bucket(bucket)
            .key(path)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(())
    }
}
