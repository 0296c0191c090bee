/// Object store abstraction used by conversion workers
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// A file fetched from the object store into a local folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub file_name: String,
    pub path: PathBuf,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Size of the object in bytes, `StorageError::NotFound` when absent
    async fn size(&self, bucket: &str, path: &str) -> StorageResult<u64>;

    /// Whether the object exists. Only a not-found answer maps to `false`.
    async fn exists(&self, bucket: &str, path: &str) -> StorageResult<bool> {
        presence(self.size(bucket, path).await)
    }

    /// Stream the object into `dest_dir`, named after its remote path
    async fn download(&self, bucket: &str, path: &str, dest_dir: &Path)
        -> StorageResult<DownloadedFile>;

    /// Multipart upload of a local file, aborted on any failure
    async fn upload(
        &self,
        local_file: &Path,
        content_type: &str,
        bucket: &str,
        path: &str,
    ) -> StorageResult<()>;

    /// Connectivity check
    async fn ping(&self) -> StorageResult<()>;
}

/// Map a size probe onto an existence answer
pub fn presence(probe: StorageResult<u64>) -> StorageResult<bool> {
    match probe {
        Ok(_) => Ok(true),
        Err(StorageError::NotFound { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Local file name for a remote object path
pub fn local_file_name(remote_path: &str) -> String {
    remote_path.replace('/', "_")
}
