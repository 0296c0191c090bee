//! Fixed pool of conversion workers
//!
//! A semaphore bounds how many tasks run at once and a free list hands out
//! concrete workers. A `WorkerLease` puts its worker back when dropped, so a
//! worker is returned even when the task holding it panics.

use crate::error::{AppError, Result};
use crate::worker::{ConversionWorker, WorkerDeps};
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::info;

const PROFILES_FOLDER: &str = "libreoffice";
const PROFILES_SUBFOLDER: &str = "user_installation";

struct Inner {
    semaphore: Arc<Semaphore>,
    free: Mutex<Vec<Arc<ConversionWorker>>>,
    size: usize,
}

#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

impl WorkerPool {
    /// Build `count` workers numbered from 1.
    ///
    /// With `isolated_profiles` every worker gets its own renderer profile
    /// folder under `<local_files_folder>/libreoffice/user_installation/<n>`.
    pub async fn new(count: usize, deps: WorkerDeps, isolated_profiles: bool) -> Result<Self> {
        if count < 1 {
            return Err(AppError::Config("workers count is wrong".into()));
        }

        let profiles_root = if isolated_profiles {
            Some(profiles_root(&deps.settings.local_files_folder)?)
        } else {
            None
        };

        let mut workers = Vec::with_capacity(count);
        for number in 1..=count {
            let profile = match &profiles_root {
                Some(root) => {
                    let profile = root.join(number.to_string());
                    tokio::fs::create_dir_all(&profile).await?;
                    Some(profile)
                }
                None => None,
            };
            workers.push(Arc::new(ConversionWorker::new(number, deps.clone(), profile)));
        }

        // Reversed so the first lease hands out worker #1.
        workers.reverse();

        info!(workers = count, isolated_profiles, "Worker pool created");

        Ok(Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(count)),
                free: Mutex::new(workers),
                size: count,
            }),
        })
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Workers not leased right now
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Wait for a free worker
    pub async fn acquire(&self) -> Result<WorkerLease> {
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("worker pool is closed".into()))?;

        let worker = self
            .inner
            .free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .ok_or_else(|| AppError::Internal("worker pool is empty".into()))?;

        Ok(WorkerLease {
            worker,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }
}

fn profiles_root(local_files_folder: &Path) -> Result<PathBuf> {
    let folder = if local_files_folder.is_absolute() {
        local_files_folder.to_path_buf()
    } else {
        std::env::current_dir()?.join(local_files_folder)
    };
    Ok(folder.join(PROFILES_FOLDER).join(PROFILES_SUBFOLDER))
}

/// Exclusive use of one worker
pub struct WorkerLease {
    worker: Arc<ConversionWorker>,
    pool: Arc<Inner>,
    // Released after the worker is back on the free list.
    _permit: OwnedSemaphorePermit,
}

impl fmt::Debug for WorkerLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerLease")
            .field("worker", &self.worker.number())
            .finish()
    }
}

impl Deref for WorkerLease {
    type Target = ConversionWorker;

    fn deref(&self) -> &ConversionWorker {
        &self.worker
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        self.pool
            .free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(self.worker.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::limits::FileSizeLimiter;
    use crate::metrics::Metrics;
    use crate::renderer::{Renderer, TargetFormat};
    use crate::worker::WorkerSettings;
    use async_trait::async_trait;
    use s3_utils::{DownloadedFile, ObjectStore, StorageResult};
    use tokio_test::{assert_pending, assert_ready, task};

    struct NoStore;

    #[async_trait]
    impl ObjectStore for NoStore {
        async fn size(&self, _bucket: &str, _path: &str) -> StorageResult<u64> {
            Ok(0)
        }

        async fn download(
            &self,
            _bucket: &str,
            path: &str,
            folder: &Path,
        ) -> StorageResult<DownloadedFile> {
            Ok(DownloadedFile {
                file_name: path.to_string(),
                path: folder.join(path),
            })
        }

        async fn upload(
            &self,
            _local: &Path,
            _content_type: &str,
            _bucket: &str,
            _path: &str,
        ) -> StorageResult<()> {
            Ok(())
        }

        async fn ping(&self) -> StorageResult<()> {
            Ok(())
        }
    }

    struct NoRenderer;

    #[async_trait]
    impl Renderer for NoRenderer {
        async fn convert(
            &self,
            source: &Path,
            _format: TargetFormat,
            _out_dir: &Path,
            _profile: Option<&Path>,
        ) -> Result<PathBuf> {
            Ok(source.to_path_buf())
        }
    }

    fn deps(local: &Path) -> WorkerDeps {
        WorkerDeps {
            storage: Arc::new(NoStore),
            renderer: Arc::new(NoRenderer),
            limiter: Arc::new(FileSizeLimiter::default()),
            metrics: Metrics::new().unwrap(),
            settings: Arc::new(WorkerSettings {
                local_files_folder: local.to_path_buf(),
                small_png_max_side: 10,
                large_png_max_side: 20,
            }),
        }
    }

    #[tokio::test]
    async fn test_profiles_created_per_worker() {
        let dir = tempfile::tempdir().unwrap();
        let pool = WorkerPool::new(3, deps(dir.path()), true).await.unwrap();

        let lease = pool.acquire().await.unwrap();
        assert_eq!(lease.number(), 1);
        assert_eq!(
            lease.profile().unwrap(),
            dir.path().join("libreoffice/user_installation/1")
        );

        for n in 1..=3 {
            assert!(dir
                .path()
                .join(format!("libreoffice/user_installation/{n}"))
                .is_dir());
        }
    }

    #[tokio::test]
    async fn test_no_profiles_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let pool = WorkerPool::new(1, deps(dir.path()), false).await.unwrap();

        let lease = pool.acquire().await.unwrap();
        assert!(lease.profile().is_none());
        assert!(!dir.path().join("libreoffice").exists());
    }

    #[tokio::test]
    async fn test_rejects_empty_pool() {
        let dir = tempfile::tempdir().unwrap();
        assert!(WorkerPool::new(0, deps(dir.path()), false).await.is_err());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let pool = WorkerPool::new(2, deps(dir.path()), false).await.unwrap();

        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        assert_ne!(first.number(), second.number());
        assert_eq!(pool.available(), 0);

        let mut waiting = task::spawn(pool.acquire());
        assert_pending!(waiting.poll());

        let released = second.number();
        drop(second);
        assert!(waiting.is_woken());

        let third = assert_ready!(waiting.poll()).unwrap();
        assert_eq!(third.number(), released);
        assert_eq!(format!("{third:?}"), format!("WorkerLease {{ worker: {released} }}"));
        drop(first);
    }

    #[tokio::test]
    async fn test_worker_returned_after_panic() {
        let dir = tempfile::tempdir().unwrap();
        let pool = WorkerPool::new(1, deps(dir.path()), false).await.unwrap();

        let lease = pool.acquire().await.unwrap();
        let handle = tokio::spawn(async move {
            let _lease = lease;
            panic!("conversion blew up");
        });
        assert!(handle.await.unwrap_err().is_panic());

        assert_eq!(pool.available(), 1);
        let lease = pool.acquire().await.unwrap();
        assert_eq!(lease.number(), 1);
    }
}
