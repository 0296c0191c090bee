//! Conversion worker - runs the single-task pipeline
//!
//! 1. Check the source object size against the per-mime-type limit
//! 2. Create a scratch folder
//! 3. Download the source object
//! 4. Render it to PDF
//! 5. Render the first PDF page to PNG
//! 6. Derive the small and large previews
//! 7. Upload PDF and both previews, refusing to overwrite
//! 8. Remove every local file, whatever happened before

use crate::error::{AppError, Result};
use crate::imaging;
use crate::limits::FileSizeLimiter;
use crate::metrics::Metrics;
use crate::mime::{self, EXTENSION_SEPARATOR};
use crate::models::{ConversionResult, ConversionTask, Destinations, LocalArtifacts};
use crate::renderer::{Renderer, TargetFormat};
use futures::FutureExt;
use s3_utils::{local_file_name, ObjectStore};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const SIZE_CHECK_TIMEOUT: Duration = Duration::from_secs(30);
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const EXISTS_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings shared by all workers
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub local_files_folder: PathBuf,
    pub small_png_max_side: u32,
    pub large_png_max_side: u32,
}

/// Collaborators shared by all workers
#[derive(Clone)]
pub struct WorkerDeps {
    pub storage: Arc<dyn ObjectStore>,
    pub renderer: Arc<dyn Renderer>,
    pub limiter: Arc<FileSizeLimiter>,
    pub metrics: Metrics,
    pub settings: Arc<WorkerSettings>,
}

pub struct ConversionWorker {
    number: usize,
    deps: WorkerDeps,
    profile: Option<PathBuf>,
}

impl ConversionWorker {
    /// `profile` is the isolated renderer profile folder of this worker
    pub fn new(number: usize, deps: WorkerDeps, profile: Option<PathBuf>) -> Self {
        Self {
            number,
            deps,
            profile,
        }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStore> {
        &self.deps.storage
    }

    pub fn profile(&self) -> Option<&Path> {
        self.profile.as_deref()
    }

    /// Run the whole pipeline for `task`; never fails, the error is in the result
    pub async fn process(&self, task: &ConversionTask) -> ConversionResult {
        self.deps
            .metrics
            .incoming_conversion_requests
            .with_label_values(&[&task.mime_type])
            .inc();

        info!(
            worker = self.number,
            mime_type = %task.mime_type,
            bucket = %task.bucket,
            path = %task.file_path,
            "Conversion started"
        );

        let started = Instant::now();
        let mut result = ConversionResult::default();

        let outcome = AssertUnwindSafe(self.run_stages(task, &mut result))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(AppError::Panic(panic_message(panic.as_ref()))));

        let cleanup = remove_artifacts(&result.local).await;
        result.error = AppError::combine(outcome.err(), cleanup.err());

        let elapsed = started.elapsed();
        result.worker_number = self.number;
        result.work_time_by_worker_ms = elapsed.as_millis() as u64;

        self.deps
            .metrics
            .conversion_duration_by_worker
            .with_label_values(&[&task.mime_type])
            .observe(elapsed.as_millis() as f64);

        match &result.error {
            None => info!(
                worker = self.number,
                path = %task.file_path,
                elapsed_ms = result.work_time_by_worker_ms,
                render_ms = result.render_time_ms,
                "Conversion finished"
            ),
            Some(e) => warn!(
                worker = self.number,
                path = %task.file_path,
                error = %e,
                permanent = e.is_permanent(),
                "Conversion failed"
            ),
        }

        result
    }

    async fn run_stages(&self, task: &ConversionTask, result: &mut ConversionResult) -> Result<()> {
        self.check_size(task).await?;

        let folder_name = Uuid::new_v4().simple().to_string();
        let folder = self.deps.settings.local_files_folder.join(&folder_name);
        tokio::fs::create_dir(&folder).await?;
        result.local.folder_name = Some(folder_name);
        result.local.folder = Some(folder.clone());

        // Recorded up front so an interrupted download is still cleaned up.
        result.local.source = Some(folder.join(local_file_name(&task.file_path)));
        let downloaded = with_timeout(
            "download",
            DOWNLOAD_TIMEOUT,
            self.deps
                .storage
                .download(&task.bucket, &task.file_path, &folder),
        )
        .await??;
        result.local.source = Some(downloaded.path);

        let source = downloaded_source(&result.local)?;
        let pdf = self.render(result, &source, TargetFormat::Pdf, &folder).await?;
        result.local.pdf = Some(pdf.clone());

        let full_png = self.render(result, &pdf, TargetFormat::Png, &folder).await?;
        result.local.full_png = Some(full_png.clone());

        let outcome = imaging::write_previews_async(
            full_png,
            folder.clone(),
            self.deps.settings.small_png_max_side,
            self.deps.settings.large_png_max_side,
        )
        .await;
        let mut touched = outcome.touched.into_iter();
        result.local.small_png = touched.next();
        result.local.large_png = touched.next();
        let previews = outcome.result?;

        result.destinations = destinations(&task.file_path)?;
        let uploads = [
            (&pdf, mime::APPLICATION_PDF, result.destinations.pdf.clone()),
            (&previews.small, mime::IMAGE_PNG, result.destinations.small_png.clone()),
            (&previews.large, mime::IMAGE_PNG, result.destinations.large_png.clone()),
        ];

        for (local, content_type, destination) in uploads {
            self.upload_new(local, content_type, &task.bucket, &destination)
                .await?;
        }

        Ok(())
    }

    async fn check_size(&self, task: &ConversionTask) -> Result<()> {
        let size = with_timeout(
            "size",
            SIZE_CHECK_TIMEOUT,
            self.deps.storage.size(&task.bucket, &task.file_path),
        )
        .await??;

        debug!(path = %task.file_path, size, "Source object size");
        self.deps.limiter.check(&task.mime_type, size)
    }

    async fn render(
        &self,
        result: &mut ConversionResult,
        source: &Path,
        format: TargetFormat,
        folder: &Path,
    ) -> Result<PathBuf> {
        let started = Instant::now();
        let rendered = self
            .deps
            .renderer
            .convert(source, format, folder, self.profile())
            .await;
        result.render_time_ms += started.elapsed().as_millis() as u64;
        rendered
    }

    async fn upload_new(
        &self,
        local: &Path,
        content_type: &str,
        bucket: &str,
        destination: &str,
    ) -> Result<()> {
        let exists = with_timeout(
            "exists",
            EXISTS_TIMEOUT,
            self.deps.storage.exists(bucket, destination),
        )
        .await??;

        if exists {
            return Err(AppError::AlreadyExists {
                bucket: bucket.to_string(),
                path: destination.to_string(),
            });
        }

        self.deps
            .storage
            .upload(local, content_type, bucket, destination)
            .await?;

        debug!(
            local = %local.display(),
            bucket,
            path = destination,
            "Local file has been uploaded"
        );
        Ok(())
    }
}

fn downloaded_source(local: &LocalArtifacts) -> Result<PathBuf> {
    local
        .source
        .clone()
        .ok_or_else(|| AppError::Internal("source file is not set".into()))
}

/// `<path>.pdf`, `<path>.small.png` and `<path>.large.png`
pub fn destinations(source_path: &str) -> Result<Destinations> {
    let pdf = mime::extension(mime::APPLICATION_PDF)?;
    let png = mime::extension(mime::IMAGE_PNG)?;
    let sep = EXTENSION_SEPARATOR;

    Ok(Destinations {
        pdf: format!("{source_path}{sep}{pdf}"),
        small_png: format!("{source_path}{sep}{}{sep}{png}", imaging::SUFFIX_SMALL),
        large_png: format!("{source_path}{sep}{}{sep}{png}", imaging::SUFFIX_LARGE),
    })
}

async fn with_timeout<F, T>(operation: &'static str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| AppError::Timeout { operation, timeout })
}

/// Remove local files, then the scratch folder. Missing entries are fine.
pub async fn remove_artifacts(local: &LocalArtifacts) -> Result<()> {
    let mut error = None;

    for file in local.files() {
        if let Err(e) = tokio::fs::remove_file(file).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                error = AppError::combine(
                    error,
                    Some(AppError::Cleanup {
                        path: file.clone(),
                        source: e,
                    }),
                );
            }
        }
    }

    if let Some(folder) = &local.folder {
        if let Err(e) = tokio::fs::remove_dir_all(folder).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                error = AppError::combine(
                    error,
                    Some(AppError::Cleanup {
                        path: folder.clone(),
                        source: e,
                    }),
                );
            }
        }
    }

    match error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destinations() {
        let destinations = destinations("doc.pdf").unwrap();
        assert_eq!(destinations.pdf, "doc.pdf.pdf");
        assert_eq!(destinations.small_png, "doc.pdf.small.png");
        assert_eq!(destinations.large_png, "doc.pdf.large.png");
    }

    #[test]
    fn test_destinations_keep_folders() {
        let destinations = destinations("reports/2024/q1.docx").unwrap();
        assert_eq!(destinations.pdf, "reports/2024/q1.docx.pdf");
    }

    #[tokio::test]
    async fn test_remove_artifacts_tolerates_missing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("scratch");
        std::fs::create_dir(&folder).unwrap();
        let source = folder.join("doc.pdf");
        std::fs::write(&source, b"pdf").unwrap();

        let local = LocalArtifacts {
            folder: Some(folder.clone()),
            source: Some(source.clone()),
            pdf: Some(folder.join("never-created.pdf")),
            ..Default::default()
        };

        remove_artifacts(&local).await.unwrap();
        assert!(!source.exists());
        assert!(!folder.exists());

        remove_artifacts(&local).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_artifacts_clears_unlisted_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("scratch");
        std::fs::create_dir(&folder).unwrap();
        std::fs::write(folder.join("renderer-leftover.tmp"), b"x").unwrap();

        let local = LocalArtifacts {
            folder: Some(folder.clone()),
            ..Default::default()
        };

        remove_artifacts(&local).await.unwrap();
        assert!(!folder.exists());
    }

    #[test]
    fn test_panic_message() {
        let panic: Box<dyn std::any::Any + Send> = Box::new("renderer exploded");
        assert_eq!(panic_message(panic.as_ref()), "renderer exploded");
        let panic: Box<dyn std::any::Any + Send> = Box::new(String::from("boom"));
        assert_eq!(panic_message(panic.as_ref()), "boom");
    }
}
