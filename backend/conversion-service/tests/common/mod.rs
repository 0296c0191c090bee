//! In-memory collaborators for driving the pipeline without S3, Kafka or LibreOffice
#![allow(dead_code)]

use async_trait::async_trait;
use conversion_service::error::{AppError, Result};
use conversion_service::models::{ConversionResult, ConversionTask};
use conversion_service::renderer::{Renderer, TargetFormat};
use conversion_service::service::ResultPublisher;
use conversion_service::worker::{WorkerDeps, WorkerSettings};
use conversion_service::{FileSizeLimiter, Metrics};
use image::{ImageFormat, Rgb, RgbImage};
use s3_utils::{local_file_name, DownloadedFile, ObjectStore, StorageError, StorageResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BUCKET: &str = "documents";
pub const SMALL_SIDE: u32 = 100;
pub const LARGE_SIDE: u32 = 400;

pub const LIMITS_XML: &str = r#"
<Settings>
  <FileSizeLimiter>
    <MimeType name="application/msword" sizeLimit="1000"/>
    <MimeType name="application/pdf" sizeLimit="1000"/>
  </FileSizeLimiter>
</Settings>
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub bucket: String,
    pub path: String,
    pub content_type: String,
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    uploads: Mutex<Vec<Upload>>,
    calls: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, bucket: &str, path: &str, bytes: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), path.to_string()), bytes);
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str, path: &str) {
        self.calls.lock().unwrap().push(format!("{call} {path}"));
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn size(&self, bucket: &str, path: &str) -> StorageResult<u64> {
        self.record("size", path);
        self.object(bucket, path)
            .map(|bytes| bytes.len() as u64)
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            })
    }

    async fn download(&self, bucket: &str, path: &str, dest_dir: &Path) -> StorageResult<DownloadedFile> {
        self.record("download", path);
        let bytes = self.object(bucket, path).ok_or_else(|| StorageError::NotFound {
            bucket: bucket.to_string(),
            path: path.to_string(),
        })?;

        let file_name = local_file_name(path);
        let local = dest_dir.join(&file_name);
        tokio::fs::write(&local, bytes).await?;
        Ok(DownloadedFile {
            file_name,
            path: local,
        })
    }

    async fn upload(&self, local_file: &Path, content_type: &str, bucket: &str, path: &str) -> StorageResult<()> {
        self.record("upload", path);
        let bytes = tokio::fs::read(local_file).await?;
        self.put(bucket, path, bytes);
        self.uploads.lock().unwrap().push(Upload {
            bucket: bucket.to_string(),
            path: path.to_string(),
            content_type: content_type.to_string(),
        });
        Ok(())
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Writes a fake PDF and a real 600x800 PNG, optionally failing or panicking
#[derive(Default)]
pub struct FakeRenderer {
    pub fail_on: Option<TargetFormat>,
    pub panic_on: Option<TargetFormat>,
    /// Write bytes that are not a PNG in place of the raster
    pub corrupt_png: bool,
    pub delay: Duration,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub profiles: Mutex<Vec<Option<PathBuf>>>,
}

impl FakeRenderer {
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn profiles(&self) -> Vec<Option<PathBuf>> {
        self.profiles.lock().unwrap().clone()
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn convert(
        &self,
        source: &Path,
        format: TargetFormat,
        out_dir: &Path,
        profile: Option<&Path>,
    ) -> Result<PathBuf> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.profiles.lock().unwrap().push(profile.map(Path::to_path_buf));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.panic_on == Some(format) {
            panic!("renderer crashed");
        }
        if self.fail_on == Some(format) {
            return Err(AppError::RendererFailed {
                status: "exit status: 77".into(),
            });
        }

        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "out".into());
        let destination = out_dir.join(format!("{stem}.{}", format.as_str()));

        match format {
            TargetFormat::Pdf => tokio::fs::write(&destination, b"%PDF-1.7 fake").await?,
            TargetFormat::Png if self.corrupt_png => tokio::fs::write(&destination, b"not a png").await?,
            TargetFormat::Png => {
                let image = RgbImage::from_pixel(600, 800, Rgb([20, 120, 220]));
                image.save_with_format(&destination, ImageFormat::Png)?;
            }
        }

        Ok(destination)
    }
}

#[derive(Debug, Clone)]
pub struct Published {
    pub task: ConversionTask,
    pub is_success: bool,
    pub error: Option<String>,
    pub worker_number: usize,
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub fail: AtomicBool,
    published: Mutex<Vec<Published>>,
}

impl RecordingPublisher {
    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultPublisher for RecordingPublisher {
    async fn publish(&self, task: &ConversionTask, result: &ConversionResult) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Kafka("broker transport failure".into()));
        }
        self.published.lock().unwrap().push(Published {
            task: task.clone(),
            is_success: result.is_success(),
            error: result.error.as_ref().map(|e| e.to_string()),
            worker_number: result.worker_number,
        });
        Ok(())
    }

    fn check_ready(&self) -> Result<()> {
        Ok(())
    }
}

pub fn task(mime_type: &str, path: &str) -> ConversionTask {
    ConversionTask {
        mime_type: mime_type.to_string(),
        bucket: BUCKET.to_string(),
        file_path: path.to_string(),
    }
}

pub fn deps(
    store: Arc<MemoryStore>,
    renderer: Arc<FakeRenderer>,
    metrics: Metrics,
    local_files_folder: &Path,
) -> WorkerDeps {
    WorkerDeps {
        storage: store,
        renderer,
        limiter: Arc::new(FileSizeLimiter::from_xml(LIMITS_XML).unwrap()),
        metrics,
        settings: Arc::new(WorkerSettings {
            local_files_folder: local_files_folder.to_path_buf(),
            small_png_max_side: SMALL_SIDE,
            large_png_max_side: LARGE_SIDE,
        }),
    }
}

/// Entries left in a folder, ignoring worker profile folders
pub fn leftovers(folder: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(folder)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| !path.ends_with("libreoffice"))
        .collect()
}
