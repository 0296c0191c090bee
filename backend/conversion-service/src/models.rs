//! Task and result models
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One unit of conversion work, decoded from the inbound topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionTask {
    pub mime_type: String,
    pub bucket: String,
    pub file_path: String,
}

impl ConversionTask {
    pub fn from_json(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

/// Local files created while a task runs, in creation order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalArtifacts {
    pub folder_name: Option<String>,
    pub folder: Option<PathBuf>,
    pub source: Option<PathBuf>,
    pub pdf: Option<PathBuf>,
    pub full_png: Option<PathBuf>,
    pub small_png: Option<PathBuf>,
    pub large_png: Option<PathBuf>,
}

impl LocalArtifacts {
    /// Files to remove before the folder itself
    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        [
            &self.source,
            &self.pdf,
            &self.full_png,
            &self.small_png,
            &self.large_png,
        ]
        .into_iter()
        .flatten()
    }
}

/// Remote destinations of the three artifacts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Destinations {
    pub pdf: String,
    pub small_png: String,
    pub large_png: String,
}

/// Accumulator filled in by the pipeline stages
#[derive(Debug, Default)]
pub struct ConversionResult {
    pub local: LocalArtifacts,
    pub destinations: Destinations,
    pub error: Option<AppError>,
    pub worker_number: usize,
    pub render_time_ms: u64,
    pub work_time_by_worker_ms: u64,
    pub work_time_async_ms: u64,
}

impl ConversionResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn failed(error: AppError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }
}

/// Wire format of the published result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMessage {
    pub task: ConversionTask,
    pub result: ResultBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultBody {
    pub is_success: bool,
    pub error: Option<String>,
    pub bucket: String,
    pub pdf_file_path: String,
    pub small_png_file_path: String,
    pub large_png_file_path: String,
}

impl ResultMessage {
    pub fn new(task: &ConversionTask, result: &ConversionResult) -> Self {
        Self {
            task: task.clone(),
            result: ResultBody {
                is_success: result.is_success(),
                error: result.error.as_ref().map(|e| e.to_string()),
                bucket: task.bucket.clone(),
                pdf_file_path: result.destinations.pdf.clone(),
                small_png_file_path: result.destinations.small_png.clone(),
                large_png_file_path: result.destinations.large_png.clone(),
            },
        }
    }
}
