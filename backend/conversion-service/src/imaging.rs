//! Raster preview derivation
//!
//! Scales the full-size first page raster so its longer side matches a
//! configured maximum and writes the result as PNG. Resizing is CPU bound, so
//! the async entry point runs on the blocking thread pool.

use crate::error::{AppError, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Targets whose longer side reaches this size get the high quality filter
pub const HIGH_QUALITY_SIZE_THRESHOLD_PX: u32 = 360;

pub const SUFFIX_SMALL: &str = "small";
pub const SUFFIX_LARGE: &str = "large";

/// The two scaled previews written next to the full-size raster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Previews {
    pub small: PathBuf,
    pub large: PathBuf,
}

pub fn scale_factor(width: u32, height: u32, max_side: u32) -> f64 {
    max_side as f64 / width.max(height).max(1) as f64
}

pub fn scaled_dimensions(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    let factor = scale_factor(width, height, max_side);
    let scale = |side: u32| ((side as f64 * factor).round() as u32).max(1);
    (scale(width), scale(height))
}

pub fn filter_for(target_width: u32, target_height: u32) -> FilterType {
    if target_width.max(target_height) >= HIGH_QUALITY_SIZE_THRESHOLD_PX {
        FilterType::CatmullRom
    } else {
        FilterType::Triangle
    }
}

pub fn scale_image(image: &DynamicImage, max_side: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    let (target_width, target_height) = scaled_dimensions(width, height, max_side);
    image.resize_exact(target_width, target_height, filter_for(target_width, target_height))
}

/// `page.png` + `small` -> `page_small.png`
pub fn suffixed_file_name(file_name: &str, suffix: &str) -> String {
    let path = Path::new(file_name);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => format!(
            "{}_{}.{}",
            stem.to_string_lossy(),
            suffix,
            ext.to_string_lossy()
        ),
        _ => format!("{file_name}_{suffix}"),
    }
}

/// Decode a PNG file, rejecting every other format
pub fn open_png(path: &Path) -> Result<DynamicImage> {
    let reader = image::io::Reader::open(path)?.with_guessed_format()?;

    match reader.format() {
        Some(ImageFormat::Png) => Ok(reader.decode()?),
        Some(other) => Err(AppError::UnsupportedImageFormat(format!("{other:?}"))),
        None => Err(AppError::UnsupportedImageFormat("unknown".to_string())),
    }
}

/// Write both previews of `full_size` into `out_dir` (blocking)
pub fn write_previews(
    full_size: &Path,
    out_dir: &Path,
    small_max_side: u32,
    large_max_side: u32,
    created: &mut Vec<PathBuf>,
) -> Result<Previews> {
    let image = open_png(full_size)?;
    let file_name = full_size
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "page.png".to_string());

    let small = out_dir.join(suffixed_file_name(&file_name, SUFFIX_SMALL));
    created.push(small.clone());
    scale_image(&image, small_max_side).save_with_format(&small, ImageFormat::Png)?;

    let large = out_dir.join(suffixed_file_name(&file_name, SUFFIX_LARGE));
    created.push(large.clone());
    scale_image(&image, large_max_side).save_with_format(&large, ImageFormat::Png)?;

    debug!(
        source = %full_size.display(),
        width = image.width(),
        height = image.height(),
        "Previews written"
    );

    Ok(Previews { small, large })
}

/// Outcome of `write_previews_async`: the previews, and every path that may
/// have been written even when the operation failed.
pub struct PreviewOutcome {
    pub result: Result<Previews>,
    pub touched: Vec<PathBuf>,
}

pub async fn write_previews_async(
    full_size: PathBuf,
    out_dir: PathBuf,
    small_max_side: u32,
    large_max_side: u32,
) -> PreviewOutcome {
    let task = tokio::task::spawn_blocking(move || {
        let mut touched = Vec::new();
        let result = write_previews(
            &full_size,
            &out_dir,
            small_max_side,
            large_max_side,
            &mut touched,
        );
        PreviewOutcome { result, touched }
    });

    match task.await {
        Ok(outcome) => outcome,
        Err(e) => PreviewOutcome {
            result: Err(AppError::Panic(format!("preview task failed: {e}"))),
            touched: Vec::new(),
        },
    }
}
