//! External document renderer
//!
//! Documents are converted by a headless LibreOffice subprocess. The converted
//! file path is recovered from the summary line the renderer prints.

pub mod output;
pub mod process;

use crate::error::Result;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub use output::{parse_summary, ConversionSummary};

/// Hard limit for a single renderer invocation
pub const RENDERER_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const ARG_CONVERT_TO: &str = "--convert-to";
const ARG_OUTPUT_FOLDER: &str = "--outdir";
const ARG_HEADLESS: &str = "--headless";
const ARG_HELP: &str = "-h";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFormat {
    Pdf,
    Png,
}

impl TargetFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetFormat::Pdf => "pdf",
            TargetFormat::Png => "png",
        }
    }
}

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Convert `source` into `out_dir`, returning the produced file
    async fn convert(
        &self,
        source: &Path,
        format: TargetFormat,
        out_dir: &Path,
        profile: Option<&Path>,
    ) -> Result<PathBuf>;
}

pub struct LibreOffice {
    executable: PathBuf,
    timeout: Duration,
}

impl LibreOffice {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            timeout: RENDERER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the renderer's help command and return its first output line
    pub async fn probe_version(&self) -> Result<String> {
        let lines =
            process::run_to_lines(&self.executable, &[OsString::from(ARG_HELP)], self.timeout)
                .await?;

        let version = lines
            .into_iter()
            .map(|l| l.trim().to_string())
            .find(|l| !l.is_empty())
            .unwrap_or_default();

        info!(executable = %self.executable.display(), version = %version, "Renderer found");
        Ok(version)
    }
}

#[async_trait]
impl Renderer for LibreOffice {
    async fn convert(
        &self,
        source: &Path,
        format: TargetFormat,
        out_dir: &Path,
        profile: Option<&Path>,
    ) -> Result<PathBuf> {
        let args = arguments(source, format, out_dir, profile);
        let lines = process::run_to_lines(&self.executable, &args, self.timeout).await?;
        let summary = parse_summary(&lines)?;
        Ok(summary.destination)
    }
}

/// Command line for one conversion
pub fn arguments(
    source: &Path,
    format: TargetFormat,
    out_dir: &Path,
    profile: Option<&Path>,
) -> Vec<OsString> {
    let mut args = Vec::with_capacity(7);

    if let Some(profile) = profile {
        args.push(user_installation_argument(profile));
    }

    args.push(ARG_CONVERT_TO.into());
    args.push(format.as_str().into());
    args.push(source.as_os_str().to_os_string());
    args.push(ARG_OUTPUT_FOLDER.into());
    args.push(out_dir.as_os_str().to_os_string());
    args.push(ARG_HEADLESS.into());

    args
}

pub fn user_installation_argument(profile: &Path) -> OsString {
    format!("-env:UserInstallation=file://{}", profile.display()).into()
}
