use crate::error::{AppError, Result};
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Run `program` to completion and return its stdout and stderr lines.
///
/// All stdout lines come first, followed by all stderr lines.
///
/// The child is killed when `timeout` elapses. A non-zero exit status is
/// reported as `AppError::RendererFailed` after logging the output.
pub async fn run_to_lines(
    program: &Path,
    args: &[OsString],
    timeout: Duration,
) -> Result<Vec<String>> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let pid = child.id();
    debug!(pid, program = %program.display(), "Process has been created");

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            warn!(pid, timeout_secs = timeout.as_secs(), "Process timed out and was killed");
            return Err(AppError::RendererTimeout(timeout));
        }
    };

    let lines = merge_lines(&output.stdout, &output.stderr);

    if !output.status.success() {
        warn!(pid, status = %output.status, output = ?lines, "Process failed");
        return Err(AppError::RendererFailed {
            status: output.status.to_string(),
        });
    }

    debug!(pid, output = ?lines, "Process has finished");
    Ok(lines)
}

fn merge_lines(stdout: &[u8], stderr: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .chain(String::from_utf8_lossy(stderr).lines())
        .map(str::to_string)
        .collect()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<OsString> {
        vec!["-c".into(), script.into()]
    }

    #[tokio::test]
    async fn test_collects_stdout_and_stderr() {
        let lines = run_to_lines(
            Path::new("/bin/sh"),
            &sh("echo first; echo second 1>&2"),
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        assert_eq!(lines, vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let err = run_to_lines(Path::new("/bin/sh"), &sh("exit 3"), Duration::from_secs(10))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::RendererFailed { .. }));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let started = std::time::Instant::now();
        let err = run_to_lines(Path::new("/bin/sh"), &sh("sleep 30"), Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::RendererTimeout(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let err = run_to_lines(
            Path::new("/nonexistent/soffice"),
            &[],
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Io(_)));
    }
}
