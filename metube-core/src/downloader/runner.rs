use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::command::CommandSpec;
use super::error::{DownloadError, DownloadResult};

/// Default bound on how much of the error stream is kept for diagnostics.
pub const DEFAULT_STDERR_LIMIT: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRun {
    pub output_path: PathBuf,
    pub size_bytes: u64,
    pub stderr: String,
}

/// Runs a [`CommandSpec`] to completion and checks that it produced its file.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
    stderr_limit: usize,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            stderr_limit: DEFAULT_STDERR_LIMIT,
        }
    }

    pub fn with_stderr_limit(mut self, limit: usize) -> Self {
        self.stderr_limit = limit.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn run(&self, spec: &CommandSpec) -> DownloadResult<CompletedRun> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(|source| DownloadError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        // Both pipes are drained on their own tasks; a full pipe would
        // otherwise stall the child.
        let label = spec
            .program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| spec.program.display().to_string());
        let stdout_task = tokio::spawn(drain_lines(child.stdout.take(), label));
        let stderr_task = tokio::spawn(capture_tail(child.stderr.take(), self.stderr_limit));

        let status = match timeout(self.timeout, child.wait()).await {
            Ok(status) => status.map_err(|source| DownloadError::Io {
                path: spec.program.clone(),
                source,
            })?,
            Err(_) => {
                if let Err(err) = child.kill().await {
                    warn!(error = %err, "failed to kill timed out downloader");
                }
                stdout_task.abort();
                stderr_task.abort();
                return Err(DownloadError::Timeout {
                    after: self.timeout,
                });
            }
        };

        let lines = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        debug!(status = ?status.code(), stdout_lines = lines, "downloader exited");

        if !status.success() {
            return Err(DownloadError::ExternalToolFailure {
                status: status.code(),
                stderr,
            });
        }

        match tokio::fs::metadata(&spec.output_path).await {
            Ok(metadata) if metadata.is_file() && metadata.len() > 0 => Ok(CompletedRun {
                output_path: spec.output_path.clone(),
                size_bytes: metadata.len(),
                stderr,
            }),
            _ => Err(DownloadError::FileNotProduced {
                path: spec.output_path.clone(),
            }),
        }
    }
}

async fn drain_lines<R>(reader: Option<R>, label: String) -> usize
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return 0;
    };
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    let mut count = 0;
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                count += 1;
                let text = String::from_utf8_lossy(&line);
                debug!(program = %label, "{}", text.trim_end());
            }
            Err(err) => {
                debug!(program = %label, error = %err, "stdout closed");
                break;
            }
        }
    }
    count
}

async fn capture_tail<R>(reader: Option<R>, limit: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut captured = Vec::new();
    let mut buffer = [0u8; 8192];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(read) => {
                captured.extend_from_slice(&buffer[..read]);
                if captured.len() > limit * 2 {
                    let excess = captured.len() - limit;
                    captured.drain(..excess);
                }
            }
            Err(_) => break,
        }
    }
    if captured.len() > limit {
        let excess = captured.len() - limit;
        captured.drain(..excess);
    }
    String::from_utf8_lossy(&captured).trim().to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shell(script: &str, output_path: PathBuf) -> CommandSpec {
        CommandSpec {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            output_path,
        }
    }

    #[tokio::test]
    async fn succeeds_when_file_is_written() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.mp4");
        let script = format!("echo downloading; printf 'media' > '{}'", output.display());
        let run = ProcessRunner::new(Duration::from_secs(10))
            .run(&shell(&script, output.clone()))
            .await
            .unwrap();
        assert_eq!(run.output_path, output);
        assert_eq!(run.size_bytes, 5);
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.mp4");
        let err = ProcessRunner::new(Duration::from_secs(10))
            .run(&shell("echo 'ERROR: video unavailable' >&2; exit 3", output))
            .await
            .unwrap_err();
        match err {
            DownloadError::ExternalToolFailure { status, stderr } => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr, "ERROR: video unavailable");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_exit_without_file_is_file_not_produced() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.mp4");
        let err = ProcessRunner::new(Duration::from_secs(10))
            .run(&shell("exit 0", output.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::FileNotProduced { path } if path == output));
    }

    #[tokio::test]
    async fn empty_output_counts_as_not_produced() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.mp4");
        let script = format!(": > '{}'", output.display());
        let err = ProcessRunner::new(Duration::from_secs(10))
            .run(&shell(&script, output))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::FileNotProduced { .. }));
    }

    #[tokio::test]
    async fn heavy_output_on_both_streams_does_not_stall() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.mp4");
        let script = format!(
            "i=0; while [ $i -lt 4000 ]; do echo \"progress line $i\"; echo \"warning line $i\" >&2; i=$((i+1)); done; printf 'x' > '{}'",
            output.display()
        );
        let run = ProcessRunner::new(Duration::from_secs(30))
            .with_stderr_limit(1024)
            .run(&shell(&script, output))
            .await
            .unwrap();
        assert!(run.stderr.len() <= 1024);
        assert!(run.stderr.ends_with("warning line 3999"));
    }

    #[tokio::test]
    async fn slow_process_times_out() {
        let dir = TempDir::new().unwrap();
        let spec = CommandSpec {
            program: PathBuf::from("sleep"),
            args: vec!["5".to_string()],
            output_path: dir.path().join("out.mp4"),
        };
        let err = ProcessRunner::new(Duration::from_millis(100))
            .run(&spec)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Timeout { .. }));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let spec = CommandSpec {
            program: dir.path().join("no-such-downloader"),
            args: Vec::new(),
            output_path: dir.path().join("out.mp4"),
        };
        let err = ProcessRunner::new(Duration::from_secs(1))
            .run(&spec)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Spawn { .. }));
    }
}
