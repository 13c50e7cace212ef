//! Bounded execution of an external command.
//!
//! A command runs with a wall-clock timeout and a cap on how many bytes of
//! stdout and stderr are captured. The result is a tagged [`ExecStatus`]
//! rather than an error, so callers can turn every outcome into a payload.

use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Default captured-output cap per stream (10 MiB).
pub const DEFAULT_MAX_BUFFER: usize = 10 * 1024 * 1024;

/// Default timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// One command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
    /// Maximum bytes captured from each of stdout and stderr.
    pub max_buffer: usize,
}

impl ExecRequest {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }

    /// The command line as a single display string.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecStatus {
    Success,
    NonZeroExit { code: i32 },
    /// Terminated by a signal (Unix only).
    Signal { signal: i32 },
    /// Killed after exceeding the timeout.
    Timeout,
    /// Killed after one stream exceeded the buffer cap.
    BufferExceeded { stream: &'static str },
    /// The process could not be started or awaited.
    SpawnFailed { message: String },
}

/// Captured result of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub status: ExecStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ExecOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ExecStatus::Success
    }

    fn without_output(status: ExecStatus, elapsed: Duration) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: String::new(),
            elapsed,
        }
    }
}

/// Anything that can run an [`ExecRequest`].
///
/// The production implementation is [`ProcessRunner`]; tests substitute
/// fakes that record invocations.
pub trait CommandRunner {
    fn run(&self, request: &ExecRequest) -> impl Future<Output = ExecOutcome> + Send;
}

/// Runs requests as real child processes via `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(&self, request: &ExecRequest) -> ExecOutcome {
        let start = Instant::now();
        log::debug!(
            "Spawning command; command={}, timeout_ms={}",
            request.display(),
            request.timeout.as_millis()
        );

        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = request.cwd {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                log::warn!("Failed to spawn command; program={}, error={}", request.program, e);
                return ExecOutcome::without_output(
                    ExecStatus::SpawnFailed {
                        message: format!("failed to spawn '{}': {}", request.program, e),
                    },
                    start.elapsed(),
                );
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = request.max_buffer;

        // Owned outside the timed future: output read before a timeout or
        // overflow is still returned.
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();
        let collected = tokio::time::timeout(request.timeout, async {
            tokio::try_join!(
                read_bounded(stdout, limit, "stdout", &mut out_buf),
                read_bounded(stderr, limit, "stderr", &mut err_buf)
            )?;
            Ok::<_, BufferOverflow>(child.wait().await)
        })
        .await;

        let elapsed = start.elapsed();
        let status = match collected {
            Ok(Ok(Ok(status))) => classify(status),
            Ok(Ok(Err(e))) => ExecStatus::SpawnFailed {
                message: format!("failed to wait for '{}': {}", request.program, e),
            },
            Ok(Err(overflow)) => {
                let _ = child.kill().await;
                ExecStatus::BufferExceeded {
                    stream: overflow.stream,
                }
            }
            Err(_) => {
                let _ = child.kill().await;
                ExecStatus::Timeout
            }
        };
        let outcome = ExecOutcome {
            status,
            stdout: String::from_utf8_lossy(&out_buf).into_owned(),
            stderr: String::from_utf8_lossy(&err_buf).into_owned(),
            elapsed,
        };

        log::debug!(
            "Command finished; command={}, status={:?}, elapsed_ms={}",
            request.display(),
            outcome.status,
            outcome.elapsed.as_millis()
        );
        outcome
    }
}

#[derive(Debug)]
struct BufferOverflow {
    stream: &'static str,
}

/// Read a stream to its end into `buf`, failing once more than `limit`
/// bytes arrive. On overflow `buf` keeps the first `limit` bytes. Read
/// errors end the stream early.
async fn read_bounded<R: AsyncRead + Unpin>(
    reader: Option<R>,
    limit: usize,
    stream: &'static str,
    buf: &mut Vec<u8>,
) -> std::result::Result<(), BufferOverflow> {
    let Some(mut reader) = reader else {
        return Ok(());
    };

    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => return Ok(()),
            Ok(n) => {
                let room = limit.saturating_sub(buf.len());
                if n > room {
                    buf.extend_from_slice(&chunk[..room]);
                    return Err(BufferOverflow { stream });
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

fn classify(status: ExitStatus) -> ExecStatus {
    if status.success() {
        return ExecStatus::Success;
    }
    if let Some(code) = status.code() {
        return ExecStatus::NonZeroExit { code };
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExecStatus::Signal { signal };
        }
    }
    ExecStatus::NonZeroExit { code: -1 }
}

/// Conventional name of a Unix signal number.
pub fn signal_name(signal: i32) -> String {
    match signal {
        1 => "SIGHUP".to_string(),
        2 => "SIGINT".to_string(),
        3 => "SIGQUIT".to_string(),
        6 => "SIGABRT".to_string(),
        9 => "SIGKILL".to_string(),
        11 => "SIGSEGV".to_string(),
        13 => "SIGPIPE".to_string(),
        15 => "SIGTERM".to_string(),
        n => format!("SIG{}", n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> ExecRequest {
        ExecRequest::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[test]
    fn test_display() {
        let req = ExecRequest::new("supabase", vec!["db".into(), "push".into()]);
        assert_eq!(req.display(), "supabase db push");
    }

    #[test]
    fn test_signal_name() {
        assert_eq!(signal_name(15), "SIGTERM");
        assert_eq!(signal_name(64), "SIG64");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_captures_output() {
        let outcome = ProcessRunner.run(&sh("echo hello; echo oops >&2")).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.stdout.trim(), "hello");
        assert_eq!(outcome.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit() {
        let outcome = ProcessRunner.run(&sh("exit 3")).await;
        assert_eq!(outcome.status, ExecStatus::NonZeroExit { code: 3 });
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_signal() {
        let outcome = ProcessRunner.run(&sh("kill -TERM $$")).await;
        assert_eq!(outcome.status, ExecStatus::Signal { signal: 15 });
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_child() {
        let mut req = sh("sleep 5");
        req.timeout = Duration::from_millis(100);
        let outcome = ProcessRunner.run(&req).await;
        assert_eq!(outcome.status, ExecStatus::Timeout);
        assert!(outcome.elapsed < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let mut req = sh("echo connecting to db; echo auth failed >&2; sleep 5");
        req.timeout = Duration::from_millis(500);
        let outcome = ProcessRunner.run(&req).await;
        assert_eq!(outcome.status, ExecStatus::Timeout);
        assert_eq!(outcome.stdout, "connecting to db\n");
        assert_eq!(outcome.stderr, "auth failed\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_buffer_exceeded() {
        let mut req = sh("head -c 4096 /dev/zero");
        req.max_buffer = 100;
        let outcome = ProcessRunner.run(&req).await;
        assert_eq!(outcome.status, ExecStatus::BufferExceeded { stream: "stdout" });
        assert_eq!(outcome.stdout.len(), 100);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let req = ExecRequest::new("definitely-not-a-real-binary-xyz", vec![]);
        let outcome = ProcessRunner.run(&req).await;
        assert!(matches!(outcome.status, ExecStatus::SpawnFailed { .. }));
    }
}
