use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, error, info};

/// How much captured stderr is kept on a failure, from the end of the stream
/// (the interesting part for most tools).
const STDERR_TAIL_BYTES: usize = 2048;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("command `{command}` timed out after {timeout_secs}s and was killed")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("command `{command}` exited with code {code}: {stderr}")]
    NonZeroExit {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("failed to run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run an external command to completion, draining stdout and stderr
/// concurrently so a full OS pipe buffer can never stall the child, and
/// killing it forcefully once `timeout` elapses.
pub async fn run<S: AsRef<OsStr>>(
    program: &str,
    args: &[S],
    work_dir: Option<&Path>,
    timeout: Duration,
) -> Result<(), ProcessError> {
    let cmd_str = display_command(program, args);

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = work_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| ProcessError::Io {
        command: cmd_str.clone(),
        source: e,
    })?;

    // Both pipes must be consumed while the child runs.
    let stdout_task = tokio::spawn(drain(child.stdout.take()));
    let stderr_task = tokio::spawn(drain(child.stderr.take()));

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            return Err(ProcessError::Io {
                command: cmd_str,
                source: e,
            });
        }
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            stdout_task.abort();
            stderr_task.abort();
            error!(command = %cmd_str, "command timed out, killed");
            return Err(ProcessError::Timeout {
                command: cmd_str,
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    let code = status.code().unwrap_or(-1);
    if status.success() {
        info!(command = %cmd_str, code, "command finished");
        debug!(%stdout, %stderr, "command output");
        Ok(())
    } else {
        Err(ProcessError::NonZeroExit {
            command: cmd_str,
            code,
            stderr: tail(&stderr),
        })
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

fn display_command<S: AsRef<OsStr>>(program: &str, args: &[S]) -> String {
    let mut out = String::from(program);
    for arg in args {
        out.push(' ');
        out.push_str(&arg.as_ref().to_string_lossy());
    }
    out
}

fn tail(s: &str) -> String {
    if s.len() <= STDERR_TAIL_BYTES {
        return s.trim_end().to_string();
    }
    let mut start = s.len() - STDERR_TAIL_BYTES;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_exit_is_ok() {
        run("sh", &["-c", "exit 0"], None, Duration::from_secs(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn nonzero_exit_carries_code_and_stderr() {
        let err = run(
            "sh",
            &["-c", "echo boom >&2; exit 3"],
            None,
            Duration::from_secs(10),
        )
        .await
        .unwrap_err();
        match err {
            ProcessError::NonZeroExit { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert!(stderr.contains("boom"));
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_command_is_killed_on_timeout() {
        let err = run("sh", &["-c", "sleep 30"], None, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));
    }

    #[tokio::test]
    async fn large_output_does_not_deadlock() {
        // Enough output to overflow an undrained pipe buffer.
        run(
            "sh",
            &["-c", "head -c 1000000 /dev/zero | tr '\\0' 'x'"],
            None,
            Duration::from_secs(30),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn missing_binary_is_io_error() {
        let err = run(
            "definitely-not-a-real-binary",
            &["--version"],
            None,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProcessError::Io { .. }));
    }
}
