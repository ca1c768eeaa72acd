//! External command execution with streamed output and a timeout

use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Lines of stderr kept for error messages
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// Kill the process if it runs longer than this
    pub timeout: Duration,
    /// Time to wait for output readers after the process exits
    pub stream_flush_timeout: Duration,
}

impl CommandConfig {
    /// Image builds and pushes
    pub fn for_build(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            stream_flush_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout_secs(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            stream_flush_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn `{cmd}`: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running `{cmd}`: {source}")]
    Io {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{cmd}` timed out after {}s", .timeout.as_secs())]
    TimedOut { cmd: String, timeout: Duration },

    #[error("`{cmd}` exited with {}: {stderr}", exit_label(.code))]
    Failed {
        cmd: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

impl CommandError {
    pub fn command(&self) -> &str {
        match self {
            CommandError::Spawn { cmd, .. }
            | CommandError::Io { cmd, .. }
            | CommandError::TimedOut { cmd, .. }
            | CommandError::Failed { cmd, .. } => cmd,
        }
    }
}

/// Run `cmd` to completion, logging its output line by line.
///
/// `stdin`, if given, is written to the process and then closed; secrets go
/// there rather than on the command line. Returns captured stdout.
pub async fn run_command(
    cmd: &str,
    args: &[&str],
    stdin: Option<&str>,
    config: &CommandConfig,
) -> Result<String, CommandError> {
    let label = match args.first() {
        Some(sub) => format!("{cmd} {sub}"),
        None => cmd.to_string(),
    };
    info!(
        cmd = %label,
        args = ?args,
        timeout_secs = config.timeout.as_secs(),
        "Running command"
    );

    let mut child = Command::new(cmd)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| CommandError::Spawn {
            cmd: label.clone(),
            source,
        })?;

    let stdout_handle = child.stdout.take().map(|stdout| {
        let label = label.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut captured = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(cmd = %label, "{line}");
                captured.push_str(&line);
                captured.push('\n');
            }
            captured
        })
    });

    let stderr_handle = child.stderr.take().map(|stderr| {
        let label = label.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail: Vec<String> = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(cmd = %label, stream = "stderr", "{line}");
                if tail.len() == STDERR_TAIL_LINES {
                    tail.remove(0);
                }
                tail.push(line);
            }
            tail.join("\n")
        })
    });

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes())
            .await
            .map_err(|source| CommandError::Io {
                cmd: label.clone(),
                source,
            })?;
        // dropping the pipe closes stdin
    }

    let status = match tokio::time::timeout(config.timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(source)) => return Err(CommandError::Io { cmd: label, source }),
        Err(_) => {
            warn!(
                cmd = %label,
                timeout_secs = config.timeout.as_secs(),
                "Command timed out, killing process"
            );
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill timed-out process");
            }
            return Err(CommandError::TimedOut {
                cmd: label,
                timeout: config.timeout,
            });
        }
    };

    let stdout = match stdout_handle {
        Some(handle) => tokio::time::timeout(config.stream_flush_timeout, handle)
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default(),
        None => String::new(),
    };
    let stderr = match stderr_handle {
        Some(handle) => tokio::time::timeout(config.stream_flush_timeout, handle)
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default(),
        None => String::new(),
    };

    if !status.success() {
        return Err(CommandError::Failed {
            cmd: label,
            code: status.code(),
            stderr,
        });
    }

    debug!(cmd = %label, "Command finished");
    Ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick() -> CommandConfig {
        CommandConfig::with_timeout_secs(10)
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let out = run_command("echo", &["hello"], None, &quick()).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_stdin_is_passed_through() {
        let out = run_command("cat", &[], Some("secret-token"), &quick())
            .await
            .unwrap();
        assert_eq!(out.trim(), "secret-token");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failed() {
        let err = run_command("sh", &["-c", "echo broken >&2; exit 3"], None, &quick())
            .await
            .unwrap_err();
        match err {
            CommandError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_spawn() {
        let err = run_command("nonexistent_command_12345", &[], None, &quick())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
        assert_eq!(err.command(), "nonexistent_command_12345");
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let config = CommandConfig {
            timeout: Duration::from_millis(100),
            stream_flush_timeout: Duration::from_millis(100),
        };
        let err = run_command("sleep", &["10"], None, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
    }
}
