//! Bounded external command execution shared by the shipped drivers.

use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

use crate::error::DriverError;

/// Run `program args...` to completion, failing if it exceeds `timeout` or
/// exits non-zero. The child is killed when the timeout fires.
pub async fn run_bounded(
    program: &str,
    args: &[String],
    operation: &str,
    timeout: Duration,
) -> Result<Output, DriverError> {
    let cmd_line = format!("{} {}", program, args.join(" "));
    log::debug!("[{}] exec: {}", operation, cmd_line);

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DriverError::Command {
            cmd: cmd_line.clone(),
            reason: format!("failed to spawn: {}", e),
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| DriverError::Command {
            cmd: cmd_line.clone(),
            reason: format!("failed to wait: {}", e),
        })?,
        Err(_) => {
            log::error!("[{}] '{}' exceeded {:?}", operation, cmd_line, timeout);
            return Err(DriverError::Timeout {
                operation: operation.to_string(),
                secs: timeout.as_secs(),
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let reason = match output.status.code() {
            Some(code) => format!("exit code {}: {}", code, stderr),
            None => format!("terminated by signal: {}", stderr),
        };
        return Err(DriverError::Command {
            cmd: cmd_line,
            reason,
        });
    }

    Ok(output)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_captures_stdout() {
        let out = run_bounded("echo", &["hello".to_string()], "echo", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_error() {
        let err = run_bounded("false", &[], "false", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Command { .. }));
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = run_bounded("sleep", &["5".to_string()], "sleep", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Timeout { ref operation, .. } if operation == "sleep"));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = run_bounded("plantscan-no-such-binary", &[], "detect", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
