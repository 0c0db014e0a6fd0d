//! Secure-shell transport to the remote container engine.
//!
//! Every engine operation is a `docker ...` command line executed on the
//! remote host over SSH. The trait seam exists so the manager can be
//! driven by mock transports in tests.
//!
//! Exit-code conventions: ssh itself exits 255 on connection/auth failure;
//! any other exit code is the remote command's own. Non-zero engine exits
//! whose stderr contains only WARNING lines are treated as success.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::SandboxConfig;
use crate::error::TransportError;

/// Default timeout for engine commands.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for container creation.
pub const CREATE_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for snapshot commits.
pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(120);
/// Timeout for install-style commands (npm install and friends).
pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(120);
/// Timeout for explicitly long-running commands.
pub const LONG_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// Raw result of a remote command.
#[derive(Debug, Clone)]
pub struct RemoteOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// A channel capable of running commands on the sandbox host.
#[async_trait]
pub trait SandboxTransport: Send + Sync {
    /// Run `command` remotely. Returns the remote exit code and output;
    /// errors only for transport-level failures (ssh, timeout, permission).
    async fn run(&self, command: &str, timeout: Duration) -> Result<RemoteOutput, TransportError>;
}

/// Production transport: `ssh -i <key> <user>@<host> <command>`.
pub struct SshTransport {
    host: String,
    user: String,
    key_path: PathBuf,
}

impl SshTransport {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            host: config.vps_host.clone(),
            user: config.vps_user.clone(),
            key_path: config.vps_ssh_key.clone(),
        }
    }
}

#[async_trait]
impl SandboxTransport for SshTransport {
    async fn run(&self, command: &str, timeout: Duration) -> Result<RemoteOutput, TransportError> {
        let mut cmd = Command::new("ssh");
        cmd.arg("-i")
            .arg(&self.key_path)
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg("ConnectTimeout=10")
            .arg(format!("{}@{}", self.user, self.host))
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| TransportError::Timeout {
                command: command.to_string(),
                timeout_secs: timeout.as_secs(),
            })?
            .map_err(|e| TransportError::SshFailed {
                detail: format!("failed to spawn ssh: {}", e),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);

        // 255 is ssh's own failure code; everything else belongs to the
        // remote command.
        if exit_code == 255 {
            if stderr.to_lowercase().contains("permission denied") {
                return Err(TransportError::PermissionDenied { detail: stderr });
            }
            return Err(TransportError::SshFailed { detail: stderr });
        }

        Ok(RemoteOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

/// Interpret an engine command's output, tolerating warning-only stderr.
///
/// Returns trimmed stdout on success; categorizes failures.
pub fn engine_result(command: &str, output: RemoteOutput) -> Result<String, TransportError> {
    if output.exit_code == 0 || warnings_only(&output.stderr) {
        return Ok(output.stdout.trim().to_string());
    }
    if output.stderr.to_lowercase().contains("permission denied") {
        return Err(TransportError::PermissionDenied {
            detail: output.stderr.trim().to_string(),
        });
    }
    let detail = if output.stderr.trim().is_empty() {
        output.stdout.trim().to_string()
    } else {
        output.stderr.trim().to_string()
    };
    Err(TransportError::EngineFailed {
        command: command.to_string(),
        exit_code: output.exit_code,
        detail,
    })
}

/// `true` when every non-empty stderr line is a warning.
fn warnings_only(stderr: &str) -> bool {
    let mut saw_any = false;
    for line in stderr.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        saw_any = true;
        if !line.to_uppercase().starts_with("WARNING") {
            return false;
        }
    }
    saw_any
}

/// Single-quote a string for a remote POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(exit_code: i32, stdout: &str, stderr: &str) -> RemoteOutput {
        RemoteOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn zero_exit_is_success() {
        let result = engine_result("docker ps", output(0, "abc\n", "")).unwrap();
        assert_eq!(result, "abc");
    }

    #[test]
    fn warning_only_stderr_is_ignored() {
        let result = engine_result(
            "docker run",
            output(1, "cid123\n", "WARNING: No swap limit support\n"),
        )
        .unwrap();
        assert_eq!(result, "cid123");
    }

    #[test]
    fn real_errors_are_engine_failures() {
        let err = engine_result(
            "docker run",
            output(125, "", "docker: Error response from daemon: conflict\n"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            TransportError::EngineFailed { exit_code: 125, .. }
        ));
    }

    #[test]
    fn permission_denied_is_categorized() {
        let err = engine_result(
            "docker ps",
            output(
                1,
                "",
                "Got permission denied while trying to connect to the Docker daemon socket",
            ),
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::PermissionDenied { .. }));
    }

    #[test]
    fn mixed_warning_and_error_is_failure() {
        let err = engine_result(
            "docker rm",
            output(1, "", "WARNING: something\nError: no such container\n"),
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::EngineFailed { .. }));
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
