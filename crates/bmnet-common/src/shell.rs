//! Shell command execution for local dataplane plumbing.
//!
//! Every device name that reaches a command line is derived from controller
//! identifiers or operator metadata, so arguments go through [`shellquote`]
//! before being formatted into a command.
//!
//! # Example
//!
//! ```ignore
//! use bmnet_common::shell::{self, IP_CMD, shellquote};
//!
//! let cmd = format!("{} link set {} up", IP_CMD, shellquote("irbr-3f1c2a9e"));
//! shell::exec_or_throw(&cmd).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{NetError, NetResult};

/// Path to the `ip` command for link management.
pub const IP_CMD: &str = "/sbin/ip";

/// Path to the `brctl` command for Linux bridge control.
pub const BRCTL_CMD: &str = "/sbin/brctl";

/// Path to the `ovs-vsctl` command for Open vSwitch configuration.
pub const OVS_VSCTL_CMD: &str = "/usr/bin/ovs-vsctl";

/// Regex for characters that need escaping in shell double-quotes.
/// Matches: $, `, ", \, and newline
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// The string is wrapped in double quotes and `$`, `` ` ``, `"`, `\` and
/// newline are backslash-escaped.
///
/// # Example
///
/// ```
/// use bmnet_common::shell::shellquote;
///
/// assert_eq!(shellquote("irbr-3f1c2a9e"), "\"irbr-3f1c2a9e\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a shell command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// The stdout output.
    pub stdout: String,
    /// The stderr output.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Executes a command through `/bin/sh -c`.
///
/// Returns `Err` only when the command could not be spawned; a non-zero exit
/// is reported through [`ExecResult::exit_code`].
pub async fn exec(cmd: &str) -> NetResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| NetError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let exit_code = output.status.code().unwrap_or(-1);
    let result = ExecResult {
        exit_code,
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if result.success() {
        tracing::trace!(command = %cmd, "Command succeeded");
    } else {
        tracing::debug!(
            command = %cmd,
            exit_code = exit_code,
            stderr = %result.stderr,
            "Command exited non-zero"
        );
    }

    Ok(result)
}

/// Executes a command and fails on any non-zero exit.
pub async fn exec_or_throw(cmd: &str) -> NetResult<String> {
    exec_accepting(cmd, &[0]).await
}

/// Executes a command, treating every exit code in `accepted` as success.
///
/// `ip link delete` exits 2 or 254 when the device is already gone; teardown
/// passes those codes so an absent device is not an error.
pub async fn exec_accepting(cmd: &str, accepted: &[i32]) -> NetResult<String> {
    let result = exec(cmd).await?;
    if accepted.contains(&result.exit_code) {
        Ok(result.stdout)
    } else {
        Err(NetError::ShellCommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shellquote_simple() {
        assert_eq!(shellquote("eth0"), "\"eth0\"");
        assert_eq!(shellquote("eth0.100"), "\"eth0.100\"");
    }

    #[test]
    fn test_shellquote_special_chars() {
        assert_eq!(shellquote("$HOME"), "\"\\$HOME\"");
        assert_eq!(shellquote("`whoami`"), "\"\\`whoami\\`\"");
        assert_eq!(shellquote("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(shellquote("path\\to"), "\"path\\\\to\"");
    }

    #[test]
    fn test_shellquote_empty() {
        assert_eq!(shellquote(""), "\"\"");
    }

    #[test]
    fn test_exec_result_combined() {
        let result = ExecResult {
            exit_code: 0,
            stdout: "stdout".to_string(),
            stderr: "stderr".to_string(),
        };
        assert!(result.success());
        assert_eq!(result.combined_output(), "stdout\nstderr");

        let failed = ExecResult {
            exit_code: 2,
            stdout: String::new(),
            stderr: "Cannot find device".to_string(),
        };
        assert!(!failed.success());
        assert_eq!(failed.combined_output(), "Cannot find device");
    }

    #[tokio::test]
    async fn test_exec_echo() {
        let result = exec("echo hello").await.unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "hello");
    }

    #[tokio::test]
    async fn test_exec_or_throw_failure() {
        match exec_or_throw("exit 1").await {
            Err(NetError::ShellCommandFailed { exit_code, .. }) => assert_eq!(exit_code, 1),
            other => panic!("Expected ShellCommandFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exec_accepting_absent_device_codes() {
        assert!(exec_accepting("exit 2", &[0, 2, 254]).await.is_ok());
        assert!(exec_accepting("exit 254", &[0, 2, 254]).await.is_ok());
        assert!(exec_accepting("exit 1", &[0, 2, 254]).await.is_err());
    }
}
