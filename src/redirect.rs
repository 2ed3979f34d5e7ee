//! Kernel redirect rules for transparent interception.
//!
//! For each forwarding we install one NAT rule: outbound TCP whose
//! destination is `target.host:target.port` is redirected to the
//! forwarding's local port on the loopback interface, where the SSH
//! client is listening. Installation and removal shell out to the
//! privileged rule tool (`iptables` unless overridden), in the form
//!
//! ```text
//! iptables -t nat -A OUTPUT -p tcp -d <target-host> --dport <target-port> \
//!          -j REDIRECT --to-ports <local-port>
//! ```
//!
//! Removal replays the identical five-tuple with `-D`, so exactly one
//! rule instance is deleted even when several tunnels redirect the same
//! target concurrently.
//!
//! # Requirements
//!
//! - `CAP_NET_ADMIN` capability or root access
//! - the rule tool available in PATH (or an absolute path in settings)

use std::path::PathBuf;
use std::process::Command;

use thiserror::Error;
use tracing::debug;

use crate::addr::Forwarding;

/// Errors from running the rule tool.
#[derive(Debug, Error)]
pub enum RedirectError {
    /// The rule tool could not be started.
    #[error("failed to run {cmd}: {source}")]
    CommandFailed {
        /// The command line that failed to start.
        cmd: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The rule tool ran and reported failure.
    #[error("{cmd} exited with code {code}: {stderr}")]
    CommandError {
        /// The command line that failed.
        cmd: String,
        /// The tool's exit code (-1 if killed by a signal).
        code: i32,
        /// Captured standard error.
        stderr: String,
    },
}

/// Installs and removes redirect rules through the external rule tool.
#[derive(Debug, Clone)]
pub struct RuleDriver {
    tool: PathBuf,
}

impl RuleDriver {
    /// Create a driver that invokes the given tool binary.
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }

    /// Install the redirect rule for one forwarding.
    pub fn install(&self, forwarding: &Forwarding) -> Result<(), RedirectError> {
        self.run("-A", forwarding)
    }

    /// Remove the redirect rule for one forwarding.
    pub fn remove(&self, forwarding: &Forwarding) -> Result<(), RedirectError> {
        self.run("-D", forwarding)
    }

    fn run(&self, action: &str, forwarding: &Forwarding) -> Result<(), RedirectError> {
        let target_port = forwarding.target.port().to_string();
        let local_port = forwarding.local.port().to_string();
        let args = [
            "-t",
            "nat",
            action,
            "OUTPUT",
            "-p",
            "tcp",
            "-d",
            forwarding.target.host(),
            "--dport",
            &target_port,
            "-j",
            "REDIRECT",
            "--to-ports",
            &local_port,
        ];

        let cmd_str = format!("{} {}", self.tool.display(), args.join(" "));
        debug!("Running: {}", cmd_str);

        let output = Command::new(&self.tool).args(args).output().map_err(|e| {
            RedirectError::CommandFailed {
                cmd: cmd_str.clone(),
                source: e,
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(RedirectError::CommandError {
                cmd: cmd_str,
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::HostAddr;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn forwarding() -> Forwarding {
        Forwarding::new(
            HostAddr::new("127.0.0.1", 40001),
            HostAddr::new("irc.example.net", 6667),
        )
    }

    /// Write a fake rule tool that records its arguments.
    fn fake_tool(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("fake-rule-tool");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_install_argument_shape() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("calls.log");
        let tool = fake_tool(&dir, &format!("echo \"$@\" >> {}", log.display()));

        let driver = RuleDriver::new(&tool);
        driver.install(&forwarding()).unwrap();

        let recorded = fs::read_to_string(&log).unwrap();
        assert_eq!(
            recorded.trim(),
            "-t nat -A OUTPUT -p tcp -d irc.example.net --dport 6667 -j REDIRECT --to-ports 40001"
        );
    }

    #[test]
    fn test_remove_replays_same_tuple() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("calls.log");
        let tool = fake_tool(&dir, &format!("echo \"$@\" >> {}", log.display()));

        let driver = RuleDriver::new(&tool);
        driver.install(&forwarding()).unwrap();
        driver.remove(&forwarding()).unwrap();

        let recorded = fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = recorded.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].replace("-A", "-D"), lines[1]);
    }

    #[test]
    fn test_nonzero_exit_is_reported() {
        let dir = TempDir::new().unwrap();
        let tool = fake_tool(&dir, "echo 'permission denied' >&2; exit 4");

        let driver = RuleDriver::new(&tool);
        let err = driver.install(&forwarding()).unwrap_err();
        match err {
            RedirectError::CommandError { code, stderr, .. } => {
                assert_eq!(code, 4);
                assert!(stderr.contains("permission denied"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_tool_is_reported() {
        let driver = RuleDriver::new("/nonexistent/rule-tool");
        let err = driver.install(&forwarding()).unwrap_err();
        assert!(matches!(err, RedirectError::CommandFailed { .. }));
    }
}
