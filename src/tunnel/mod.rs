//! Supervision of one SSH child process and its forwardings.
//!
//! A [`Tunnel`] owns a single long-lived SSH client that multiplexes
//! several local forwardings over one session to the hop, plus the
//! redirect rules that steer traffic into them. Process creation and
//! rule installation succeed or fail as a unit: if any rule fails to
//! install, already-installed rules are removed in reverse order, the
//! child is terminated and reaped, and the tunnel closes.
//!
//! A tunnel moves through `New → Active → Closed` exactly once and is
//! never reused.

mod command;

use std::path::PathBuf;
use std::process::Child;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::addr::Forwarding;
use crate::redirect::{RedirectError, RuleDriver};
use command::SshCommandBuilder;

/// Lifecycle state of a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// Constructed, child not yet spawned.
    New,
    /// Child running, rules installed.
    Active,
    /// Child gone, rules removed. Terminal.
    Closed,
}

/// Errors from connecting a tunnel.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// `connect` was called outside the `New` state.
    #[error("tunnel to {hop} cannot connect while {state:?}")]
    AlreadyConnected {
        /// The tunnel's hop alias.
        hop: String,
        /// The state the tunnel was in.
        state: TunnelState,
    },

    /// The SSH client process could not be spawned.
    #[error("failed to spawn {binary}: {source}")]
    SpawnFailed {
        /// The SSH binary that failed to start.
        binary: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A redirect rule failed to install; the tunnel rolled back.
    #[error("redirect rule installation failed for {forwarding}: {source}")]
    RuleInstallFailed {
        /// The forwarding whose rule failed.
        forwarding: Forwarding,
        /// The rule tool failure.
        #[source]
        source: RedirectError,
    },
}

/// One SSH child process carrying N forwardings, with their rules.
#[derive(Debug)]
pub struct Tunnel {
    hop: String,
    forwardings: Vec<Forwarding>,
    state: TunnelState,
    child: Option<Child>,
    pid: Option<u32>,
    driver: RuleDriver,
    ssh_binary: PathBuf,
    keepalive_secs: u32,
}

impl Tunnel {
    pub(crate) fn new(
        hop: String,
        forwardings: Vec<Forwarding>,
        driver: RuleDriver,
        ssh_binary: PathBuf,
        keepalive_secs: u32,
    ) -> Self {
        Self {
            hop,
            forwardings,
            state: TunnelState::New,
            child: None,
            pid: None,
            driver,
            ssh_binary,
            keepalive_secs,
        }
    }

    /// The hop alias this tunnel connects through, verbatim.
    pub fn hop(&self) -> &str {
        &self.hop
    }

    /// The SSH child's process id while the tunnel is active.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The forwardings carried by this tunnel, in creation order.
    pub fn forwardings(&self) -> &[Forwarding] {
        &self.forwardings
    }

    /// The tunnel's lifecycle state.
    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Spawn the SSH child and install one rule per forwarding.
    ///
    /// On any rule failure the already-installed rules are removed in
    /// reverse order, the child is terminated and reaped, and the tunnel
    /// transitions to `Closed`. A spawn failure leaves the tunnel `New`.
    pub(crate) fn connect(&mut self) -> Result<u32, TunnelError> {
        if self.state != TunnelState::New {
            return Err(TunnelError::AlreadyConnected {
                hop: self.hop.clone(),
                state: self.state,
            });
        }

        let mut builder = SshCommandBuilder::new(&self.ssh_binary)
            .no_remote_command()
            .no_tty()
            .no_agent_forwarding()
            .keepalive(self.keepalive_secs);
        for forwarding in &self.forwardings {
            builder = builder.forward(forwarding);
        }
        let builder = builder.hop(&self.hop);
        debug!("SSH command: {}", builder.to_command_line());

        let binary = builder.binary().to_path_buf();
        let mut child = builder
            .build()
            .spawn()
            .map_err(|source| TunnelError::SpawnFailed { binary, source })?;
        let pid = child.id();
        info!("SSH child for hop {} started with PID {}", self.hop, pid);

        for (installed, forwarding) in self.forwardings.iter().enumerate() {
            if let Err(source) = self.driver.install(forwarding) {
                warn!("Rule installation failed for {}: {}", forwarding, source);
                for done in self.forwardings[..installed].iter().rev() {
                    if let Err(e) = self.driver.remove(done) {
                        warn!("Rollback removal failed for {}: {}", done, e);
                    }
                }
                terminate(&mut child);
                self.state = TunnelState::Closed;
                return Err(TunnelError::RuleInstallFailed {
                    forwarding: forwarding.clone(),
                    source,
                });
            }
        }

        self.child = Some(child);
        self.pid = Some(pid);
        self.state = TunnelState::Active;
        Ok(pid)
    }

    /// Terminate the child, reap it, and remove every rule.
    ///
    /// Idempotent: calling again after the tunnel closed is a no-op. A
    /// rule removal failure is logged and teardown continues.
    pub(crate) fn disconnect(&mut self) {
        if self.state != TunnelState::Active {
            return;
        }

        if let Some(mut child) = self.child.take() {
            terminate(&mut child);
        }
        for forwarding in &self.forwardings {
            if let Err(e) = self.driver.remove(forwarding) {
                warn!("Rule removal failed for {}: {}", forwarding, e);
            }
        }

        self.pid = None;
        self.state = TunnelState::Closed;
        info!("Tunnel to hop {} closed", self.hop);
    }

    /// Poll the child without blocking. Returns true if it has exited.
    ///
    /// The child handle is dropped once the exit is observed, so a later
    /// `disconnect` will not signal a recycled PID.
    pub(crate) fn try_reap(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("SSH child for hop {} exited: {}", self.hop, status);
                self.child = None;
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Failed to poll SSH child for hop {}: {}", self.hop, e);
                self.child = None;
                true
            }
        }
    }

    /// Record that the child was already reaped by an external wait.
    pub(crate) fn mark_reaped(&mut self) {
        self.child = None;
    }
}

/// SIGTERM the child if it is still running, then reap it.
fn terminate(child: &mut Child) {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!("SSH child {} already exited: {}", child.id(), status);
            return;
        }
        Ok(None) => {}
        Err(e) => {
            warn!("Failed to poll SSH child {}: {}", child.id(), e);
            return;
        }
    }

    if let Err(e) = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM) {
        warn!("Failed to signal SSH child {}: {}", child.id(), e);
    }
    match child.wait() {
        Ok(status) => debug!("SSH child {} exited: {}", child.id(), status),
        Err(e) => warn!("Failed to reap SSH child {}: {}", child.id(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::HostAddr;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn fake_ssh(dir: &Path) -> PathBuf {
        write_script(dir, "fake-ssh", "sleep 30")
    }

    fn recording_rule_tool(dir: &Path, log: &Path) -> PathBuf {
        write_script(
            dir,
            "fake-rules",
            &format!("echo \"$@\" >> {}", log.display()),
        )
    }

    fn forwarding(local_port: u16, target_host: &str, target_port: u16) -> Forwarding {
        Forwarding::new(
            HostAddr::new("127.0.0.1", local_port),
            HostAddr::new(target_host, target_port),
        )
    }

    fn rule_lines(log: &Path) -> Vec<String> {
        fs::read_to_string(log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_connect_activates_and_installs_rules() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("rules.log");
        let ssh = fake_ssh(dir.path());
        let tool = recording_rule_tool(dir.path(), &log);

        let mut tunnel = Tunnel::new(
            "hop".to_string(),
            vec![forwarding(40001, "one.example.net", 80)],
            RuleDriver::new(tool),
            ssh,
            300,
        );
        assert_eq!(tunnel.state(), TunnelState::New);
        assert_eq!(tunnel.pid(), None);

        let pid = tunnel.connect().unwrap();
        assert_eq!(tunnel.state(), TunnelState::Active);
        assert_eq!(tunnel.pid(), Some(pid));

        let lines = rule_lines(&log);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("-A"));
        assert!(lines[0].contains("one.example.net"));

        tunnel.disconnect();
    }

    #[test]
    fn test_connect_twice_is_rejected() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("rules.log");
        let ssh = fake_ssh(dir.path());
        let tool = recording_rule_tool(dir.path(), &log);

        let mut tunnel = Tunnel::new(
            "hop".to_string(),
            vec![forwarding(40001, "one.example.net", 80)],
            RuleDriver::new(tool),
            ssh,
            300,
        );
        tunnel.connect().unwrap();

        let err = tunnel.connect().unwrap_err();
        assert!(matches!(err, TunnelError::AlreadyConnected { .. }));

        tunnel.disconnect();
    }

    #[test]
    fn test_spawn_failure_stays_new() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("rules.log");
        let tool = recording_rule_tool(dir.path(), &log);

        let mut tunnel = Tunnel::new(
            "hop".to_string(),
            vec![forwarding(40001, "one.example.net", 80)],
            RuleDriver::new(tool),
            PathBuf::from("/nonexistent/ssh"),
            300,
        );

        let err = tunnel.connect().unwrap_err();
        assert!(matches!(err, TunnelError::SpawnFailed { .. }));
        assert_eq!(tunnel.state(), TunnelState::New);
        assert!(rule_lines(&log).is_empty());
    }

    #[test]
    fn test_install_failure_rolls_back_in_reverse() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("rules.log");
        let ssh = fake_ssh(dir.path());
        // Fail whenever the second target's port shows up.
        let tool = write_script(
            dir.path(),
            "failing-rules",
            &format!(
                "echo \"$@\" >> {}\ncase \"$*\" in *' 443 '*) exit 1;; esac",
                log.display()
            ),
        );

        let mut tunnel = Tunnel::new(
            "hop".to_string(),
            vec![
                forwarding(40001, "one.example.net", 80),
                forwarding(40002, "two.example.net", 443),
            ],
            RuleDriver::new(tool),
            ssh,
            300,
        );

        let err = tunnel.connect().unwrap_err();
        assert!(matches!(err, TunnelError::RuleInstallFailed { .. }));
        assert_eq!(tunnel.state(), TunnelState::Closed);
        assert_eq!(tunnel.pid(), None);

        // First rule added, second add failed, first rule removed again.
        let lines = rule_lines(&log);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("-A") && lines[0].contains("one.example.net"));
        assert!(lines[1].contains("-A") && lines[1].contains("two.example.net"));
        assert!(lines[2].contains("-D") && lines[2].contains("one.example.net"));
    }

    #[test]
    fn test_disconnect_removes_rules_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("rules.log");
        let ssh = fake_ssh(dir.path());
        let tool = recording_rule_tool(dir.path(), &log);

        let mut tunnel = Tunnel::new(
            "hop".to_string(),
            vec![
                forwarding(40001, "one.example.net", 80),
                forwarding(40002, "two.example.net", 443),
            ],
            RuleDriver::new(tool),
            ssh,
            300,
        );
        tunnel.connect().unwrap();

        tunnel.disconnect();
        assert_eq!(tunnel.state(), TunnelState::Closed);
        assert_eq!(tunnel.pid(), None);

        let after_first = rule_lines(&log);
        assert_eq!(after_first.len(), 4);
        assert!(after_first[2].contains("-D"));
        assert!(after_first[3].contains("-D"));

        // A second disconnect must not touch the rules again.
        tunnel.disconnect();
        assert_eq!(rule_lines(&log), after_first);
    }

    #[test]
    fn test_try_reap_observes_quick_exit() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("rules.log");
        let ssh = write_script(dir.path(), "fast-ssh", "exit 0");
        let tool = recording_rule_tool(dir.path(), &log);

        let mut tunnel = Tunnel::new(
            "hop".to_string(),
            vec![forwarding(40001, "one.example.net", 80)],
            RuleDriver::new(tool),
            ssh,
            300,
        );
        tunnel.connect().unwrap();

        // The child exits on its own; poll until the exit is observed.
        let mut reaped = false;
        for _ in 0..50 {
            if tunnel.try_reap() {
                reaped = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert!(reaped);

        // Teardown still removes the rules exactly once.
        tunnel.disconnect();
        let lines = rule_lines(&log);
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("-D"));
    }
}
