//! Builder for SSH client command lines.

use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow};

use crate::addr::Forwarding;

/// Builder for the SSH client invocation carrying a tunnel's forwardings.
///
/// The hop alias is stored separately and always emitted as the final
/// positional argument, after every flag.
pub(crate) struct SshCommandBuilder {
    binary: PathBuf,
    args: Vec<OsString>,
    hop: Option<String>,
}

impl SshCommandBuilder {
    /// Create a builder for the given SSH client binary.
    pub(crate) fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            hop: None,
        }
    }

    fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add one `-L` local forwarding.
    pub(crate) fn forward(self, forwarding: &Forwarding) -> Self {
        self.arg("-L").arg(format!(
            "{}:{}:{}",
            forwarding.local.port(),
            forwarding.target.host(),
            forwarding.target.port()
        ))
    }

    /// Do not execute a remote command or shell.
    pub(crate) fn no_remote_command(self) -> Self {
        self.arg("-N")
    }

    /// Disable pseudo-terminal allocation.
    pub(crate) fn no_tty(self) -> Self {
        self.arg("-T")
    }

    /// Disable agent forwarding.
    pub(crate) fn no_agent_forwarding(self) -> Self {
        self.arg("-a")
    }

    /// Request server keepalives so a dead hop is detected.
    pub(crate) fn keepalive(self, seconds: u32) -> Self {
        self.arg("-o").arg(format!("ServerAliveInterval={}", seconds))
    }

    /// Set the hop alias, passed verbatim as the final argument.
    pub(crate) fn hop(mut self, alias: impl Into<String>) -> Self {
        self.hop = Some(alias.into());
        self
    }

    /// Render the full command line for logging.
    pub(crate) fn to_command_line(&self) -> String {
        let mut parts = vec![self.binary.display().to_string()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        if let Some(ref hop) = self.hop {
            parts.push(hop.clone());
        }
        parts.join(" ")
    }

    /// Build the `Command`.
    ///
    /// The child's pre-exec hook unblocks the full signal set: the child
    /// inherits the parent's mask, and tunnels are spawned inside a
    /// critical section that blocks the termination signals, so without
    /// this the SSH client would be born deaf to them.
    pub(crate) fn build(self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.args);
        if let Some(ref hop) = self.hop {
            cmd.arg(hop);
        }
        unsafe {
            cmd.pre_exec(|| {
                let everything = SigSet::all();
                pthread_sigmask(SigmaskHow::SIG_UNBLOCK, Some(&everything), None)
                    .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
            });
        }
        cmd
    }

    pub(crate) fn binary(&self) -> &Path {
        &self.binary
    }
}
