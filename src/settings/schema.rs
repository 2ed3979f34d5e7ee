//! Settings schema definitions.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_rule_tool() -> String {
    "iptables".to_string()
}

/// Default server keepalive interval (seconds).
const fn default_keepalive_secs() -> u32 {
    300
}

/// Default reaper tick period (milliseconds).
const fn default_reaper_interval_ms() -> u64 {
    1000
}

/// Default hop probe timeout (milliseconds).
const fn default_probe_timeout_ms() -> u64 {
    5000
}

fn default_config_files() -> Vec<PathBuf> {
    crate::ssh_config::default_config_files()
}

/// Tunables for the tunnel manager.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// SSH client binary, looked up in PATH unless absolute.
    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,

    /// Privileged rule tool binary, looked up in PATH unless absolute.
    #[serde(default = "default_rule_tool")]
    pub rule_tool: String,

    /// Server keepalive interval passed to the SSH client, in seconds.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u32,

    /// Period of the child reaper tick, in milliseconds.
    #[serde(default = "default_reaper_interval_ms")]
    pub reaper_interval_ms: u64,

    /// Timeout for the TCP probe to the hop, in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// SSH configuration files walked in order during alias resolution.
    ///
    /// Earlier files shadow later ones per keyword, so the user's own
    /// config conventionally comes first.
    #[serde(default = "default_config_files")]
    pub config_files: Vec<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ssh_binary: default_ssh_binary(),
            rule_tool: default_rule_tool(),
            keepalive_secs: default_keepalive_secs(),
            reaper_interval_ms: default_reaper_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            config_files: default_config_files(),
        }
    }
}

impl Settings {
    /// Merge another settings instance into this one.
    ///
    /// Every field is a scalar or an ordered list whose order carries
    /// meaning, so non-default values override rather than append.
    pub fn merge(&mut self, other: Settings) {
        if other.ssh_binary != default_ssh_binary() {
            self.ssh_binary = other.ssh_binary;
        }
        if other.rule_tool != default_rule_tool() {
            self.rule_tool = other.rule_tool;
        }
        if other.keepalive_secs != default_keepalive_secs() {
            self.keepalive_secs = other.keepalive_secs;
        }
        if other.reaper_interval_ms != default_reaper_interval_ms() {
            self.reaper_interval_ms = other.reaper_interval_ms;
        }
        if other.probe_timeout_ms != default_probe_timeout_ms() {
            self.probe_timeout_ms = other.probe_timeout_ms;
        }
        if other.config_files != default_config_files() {
            self.config_files = other.config_files;
        }
    }

    /// The reaper tick period as a `Duration`.
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    /// The hop probe timeout as a `Duration`.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}
