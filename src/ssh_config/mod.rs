//! OpenSSH-style configuration resolution.
//!
//! This module answers one question: given a user-supplied host alias,
//! what real host and port should be dialed? It reads the same files the
//! SSH client reads (`~/.ssh/config`, then `/etc/ssh/ssh_config`) so a
//! hop alias means the same thing to us and to the `ssh` child we spawn.
//!
//! The resolution result is only used to pick a local port bound to the
//! right route (see [`crate::probe`]); the alias itself is still passed
//! verbatim to the SSH client, which performs its own resolution with
//! the full option set.
//!
//! # Grammar
//!
//! Lines are `Keyword [=] Value` with `#` comments; keywords are
//! case-insensitive; values may be double-quoted. `Host pattern-list`
//! lines open sections; patterns use glob semantics (`*`, `?`, `[set]`).
//! The earliest occurrence of a keyword across all matching sections and
//! all files wins.

mod parse;
mod pattern;
mod resolve;

use std::path::PathBuf;

pub use parse::Directive;
pub use resolve::{resolve, DEFAULT_SSH_PORT};

/// The conventional file list: the user's config, then the system-wide
/// one, so personal settings dominate.
pub fn default_config_files() -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Some(home) = dirs::home_dir() {
        files.push(home.join(".ssh").join("config"));
    }
    files.push(PathBuf::from("/etc/ssh/ssh_config"));
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_files_order() {
        let files = default_config_files();
        assert!(!files.is_empty());
        assert_eq!(
            files.last().unwrap(),
            &PathBuf::from("/etc/ssh/ssh_config")
        );
    }
}
