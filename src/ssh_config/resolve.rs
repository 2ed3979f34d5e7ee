//! Alias resolution over an ordered list of configuration files.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tracing::debug;

use super::parse::parse_directives;
use super::pattern::matches_any;
use crate::addr::HostAddr;

/// Fallback SSH port when no matching section supplies one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Resolve an alias to the real dial address.
///
/// Files are walked in the order given; within a file, directives are
/// walked in order and accumulate under every `Host` section whose
/// pattern list matches the alias. Accumulation is first-write-wins per
/// keyword across all matching sections and all files, which is why the
/// user's own config conventionally precedes the system-wide one in
/// `files`.
///
/// A `user@` prefix (up to the last `@`) is stripped before matching.
/// Missing or unreadable files are skipped; a malformed `port` value
/// falls through to the default. Resolution always produces an address:
/// with no match at all, the alias itself and port 22 are returned.
pub fn resolve(alias: &str, files: &[PathBuf]) -> HostAddr {
    let stripped = match alias.rfind('@') {
        Some(at) if at + 1 == alias.len() => {
            // Malformed "user@" with nothing after it; still dialable.
            return HostAddr::new(alias, DEFAULT_SSH_PORT);
        }
        Some(at) => &alias[at + 1..],
        None => alias,
    };

    let mut options: HashMap<String, String> = HashMap::new();
    for path in files {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!("Skipping config file {:?}: {}", path, e);
                continue;
            }
        };

        let mut in_matching_section = false;
        for directive in parse_directives(&contents) {
            if directive.keyword == "host" {
                in_matching_section = matches_any(&directive.value, stripped);
            } else if in_matching_section {
                options.entry(directive.keyword).or_insert(directive.value);
            }
        }
    }

    let hostname = options
        .remove("hostname")
        .unwrap_or_else(|| stripped.to_string());
    let port = match options.get("port") {
        Some(value) => match value.parse::<u16>() {
            Ok(port) if port != 0 => port,
            _ => {
                debug!("Ignoring malformed port {:?} for alias {}", value, alias);
                DEFAULT_SSH_PORT
            }
        },
        None => DEFAULT_SSH_PORT,
    };

    debug!("Resolved alias {} to {}:{}", alias, hostname, port);
    HostAddr::new(hostname, port)
}
