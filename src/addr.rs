//! Address types shared by the resolver, the probe, and the tunnels.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// An unresolved host/port pair.
///
/// The host is kept verbatim and is never resolved to a numeric address
/// here: it is handed through to the SSH client (which re-interprets
/// aliases via its own configuration) and to the rule driver (which
/// accepts hostnames). Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAddr {
    host: String,
    port: u16,
}

impl HostAddr {
    /// Create an address from a verbatim host and a port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The verbatim host string.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Bracket bare IPv6 addresses so the port stays unambiguous.
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Errors from parsing a `host:port` string.
#[derive(Debug, Error)]
pub enum AddrParseError {
    /// The string has no port separator.
    #[error("missing port in '{0}'")]
    MissingPort(String),

    /// The port is not an integer in 1..=65535.
    #[error("invalid port in '{0}'")]
    InvalidPort(String),
}

impl FromStr for HostAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            // Bracketed IPv6: [::1]:8080
            let (host, rest) = rest
                .split_once(']')
                .ok_or_else(|| AddrParseError::MissingPort(s.to_string()))?;
            let port = rest
                .strip_prefix(':')
                .ok_or_else(|| AddrParseError::MissingPort(s.to_string()))?;
            (host, port)
        } else {
            s.rsplit_once(':')
                .ok_or_else(|| AddrParseError::MissingPort(s.to_string()))?
        };

        let port: u16 = port
            .parse()
            .map_err(|_| AddrParseError::InvalidPort(s.to_string()))?;
        if port == 0 {
            return Err(AddrParseError::InvalidPort(s.to_string()));
        }

        Ok(HostAddr::new(host, port))
    }
}

/// A single local→target forwarding carried inside one SSH session.
///
/// One forwarding corresponds to exactly one installed redirect rule
/// while its owning tunnel is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forwarding {
    /// The local endpoint the SSH client listens on.
    pub local: HostAddr,
    /// The real destination the hop dials.
    pub target: HostAddr,
}

impl Forwarding {
    /// Pair a local endpoint with its target.
    pub fn new(local: HostAddr, target: HostAddr) -> Self {
        Self { local, target }
    }
}

impl fmt::Display for Forwarding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.local, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_hostname() {
        let addr = HostAddr::new("irc.example.net", 6667);
        assert_eq!(addr.to_string(), "irc.example.net:6667");
    }

    #[test]
    fn test_display_ipv6_brackets() {
        let addr = HostAddr::new("::1", 22);
        assert_eq!(addr.to_string(), "[::1]:22");
    }

    #[test]
    fn test_parse_host_port() {
        let addr: HostAddr = "example.com:8080".parse().unwrap();
        assert_eq!(addr.host(), "example.com");
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn test_parse_bracketed_ipv6() {
        let addr: HostAddr = "[::1]:2222".parse().unwrap();
        assert_eq!(addr.host(), "::1");
        assert_eq!(addr.port(), 2222);
    }

    #[test]
    fn test_parse_rejects_missing_port() {
        assert!(matches!(
            "example.com".parse::<HostAddr>(),
            Err(AddrParseError::MissingPort(_))
        ));
    }

    #[test]
    fn test_parse_rejects_port_zero() {
        assert!(matches!(
            "example.com:0".parse::<HostAddr>(),
            Err(AddrParseError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_parse_rejects_port_overflow() {
        assert!(matches!(
            "example.com:70000".parse::<HostAddr>(),
            Err(AddrParseError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_forwarding_display() {
        let fwd = Forwarding::new(
            HostAddr::new("127.0.0.1", 40001),
            HostAddr::new("irc.example.net", 6667),
        );
        assert_eq!(fwd.to_string(), "127.0.0.1:40001 -> irc.example.net:6667");
    }
}
