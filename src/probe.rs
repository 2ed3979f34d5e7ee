//! Local endpoint discovery by probing the hop.
//!
//! The SSH client needs a local port for each `-L` forwarding that the
//! operating system will not hand out again in the short term. Rather
//! than binding a listener and guessing, we ask the kernel to pick an
//! ephemeral port *for a connection to this specific hop*: on a
//! multi-interface host that also yields a local address the kernel
//! considers usable for routing toward the hop.
//!
//! The probe opens a TCP socket with address reuse enabled, connects to
//! the resolved hop, reads back the socket's local address, and closes.
//! The returned port is free at the moment of return; the window between
//! return and the SSH client binding it is an accepted race, and no
//! retry happens at this layer.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use socket2::{Domain, Socket, Type};
use thiserror::Error;
use tracing::debug;

use crate::addr::HostAddr;

/// Errors from probing the hop for a local endpoint.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The hop did not resolve or refused the TCP probe.
    #[error("hop {hop} is unreachable: {source}")]
    HopUnreachable {
        /// The hop address that was probed.
        hop: HostAddr,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The probe socket's local address is not an IPv4/IPv6 address.
    #[error("local address for hop {0} is not an inet address")]
    WrongAddressFamily(HostAddr),

    /// The probe socket could not be created or inspected.
    #[error("probe socket error: {0}")]
    Socket(#[source] std::io::Error),
}

/// Probe the hop once and return the observed local endpoint.
pub fn probe_local_endpoint(hop: &HostAddr, timeout: Duration) -> Result<HostAddr, ProbeError> {
    let probe = ProbeSocket::open(hop, timeout)?;
    probe.local_endpoint()
}

/// Probe the hop `count` times, holding every probe socket open until all
/// local addresses have been read.
///
/// Holding the sockets open makes the returned ports pairwise distinct by
/// construction, which a sequence of open/read/close probes would only
/// give probabilistically.
pub fn probe_local_endpoints(
    hop: &HostAddr,
    count: usize,
    timeout: Duration,
) -> Result<Vec<HostAddr>, ProbeError> {
    let mut probes = Vec::with_capacity(count);
    for _ in 0..count {
        probes.push(ProbeSocket::open(hop, timeout)?);
    }
    probes.iter().map(ProbeSocket::local_endpoint).collect()
}

struct ProbeSocket {
    socket: Socket,
    hop: HostAddr,
}

impl ProbeSocket {
    fn open(hop: &HostAddr, timeout: Duration) -> Result<Self, ProbeError> {
        let remote = resolve_hop(hop)?;
        let domain = if remote.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };

        let socket = Socket::new(domain, Type::STREAM, None).map_err(ProbeError::Socket)?;
        socket
            .set_reuse_address(true)
            .map_err(ProbeError::Socket)?;
        socket
            .connect_timeout(&remote.into(), timeout)
            .map_err(|source| ProbeError::HopUnreachable {
                hop: hop.clone(),
                source,
            })?;

        Ok(Self {
            socket,
            hop: hop.clone(),
        })
    }

    fn local_endpoint(&self) -> Result<HostAddr, ProbeError> {
        let local = self
            .socket
            .local_addr()
            .map_err(ProbeError::Socket)?
            .as_socket()
            .ok_or_else(|| ProbeError::WrongAddressFamily(self.hop.clone()))?;

        debug!("Probe to {} observed local endpoint {}", self.hop, local);
        Ok(HostAddr::new(local.ip().to_string(), local.port()))
    }
}

fn resolve_hop(hop: &HostAddr) -> Result<SocketAddr, ProbeError> {
    let mut addrs =
        (hop.host(), hop.port())
            .to_socket_addrs()
            .map_err(|source| ProbeError::HopUnreachable {
                hop: hop.clone(),
                source,
            })?;
    addrs.next().ok_or_else(|| ProbeError::HopUnreachable {
        hop: hop.clone(),
        source: std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "hostname did not resolve to any address",
        ),
    })
}
