//! hoptun: transparent TCP redirection to hosts behind an SSH hop
//!
//! This crate lets local applications dial a target address that is only
//! reachable from an intermediate "hop" host, with the traffic carried
//! transparently inside SSH. For each `(target-host, target-port)` pair
//! it opens a forwarded local port on an SSH connection to the hop and
//! installs a kernel NAT rule redirecting outbound connections for the
//! target onto that local port.
//!
//! # Architecture
//!
//! - **ssh_config**: resolves hop aliases through OpenSSH-style config
//!   files, so an alias means the same thing to us and to `ssh`
//! - **probe**: asks the kernel for a free local port routed toward the
//!   hop
//! - **redirect**: installs and removes NAT redirect rules through the
//!   privileged rule tool
//! - **tunnel**: supervises one SSH child carrying N forwardings,
//!   keeping rules and process state consistent
//! - **manager**: the facade. Registry of live tunnels, child reaping,
//!   observer fan-out, and the signal-mask discipline around critical
//!   sections
//! - **settings**: TOML-backed tunables with system/user hierarchy
//!
//! The crate never speaks the SSH wire protocol: it composes with the
//! user's existing SSH configuration, keys, and agent by delegating to
//! the installed `ssh` client.
//!
//! # Limitations
//!
//! Cleanup of kernel rules is guaranteed on cooperative termination and
//! on normal child death. A `SIGKILL` of the embedding process leaks the
//! installed rules; there is no automatic recovery for that case.
//!
//! # Example
//!
//! ```no_run
//! use hoptun::{HostAddr, Manager, Settings};
//!
//! let manager = Manager::new(Settings::default());
//! manager.on_close(|event| {
//!     eprintln!("tunnel via {} closed", event.hop);
//! });
//!
//! let pid = manager
//!     .create_tunnel("tock", &[HostAddr::new("irc.example.net", 6667)])
//!     .unwrap();
//!
//! // ... applications dial irc.example.net:6667 transparently ...
//!
//! manager.remove_tunnel(pid);
//! ```

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod addr;
pub mod error;
pub mod manager;
pub mod probe;
pub mod redirect;
pub mod settings;
pub mod ssh_config;
pub mod tunnel;

pub use addr::{Forwarding, HostAddr};
pub use error::Error;
pub use manager::{shutdown_signals, Manager, TunnelEvent};
pub use settings::{Settings, SettingsLoader};
pub use tunnel::{Tunnel, TunnelState};
